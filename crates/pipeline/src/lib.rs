//! Job pipeline for the likeness image worker.
//!
//! Turns a [`JobRequest`](likeness_core::job::JobRequest) into uploaded
//! images: resets local and backend state, downloads the subject's LoRA,
//! builds the ComfyUI prompt graph from a template, runs it through an
//! [`ImageGenerator`](job::ImageGenerator), uploads the results and
//! cleans up again, compensating on any failure.

pub mod files;
pub mod job;
pub mod settings;
pub mod storage;
pub mod workflow;
