//! Queue-facing half of the likeness image worker.
//!
//! Reads job messages, runs each one through the
//! [`JobPipeline`](likeness_pipeline::job::JobPipeline) and publishes
//! exactly one outcome per message.

pub mod config;
pub mod consumer;
pub mod messages;
pub mod transport;
