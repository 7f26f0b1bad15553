//! Shared domain types for the likeness image worker.
//!
//! Holds the job request/result model and the aspect-ratio table used
//! by the workflow builder. Nothing in here performs I/O.

pub mod error;
pub mod job;
pub mod resolution;
