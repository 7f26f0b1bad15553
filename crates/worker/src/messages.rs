//! Wire format of the job queue.
//!
//! Inputs are [`JobRequest`]s. Every input is answered by one
//! [`JobOutcome`]: `{"job_id", "success": true, "produced_keys": [...]}`
//! or `{"job_id", "success": false, "error": "..."}`.

use serde::{Deserialize, Serialize};

use likeness_core::job::{JobRequest, JobResult};

/// A job message as consumed from the queue.
pub type JobMessage = JobRequest;

/// The single reply published for a job message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produced_keys: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn succeeded(result: JobResult) -> Self {
        Self {
            job_id: result.job_id,
            success: true,
            produced_keys: Some(result.produced_keys),
            error: None,
        }
    }

    pub fn failed(job_id: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            job_id: job_id.into(),
            success: false,
            produced_keys: None,
            error: Some(error.to_string()),
        }
    }
}
