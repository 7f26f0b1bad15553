//! Job request and result model.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::resolution::AspectRatio;

/// A request to generate images of one subject.
///
/// Immutable once accepted by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: String,
    /// Object-store key of the subject's LoRA weights.
    pub reference_asset: String,
    pub quantity: u32,
    pub seed: i64,
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
}

impl JobRequest {
    /// Reject requests the pipeline cannot sensibly run.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.job_id.trim().is_empty() {
            return Err(CoreError::Validation("job_id must not be empty".into()));
        }
        if self.reference_asset.trim_start_matches('/').trim().is_empty() {
            return Err(CoreError::Validation(
                "reference_asset must not be empty".into(),
            ));
        }
        if self.quantity == 0 {
            return Err(CoreError::Validation("quantity must be at least 1".into()));
        }
        Ok(())
    }
}

/// Keys of the uploaded images for a finished job, in upload order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub produced_keys: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> JobRequest {
        JobRequest {
            job_id: "J1".into(),
            reference_asset: "avatars/x.safetensors".into(),
            quantity: 1,
            seed: 42,
            prompt: "a cat".into(),
            aspect_ratio: AspectRatio::Square1x1,
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn zero_quantity_rejected() {
        let req = JobRequest {
            quantity: 0,
            ..request()
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn large_quantity_accepted() {
        for quantity in [17, 64, u32::MAX] {
            let req = JobRequest {
                quantity,
                ..request()
            };
            assert!(req.validate().is_ok(), "quantity {quantity} rejected");
        }
    }

    #[test]
    fn slash_only_reference_rejected() {
        let req = JobRequest {
            reference_asset: "/".into(),
            ..request()
        };
        assert!(req.validate().is_err());
    }
}
