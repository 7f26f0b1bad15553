//! Locations the pipeline reads from and writes to.

use std::path::PathBuf;

/// Buckets and local directories used by one worker.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Bucket holding the subjects' LoRA weights.
    pub avatars_bucket: String,
    /// Bucket receiving generated images.
    pub results_bucket: String,
    /// Directory ComfyUI loads LoRAs from.
    pub loras_dir: PathBuf,
    /// Root of the workflow templates (`prod/prod-api.json` below it).
    pub workflows_dir: PathBuf,
    /// Directory ComfyUI writes generated images to.
    pub output_dir: PathBuf,
}

/// Connection settings for an S3-compatible object store.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}
