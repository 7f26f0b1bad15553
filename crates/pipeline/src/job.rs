//! End-to-end execution of one generation job.
//!
//! [`JobPipeline::execute`] runs the steps in order:
//!
//! 1. Reset the backend and the output directory.
//! 2. Download the subject's LoRA into the LoRA directory.
//! 3. Build the prompt graph from the production template.
//! 4. Generate on the ComfyUI session.
//! 5. Upload every produced PNG to the results bucket.
//! 6. Delete the LoRA and reset the output directory, then ask the
//!    backend to free memory (failures there are only logged).
//!
//! A failure in step 1 is fatal and leaves nothing to undo. A failure in
//! steps 2 to 6 triggers compensating cleanup of whatever step 6 has not
//! already done, and the original error is returned.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use likeness_comfyui::prompt::Workflow;
use likeness_comfyui::session::{GenerationError, GenerationSession};
use likeness_core::error::CoreError;
use likeness_core::job::{JobRequest, JobResult};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::files::{FileService, FileSystemError};
use crate::settings::PipelineSettings;
use crate::storage::{ObjectStore, StorageError};
use crate::workflow::{TemplateError, WorkflowBuilder, WorkflowParams};

/// Extension of the images ComfyUI writes to the output directory.
pub const IMAGE_EXTENSION: &str = "png";

/// Extension given to downloaded LoRA files.
pub const REFERENCE_EXTENSION: &str = "safetensors";

/// Runs prompt graphs to completion. Implemented by [`GenerationSession`].
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        workflow: Workflow,
        cancel: &CancellationToken,
    ) -> Result<(), GenerationError>;

    async fn cleanup(&self, cancel: &CancellationToken) -> Result<(), GenerationError>;
}

#[async_trait]
impl ImageGenerator for GenerationSession {
    async fn generate(
        &self,
        workflow: Workflow,
        cancel: &CancellationToken,
    ) -> Result<(), GenerationError> {
        GenerationSession::generate(self, workflow, cancel).await
    }

    async fn cleanup(&self, cancel: &CancellationToken) -> Result<(), GenerationError> {
        GenerationSession::cleanup(self, cancel).await
    }
}

/// Pipeline step a job failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStep {
    Validate,
    PreCleanup,
    DownloadReference,
    BuildWorkflow,
    Generate,
    Upload,
    PostCleanup,
}

impl JobStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::PreCleanup => "pre_cleanup",
            Self::DownloadReference => "download_reference",
            Self::BuildWorkflow => "build_workflow",
            Self::Generate => "generate",
            Self::Upload => "upload",
            Self::PostCleanup => "post_cleanup",
        }
    }
}

impl fmt::Display for JobStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Underlying cause of a job failure.
#[derive(Debug, thiserror::Error)]
pub enum JobErrorKind {
    #[error(transparent)]
    Invalid(#[from] CoreError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    FileSystem(#[from] FileSystemError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Job cancelled")]
    Cancelled,
}

/// A job failure and the step it happened in.
#[derive(Debug, thiserror::Error)]
#[error("Job failed at step '{step}': {kind}")]
pub struct JobError {
    pub step: JobStep,
    #[source]
    pub kind: JobErrorKind,
}

impl JobError {
    pub fn new(step: JobStep, kind: impl Into<JobErrorKind>) -> Self {
        Self {
            step,
            kind: kind.into(),
        }
    }
}

/// Object-store key for a produced image.
pub fn image_key(job_id: &str, file_name: &str) -> String {
    format!("jobs/{job_id}/{file_name}")
}

/// Cleanup actions owed by a running job and whether each has been done.
#[derive(Debug, Default)]
struct JobResources {
    reference: Option<PathBuf>,
    reference_released: bool,
    output_reset: bool,
}

/// Executes jobs one at a time against a generator, an object store and
/// the local filesystem.
pub struct JobPipeline {
    generator: Arc<dyn ImageGenerator>,
    store: Arc<dyn ObjectStore>,
    files: Arc<dyn FileService>,
    workflows: WorkflowBuilder,
    settings: PipelineSettings,
}

impl JobPipeline {
    pub fn new(
        generator: Arc<dyn ImageGenerator>,
        store: Arc<dyn ObjectStore>,
        files: Arc<dyn FileService>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            generator,
            store,
            files,
            workflows: WorkflowBuilder::new(&settings.workflows_dir),
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run `request` through every step and return the uploaded keys.
    pub async fn execute(
        &self,
        request: &JobRequest,
        cancel: &CancellationToken,
    ) -> Result<JobResult, JobError> {
        let job_id = request.job_id.as_str();
        request
            .validate()
            .map_err(|e| JobError::new(JobStep::Validate, e))?;

        tracing::info!(
            job_id,
            quantity = request.quantity,
            aspect_ratio = ?request.aspect_ratio,
            "Starting job",
        );

        step(job_id, JobStep::PreCleanup, self.pre_cleanup(cancel)).await?;

        let mut resources = JobResources::default();
        match self.run(request, &mut resources, cancel).await {
            Ok(produced_keys) => {
                tracing::info!(job_id, images = produced_keys.len(), "Job completed");
                Ok(JobResult {
                    job_id: request.job_id.clone(),
                    produced_keys,
                })
            }
            Err(err) => {
                self.compensate(job_id, &mut resources, cancel).await;
                Err(err)
            }
        }
    }

    /// Steps 2 to 6. Progress on cleanup is recorded in `resources`.
    async fn run(
        &self,
        request: &JobRequest,
        resources: &mut JobResources,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, JobError> {
        let job_id = request.job_id.as_str();

        let lora_path = self.reference_path();
        resources.reference = Some(lora_path.clone());
        step(
            job_id,
            JobStep::DownloadReference,
            self.download_reference(&request.reference_asset, &lora_path, cancel),
        )
        .await?;

        let params = WorkflowParams {
            prompt: &request.prompt,
            seed: request.seed,
            quantity: request.quantity,
            aspect_ratio: request.aspect_ratio,
            lora_path: &lora_path,
        };
        let workflow = step(
            job_id,
            JobStep::BuildWorkflow,
            cancellable(cancel, self.workflows.build(&params)),
        )
        .await?;

        step(
            job_id,
            JobStep::Generate,
            async {
                self.generator
                    .generate(workflow, cancel)
                    .await
                    .map_err(JobErrorKind::from)
            },
        )
        .await?;

        let keys = step(job_id, JobStep::Upload, self.upload_images(job_id, cancel)).await?;

        step(
            job_id,
            JobStep::PostCleanup,
            self.release(job_id, resources, cancel),
        )
        .await?;

        Ok(keys)
    }

    fn reference_path(&self) -> PathBuf {
        self.settings.loras_dir.join(format!(
            "{}.{REFERENCE_EXTENSION}",
            Uuid::new_v4().simple()
        ))
    }

    async fn pre_cleanup(&self, cancel: &CancellationToken) -> Result<(), JobErrorKind> {
        self.generator.cleanup(cancel).await?;
        cancellable(cancel, self.files.clean_directory(&self.settings.output_dir)).await
    }

    async fn download_reference(
        &self,
        key: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), JobErrorKind> {
        let reader = cancellable(
            cancel,
            self.store.get_object(&self.settings.avatars_bucket, key),
        )
        .await?;
        let bytes = cancellable(cancel, self.files.write_stream(destination, reader)).await?;
        tracing::debug!(path = %destination.display(), bytes, "Reference asset stored");
        Ok(())
    }

    async fn upload_images(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, JobErrorKind> {
        let images = cancellable(
            cancel,
            self.files.list_files(&self.settings.output_dir, IMAGE_EXTENSION),
        )
        .await?;
        if images.is_empty() {
            tracing::warn!(job_id, output_dir = %self.settings.output_dir.display(), "No images produced");
        }

        let keys: Vec<String> = images
            .iter()
            .map(|path| {
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                image_key(job_id, &file_name)
            })
            .collect();

        let uploads = images
            .iter()
            .zip(&keys)
            .map(|(path, key)| self.store.put_object(&self.settings.results_bucket, key, path));

        cancellable(cancel, futures::future::try_join_all(uploads)).await?;
        Ok(keys)
    }

    /// Delete the LoRA and reset the output directory, skipping whichever
    /// of the two has already succeeded. The backend is then asked to free
    /// its memory; that request never fails the job.
    async fn release(
        &self,
        job_id: &str,
        resources: &mut JobResources,
        cancel: &CancellationToken,
    ) -> Result<(), JobErrorKind> {
        self.release_reference(resources).await?;
        self.reset_output(resources).await?;
        self.release_backend(job_id, cancel).await;
        Ok(())
    }

    async fn release_backend(&self, job_id: &str, cancel: &CancellationToken) {
        if let Err(e) = self.generator.cleanup(cancel).await {
            tracing::warn!(job_id, error = %e, "Backend cleanup failed");
        }
    }

    async fn release_reference(&self, resources: &mut JobResources) -> Result<(), FileSystemError> {
        if resources.reference_released {
            return Ok(());
        }
        if let Some(path) = &resources.reference {
            self.files.delete_file(path).await?;
        }
        resources.reference_released = true;
        Ok(())
    }

    async fn reset_output(&self, resources: &mut JobResources) -> Result<(), FileSystemError> {
        if resources.output_reset {
            return Ok(());
        }
        self.files.clean_directory(&self.settings.output_dir).await?;
        resources.output_reset = true;
        Ok(())
    }

    /// Best-effort cleanup after a failed step. Errors are logged only.
    async fn compensate(
        &self,
        job_id: &str,
        resources: &mut JobResources,
        cancel: &CancellationToken,
    ) {
        if let Err(e) = self.release_reference(resources).await {
            tracing::error!(job_id, error = %e, "Compensating cleanup failed to delete reference asset");
        }
        if let Err(e) = self.reset_output(resources).await {
            tracing::error!(job_id, error = %e, "Compensating cleanup failed to reset output directory");
        }
        self.release_backend(job_id, cancel).await;
    }
}

/// Run one pipeline step, logging its start and outcome.
async fn step<T, F>(job_id: &str, step: JobStep, fut: F) -> Result<T, JobError>
where
    F: Future<Output = Result<T, JobErrorKind>>,
{
    tracing::debug!(job_id, step = %step, "Step started");
    match fut.await {
        Ok(value) => {
            tracing::info!(job_id, step = %step, "Step succeeded");
            Ok(value)
        }
        Err(kind) => {
            tracing::error!(job_id, step = %step, error = %kind, "Step failed");
            Err(JobError::new(step, kind))
        }
    }
}

/// Await `fut` unless `cancel` fires first.
async fn cancellable<T, E, F>(cancel: &CancellationToken, fut: F) -> Result<T, JobErrorKind>
where
    F: Future<Output = Result<T, E>>,
    E: Into<JobErrorKind>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(JobErrorKind::Cancelled),
        result = fut => result.map_err(Into::into),
    }
}
