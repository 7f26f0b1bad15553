//! Builds the ComfyUI prompt graph for a job from the production template.
//!
//! The template is read fresh for every job so that it can be replaced
//! on disk without restarting the worker. Only a fixed set of node ids
//! is touched; every other node passes through unchanged.

use std::path::{Path, PathBuf};

use likeness_comfyui::prompt::Workflow;
use likeness_core::resolution::AspectRatio;

use crate::files::FileSystemError;

/// Template location relative to the workflows directory.
pub const TEMPLATE_RELATIVE_PATH: &str = "prod/prod-api.json";

/// Trigger phrase the subject LoRAs were trained on.
pub const TRIGGER_PROMPT: &str = "GNAVTRTKN face of the person";

const PROMPT_NODE: &str = "2";
const TRIGGER_NODE: &str = "37";
const SEED_NODES: [&str; 3] = ["3", "67", "76"];
const LATENT_NODE: &str = "5";
const LORA_NODES: [&str; 2] = ["105", "127"];

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error(transparent)]
    Read(#[from] FileSystemError),

    #[error("Failed to parse workflow template {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Job-specific values substituted into the template.
#[derive(Debug, Clone, Copy)]
pub struct WorkflowParams<'a> {
    pub prompt: &'a str,
    pub seed: i64,
    pub quantity: u32,
    pub aspect_ratio: AspectRatio,
    /// Local path of the downloaded LoRA; only its file name is used.
    pub lora_path: &'a Path,
}

/// Loads the production template and fills in job parameters.
#[derive(Debug, Clone)]
pub struct WorkflowBuilder {
    template_path: PathBuf,
}

impl WorkflowBuilder {
    pub fn new(workflows_dir: &Path) -> Self {
        Self {
            template_path: workflows_dir.join(TEMPLATE_RELATIVE_PATH),
        }
    }

    pub fn template_path(&self) -> &Path {
        &self.template_path
    }

    /// Read the template from disk and apply `params` to it.
    pub async fn build(&self, params: &WorkflowParams<'_>) -> Result<Workflow, TemplateError> {
        let raw = tokio::fs::read_to_string(&self.template_path)
            .await
            .map_err(|e| FileSystemError::new("read", &self.template_path, e))?;
        let mut workflow: Workflow =
            serde_json::from_str(&raw).map_err(|source| TemplateError::Parse {
                path: self.template_path.clone(),
                source,
            })?;

        apply_request(&mut workflow, params);
        Ok(workflow)
    }
}

/// Write the job parameters into their nodes. Missing nodes are skipped.
pub fn apply_request(workflow: &mut Workflow, params: &WorkflowParams<'_>) {
    let resolution = params.aspect_ratio.resolution();
    let lora_name = params
        .lora_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    for (id, node) in workflow.iter_mut() {
        match id.as_str() {
            PROMPT_NODE => node.set_input("text", params.prompt),
            TRIGGER_NODE => node.set_input("text", TRIGGER_PROMPT),
            LATENT_NODE => {
                node.set_input("batch_size", params.quantity);
                node.set_input("width", resolution.width);
                node.set_input("height", resolution.height);
            }
            id if SEED_NODES.contains(&id) => node.set_input("seed", params.seed),
            id if LORA_NODES.contains(&id) => node.set_input("lora_name", lora_name.as_str()),
            _ => {}
        }
    }

    let missing: Vec<&str> = [PROMPT_NODE, TRIGGER_NODE, LATENT_NODE]
        .into_iter()
        .chain(SEED_NODES)
        .chain(LORA_NODES)
        .filter(|id| !workflow.contains_key(*id))
        .collect();
    if !missing.is_empty() {
        tracing::debug!(?missing, "Template lacks some substitution nodes");
    }
}
