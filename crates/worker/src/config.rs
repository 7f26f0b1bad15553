use std::path::PathBuf;

use likeness_pipeline::settings::{PipelineSettings, S3Settings};

/// Default ComfyUI host.
pub const DEFAULT_COMFYUI_HOST: &str = "127.0.0.1";
/// Default ComfyUI port.
pub const DEFAULT_COMFYUI_PORT: u16 = 8188;
/// Default object store region.
pub const DEFAULT_S3_REGION: &str = "us-east-1";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub comfyui_host: String,
    pub comfyui_port: u16,
    pub s3: S3Settings,
    pub pipeline: PipelineSettings,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var             | Default       |
    /// |---------------------|---------------|
    /// | `COMFYUI_HOST`      | `127.0.0.1`   |
    /// | `COMFYUI_PORT`      | `8188`        |
    /// | `S3_ENDPOINT`       | required      |
    /// | `S3_ACCESS_KEY`     | required      |
    /// | `S3_SECRET_KEY`     | required      |
    /// | `S3_REGION`         | `us-east-1`   |
    /// | `S3_AVATARS_BUCKET` | required      |
    /// | `S3_RESULTS_BUCKET` | required      |
    /// | `LORAS_DIR`         | required      |
    /// | `WORKFLOWS_DIR`     | required      |
    /// | `OUTPUT_DIR`        | required      |
    /// | `LOG_FORMAT`        | `text`        |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };

        let comfyui_port = match env.optional("COMFYUI_PORT") {
            Some(value) => value.parse::<u16>().map_err(|e| {
                ConfigError::Invalid {
                    var: "COMFYUI_PORT",
                    value,
                    reason: e.to_string(),
                }
            })?,
            None => DEFAULT_COMFYUI_PORT,
        };

        let log_format = match env.optional("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: other.to_string(),
                    reason: "expected 'text' or 'json'".into(),
                })
            }
        };

        Ok(Self {
            comfyui_host: env
                .optional("COMFYUI_HOST")
                .unwrap_or_else(|| DEFAULT_COMFYUI_HOST.into()),
            comfyui_port,
            s3: S3Settings {
                endpoint: env.required("S3_ENDPOINT")?,
                access_key: env.required("S3_ACCESS_KEY")?,
                secret_key: env.required("S3_SECRET_KEY")?,
                region: env
                    .optional("S3_REGION")
                    .unwrap_or_else(|| DEFAULT_S3_REGION.into()),
            },
            pipeline: PipelineSettings {
                avatars_bucket: env.required("S3_AVATARS_BUCKET")?,
                results_bucket: env.required("S3_RESULTS_BUCKET")?,
                loras_dir: PathBuf::from(env.required("LORAS_DIR")?),
                workflows_dir: PathBuf::from(env.required("WORKFLOWS_DIR")?),
                output_dir: PathBuf::from(env.required("OUTPUT_DIR")?),
            },
            log_format,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// A set, non-blank value.
    fn optional(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.optional(var).ok_or(ConfigError::Missing(var))
    }
}
