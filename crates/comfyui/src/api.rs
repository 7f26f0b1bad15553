//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps workflow submission (`POST /prompt`) and the backend reset
//! hook (`POST /cleanup`) using [`reqwest`]. Both calls only promise an
//! HTTP success or failure status; response bodies are not interpreted.

use async_trait::async_trait;
use serde::Serialize;

use crate::prompt::Workflow;

/// The two HTTP operations a [`GenerationSession`](crate::session::GenerationSession)
/// needs from a backend.
#[async_trait]
pub trait ComfyUIBackend: Send + Sync {
    /// Queue a prompt graph for execution on behalf of `client_id`.
    async fn submit_prompt(&self, workflow: &Workflow, client_id: &str)
        -> Result<(), ComfyUIApiError>;

    /// Ask the backend to release models and reset generation state.
    async fn cleanup(&self) -> Result<(), ComfyUIApiError>;
}

/// HTTP client for a single ComfyUI instance.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// Body of `POST /prompt`.
#[derive(Debug, Serialize)]
pub struct PromptRequest<'a> {
    pub prompt: &'a Workflow,
    pub client_id: &'a str,
}

impl ComfyUIApi {
    /// `api_url` like `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Reuse an existing [`reqwest::Client`] (connection pool, timeouts).
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// POST to `path`, optionally with a JSON body, and require a 2xx reply.
    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<(), ComfyUIApiError> {
        let mut request = self.client.post(format!("{}{path}", self.api_url));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        tracing::debug!(path, status = status.as_u16(), "ComfyUI rejected request");
        Err(ComfyUIApiError::ApiError {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ComfyUIBackend for ComfyUIApi {
    async fn submit_prompt(
        &self,
        workflow: &Workflow,
        client_id: &str,
    ) -> Result<(), ComfyUIApiError> {
        let body = PromptRequest {
            prompt: workflow,
            client_id,
        };
        self.post("/prompt", Some(&body)).await
    }

    async fn cleanup(&self) -> Result<(), ComfyUIApiError> {
        self.post::<()>("/cleanup", None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_display_includes_status_and_body() {
        let err = ComfyUIApiError::ApiError {
            status: 400,
            body: "invalid prompt".into(),
        };
        assert_eq!(err.to_string(), "ComfyUI API error (400): invalid prompt");
    }

    #[test]
    fn prompt_request_shape() {
        let workflow: Workflow =
            serde_json::from_str(r#"{"9": {"inputs": {}, "class_type": "SaveImage"}}"#).unwrap();
        let body = serde_json::to_value(PromptRequest {
            prompt: &workflow,
            client_id: "c-1",
        })
        .unwrap();
        assert_eq!(body["client_id"], "c-1");
        assert_eq!(body["prompt"]["9"]["class_type"], "SaveImage");
    }

    #[tokio::test]
    async fn unreachable_backend_is_request_error() {
        // Port 9 (discard) is essentially never listening on localhost.
        let api = ComfyUIApi::new("http://127.0.0.1:9".into());
        let result = api.cleanup().await;
        assert!(matches!(result, Err(ComfyUIApiError::Request(_))));
    }
}
