//! Single-slot generation session against one ComfyUI server.
//!
//! [`GenerationSession`] owns a persistent WebSocket listener and an
//! HTTP backend. It tracks at most one in-flight prompt (the pending
//! request), submits it, resubmits the identical graph when ComfyUI
//! reports a failed execution, and turns the asynchronous
//! `execution_success` notification into the return value of
//! [`GenerationSession::generate`].
//!
//! The pending slot is the only state with two writers: the caller of
//! `generate` and the message loop. Every check-and-set, retry
//! increment and resolution happens inside one `std::sync::Mutex`
//! critical section, and the lock is never held across an `.await`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{ComfyUIApiError, ComfyUIBackend};
use crate::client::{ComfyUIClient, ComfyUIClientError, ComfyUIConnection};
use crate::messages::{ComfyUIMessage, Signal};
use crate::processor::{process_messages, MessageHandler, StreamEnd};
use crate::prompt::Workflow;
use crate::reconnect::{reconnect_loop, ReconnectPolicy};

/// Resubmissions allowed after the initial submission.
pub const MAX_RETRIES: u32 = 3;

/// How long `stop` waits for the listener task before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors surfaced by [`GenerationSession`].
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// Another prompt is still pending on this session.
    #[error("Generation already in progress")]
    AlreadyInProgress,

    /// ComfyUI rejected a submission (initial or retry).
    #[error("Failed to submit workflow: {0}")]
    Submission(#[source] ComfyUIApiError),

    /// ComfyUI kept failing the prompt past the retry bound.
    #[error("Max retries exceeded: {max_retries}")]
    RetriesExhausted { max_retries: u32 },

    /// The caller's cancellation token fired.
    #[error("Generation cancelled")]
    Cancelled,

    /// The event stream could not be established.
    #[error(transparent)]
    Connection(#[from] ComfyUIClientError),

    /// The backend cleanup call failed.
    #[error("Backend cleanup failed: {0}")]
    Cleanup(#[source] ComfyUIApiError),

    /// The pending request was dropped without being resolved.
    #[error("Pending request was abandoned without a result")]
    Abandoned,
}

type Completion = Result<(), GenerationError>;

/// The single in-flight prompt.
struct PendingRequest {
    id: Uuid,
    workflow: Arc<Workflow>,
    /// `None` once resolved; guarantees a single resolution.
    responder: Option<oneshot::Sender<Completion>>,
    retries: u32,
    cancel: CancellationToken,
}

impl PendingRequest {
    fn resolve(&mut self, outcome: Completion) {
        if let Some(responder) = self.responder.take() {
            // The receiver is gone only if `generate` already returned.
            let _ = responder.send(outcome);
        }
    }

    fn is_resolved(&self) -> bool {
        self.responder.is_none()
    }
}

/// State shared between `generate` callers and the message loop.
struct SessionShared {
    client_id: String,
    backend: Arc<dyn ComfyUIBackend>,
    pending: Mutex<Option<PendingRequest>>,
    stray_notifications: AtomicU64,
}

impl SessionShared {
    fn lock_pending(&self) -> MutexGuard<'_, Option<PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot, or fail if a request is already pending.
    fn begin(
        &self,
        workflow: Arc<Workflow>,
        responder: oneshot::Sender<Completion>,
        cancel: CancellationToken,
    ) -> Result<Uuid, GenerationError> {
        let mut slot = self.lock_pending();
        if slot.is_some() {
            return Err(GenerationError::AlreadyInProgress);
        }
        let id = Uuid::new_v4();
        *slot = Some(PendingRequest {
            id,
            workflow,
            responder: Some(responder),
            retries: 0,
            cancel,
        });
        Ok(id)
    }

    /// Clear the slot if it still holds request `id`.
    fn finish(&self, id: Uuid) {
        let mut slot = self.lock_pending();
        if slot.as_ref().is_some_and(|p| p.id == id) {
            *slot = None;
        }
    }

    fn resolve(&self, id: Uuid, outcome: Completion) {
        let mut slot = self.lock_pending();
        if let Some(pending) = slot.as_mut().filter(|p| p.id == id) {
            pending.resolve(outcome);
        }
    }

    fn record_stray(&self, message: &ComfyUIMessage) {
        let total = self.stray_notifications.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(?message, total, "Ignoring notification with no pending request");
    }

    fn on_success(&self, message: &ComfyUIMessage) {
        let mut slot = self.lock_pending();
        match slot.as_mut() {
            Some(pending) => {
                tracing::info!(request_id = %pending.id, retries = pending.retries, "Generation succeeded");
                pending.resolve(Ok(()));
            }
            None => self.record_stray(message),
        }
    }

    /// Increment the retry counter and resubmit, or give up past the bound.
    async fn on_failure(&self, message: &ComfyUIMessage) {
        let attempt = {
            let mut slot = self.lock_pending();
            let Some(pending) = slot.as_mut() else {
                self.record_stray(message);
                return;
            };
            if pending.is_resolved() {
                return;
            }

            pending.retries += 1;
            if pending.retries > MAX_RETRIES {
                tracing::error!(request_id = %pending.id, max_retries = MAX_RETRIES, "Generation retries exhausted");
                pending.resolve(Err(GenerationError::RetriesExhausted {
                    max_retries: MAX_RETRIES,
                }));
                return;
            }

            (
                pending.id,
                pending.retries,
                Arc::clone(&pending.workflow),
                pending.cancel.clone(),
            )
        };
        let (request_id, retry, workflow, cancel) = attempt;

        if let ComfyUIMessage::ExecutionError(data) = message {
            tracing::warn!(
                %request_id,
                node_id = data.node_id.as_deref().unwrap_or("-"),
                error_type = data.exception_type.as_deref().unwrap_or("-"),
                error_message = data.exception_message.as_deref().unwrap_or("-"),
                "ComfyUI execution error",
            );
        }
        tracing::info!(%request_id, "Attempting generation retry {retry}/{MAX_RETRIES}");

        let result = tokio::select! {
            // `generate` observes the same token and clears the slot.
            _ = cancel.cancelled() => return,
            result = self.backend.submit_prompt(&workflow, &self.client_id) => result,
        };

        match result {
            Ok(()) => {
                tracing::info!(%request_id, "Successful generation retry {retry}/{MAX_RETRIES}");
            }
            Err(e) => {
                tracing::error!(%request_id, error = %e, "Failed generation retry {retry}/{MAX_RETRIES}");
                self.resolve(request_id, Err(GenerationError::Submission(e)));
            }
        }
    }
}

#[async_trait]
impl MessageHandler for SessionShared {
    async fn handle(&self, message: ComfyUIMessage) {
        match message.signal() {
            Signal::Succeeded => self.on_success(&message),
            Signal::Failed => self.on_failure(&message).await,
            Signal::Informational => match &message {
                ComfyUIMessage::Progress(data) => {
                    tracing::debug!(value = data.value, max = data.max, "Generation progress");
                }
                ComfyUIMessage::Executing(data) => {
                    tracing::debug!(node = ?data.node, "Executing node");
                }
                other => tracing::trace!(?other, "ComfyUI notification"),
            },
            Signal::Unrecognized => {
                tracing::warn!(?message, "Got unhandled ComfyUI message");
            }
        }
    }
}

/// Clears the pending slot when `generate` returns or is dropped.
struct PendingGuard<'a> {
    shared: &'a SessionShared,
    request_id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.finish(self.request_id);
    }
}

struct Listener {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// One ComfyUI server, one client id, at most one pending prompt.
pub struct GenerationSession {
    client: ComfyUIClient,
    shared: Arc<SessionShared>,
    listener: tokio::sync::Mutex<Option<Listener>>,
}

impl GenerationSession {
    /// Create a stopped session. A fresh client id is generated and kept
    /// for the lifetime of the session.
    pub fn new(client: ComfyUIClient, backend: Arc<dyn ComfyUIBackend>) -> Self {
        Self {
            client,
            shared: Arc::new(SessionShared {
                client_id: Uuid::new_v4().to_string(),
                backend,
                pending: Mutex::new(None),
                stray_notifications: AtomicU64::new(0),
            }),
            listener: tokio::sync::Mutex::new(None),
        }
    }

    /// Client id correlating the event stream with submissions.
    pub fn client_id(&self) -> &str {
        &self.shared.client_id
    }

    /// Whether a prompt is currently pending.
    pub fn is_busy(&self) -> bool {
        self.shared.lock_pending().is_some()
    }

    /// Notifications received while no prompt was pending.
    pub fn stray_notifications(&self) -> u64 {
        self.shared.stray_notifications.load(Ordering::Relaxed)
    }

    /// Open the event stream and spawn the message loop.
    ///
    /// Calling `start` on a running session is a no-op.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<(), GenerationError> {
        let mut listener = self.listener.lock().await;
        if listener.as_ref().is_some_and(|l| !l.task.is_finished()) {
            return Ok(());
        }

        let conn = tokio::select! {
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            conn = self.client.connect(&self.shared.client_id) => conn?,
        };

        let listener_cancel = CancellationToken::new();
        let task = tokio::spawn(run_connection_loop(
            self.client.clone(),
            Arc::clone(&self.shared),
            conn,
            listener_cancel.clone(),
        ));

        *listener = Some(Listener {
            cancel: listener_cancel,
            task,
        });
        tracing::info!(client_id = %self.shared.client_id, "Generation session started");
        Ok(())
    }

    /// Close the event stream and wait for the message loop to exit.
    ///
    /// Calling `stop` on a stopped session is a no-op.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<(), GenerationError> {
        let Some(mut listener) = self.listener.lock().await.take() else {
            return Ok(());
        };
        listener.cancel.cancel();

        tokio::select! {
            _ = cancel.cancelled() => {
                listener.task.abort();
                return Err(GenerationError::Cancelled);
            }
            joined = tokio::time::timeout(STOP_TIMEOUT, &mut listener.task) => match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Session listener task failed"),
                Err(_) => {
                    tracing::warn!("Session listener did not stop in time, aborting");
                    listener.task.abort();
                }
            },
        }

        tracing::info!(client_id = %self.shared.client_id, "Generation session stopped");
        Ok(())
    }

    /// Submit `workflow` and wait until ComfyUI reports success.
    ///
    /// Fails immediately with [`GenerationError::AlreadyInProgress`] if
    /// another prompt is pending. The pending slot is cleared on every
    /// exit path, including when this future is dropped.
    pub async fn generate(
        &self,
        workflow: Workflow,
        cancel: &CancellationToken,
    ) -> Result<(), GenerationError> {
        let workflow = Arc::new(workflow);
        let (responder, completion) = oneshot::channel();
        let request_id = self
            .shared
            .begin(Arc::clone(&workflow), responder, cancel.clone())?;
        let _slot = PendingGuard {
            shared: &self.shared,
            request_id,
        };

        tracing::info!(%request_id, client_id = %self.shared.client_id, nodes = workflow.len(), "Submitting workflow");

        tokio::select! {
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            submitted = self.shared.backend.submit_prompt(&workflow, &self.shared.client_id) => {
                submitted.map_err(GenerationError::Submission)?;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(GenerationError::Cancelled),
            outcome = completion => outcome.unwrap_or(Err(GenerationError::Abandoned)),
        }
    }

    /// Ask the backend to free models and reset its generation state.
    pub async fn cleanup(&self, cancel: &CancellationToken) -> Result<(), GenerationError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(GenerationError::Cancelled),
            result = self.shared.backend.cleanup() => result.map_err(GenerationError::Cleanup),
        }
    }
}

/// Connection loop: process messages -> reconnect, until `cancel` fires.
async fn run_connection_loop(
    client: ComfyUIClient,
    shared: Arc<SessionShared>,
    mut conn: ComfyUIConnection,
    cancel: CancellationToken,
) {
    let reconnect_policy = ReconnectPolicy::default();

    loop {
        let mut ws_stream = conn.ws_stream;
        match process_messages(&mut ws_stream, shared.as_ref(), &cancel).await {
            StreamEnd::Cancelled => {
                if let Err(e) = ws_stream.close(None).await {
                    tracing::debug!(error = %e, "Error closing ComfyUI WebSocket");
                }
                return;
            }
            StreamEnd::Disconnected => {
                tracing::warn!(client_id = %conn.client_id, "Event stream lost, entering reconnect loop");
            }
        }

        match reconnect_loop(&client, &shared.client_id, &reconnect_policy, &cancel).await {
            Some(next) => conn = next,
            None => return,
        }
    }
}
