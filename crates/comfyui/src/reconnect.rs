//! Re-establishing a dropped event stream.
//!
//! A generation session keeps its client id for life, so after a drop
//! it simply reconnects with the same id and ComfyUI resumes routing
//! execution messages to it. Attempts are spaced by a capped,
//! doubling [`Backoff`].

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIClient, ComfyUIConnection};

/// Delay bounds for reconnect attempts.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Wait after the first failed attempt.
    pub initial_delay: Duration,
    /// Cap on the wait between attempts.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Doubling delay sequence, capped at the policy maximum.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(policy: &ReconnectPolicy) -> Self {
        Self {
            next: policy.initial_delay.min(policy.max_delay),
            max: policy.max_delay,
        }
    }

    /// The delay to wait now; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next;
        self.next = current.saturating_mul(2).min(self.max);
        current
    }
}

/// Reconnect `client_id` until it succeeds or `cancel` fires.
///
/// Returns `None` only on cancellation.
pub async fn reconnect_loop(
    client: &ComfyUIClient,
    client_id: &str,
    policy: &ReconnectPolicy,
    cancel: &CancellationToken,
) -> Option<ComfyUIConnection> {
    let mut backoff = Backoff::new(policy);

    for attempt in 1u32.. {
        let connected = tokio::select! {
            _ = cancel.cancelled() => return None,
            result = client.connect(client_id) => result,
        };

        let error = match connected {
            Ok(conn) => {
                tracing::info!(client_id, attempt, "Event stream re-established");
                return Some(conn);
            }
            Err(e) => e,
        };

        let delay = backoff.next_delay();
        tracing::warn!(
            client_id,
            attempt,
            retry_in_ms = delay.as_millis() as u64,
            error = %error,
            "ComfyUI reconnect failed",
        );

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    None
}
