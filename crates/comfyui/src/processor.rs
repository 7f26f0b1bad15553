//! WebSocket message processing loop.
//!
//! Reads raw frames from a ComfyUI WebSocket connection in arrival
//! order, parses text frames into [`ComfyUIMessage`] variants and hands
//! each one to a [`MessageHandler`]. The handler is awaited before the
//! next frame is read, so per-connection ordering is preserved.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use crate::messages::{parse_message, ComfyUIMessage};

/// Receives every parsed message of a connection.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: ComfyUIMessage);
}

/// Why [`process_messages`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The cancellation token fired; the caller owns the socket shutdown.
    Cancelled,
    /// The server closed the socket, a receive error occurred, or the
    /// stream was exhausted.
    Disconnected,
}

/// Process WebSocket messages until the connection ends or `cancel` fires.
///
/// Binary frames (preview images) are ignored. Text frames that fail to
/// parse are logged and skipped; they never end the loop.
pub async fn process_messages<S, H>(
    ws_stream: &mut S,
    handler: &H,
    cancel: &CancellationToken,
) -> StreamEnd
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    H: MessageHandler + ?Sized,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return StreamEnd::Cancelled,
            next = ws_stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                if text.trim().is_empty() {
                    continue;
                }
                match parse_message(&text) {
                    Ok(message) => handler.handle(message).await,
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            raw_message = %text,
                            "Failed to parse ComfyUI message",
                        );
                    }
                }
            }
            Some(Ok(Message::Binary(_))) => {
                tracing::trace!("Ignoring binary message (preview image)");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // Handled automatically by tungstenite.
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(?frame, "ComfyUI WebSocket closed");
                return StreamEnd::Disconnected;
            }
            Some(Ok(Message::Frame(_))) => {}
            Some(Err(e)) => {
                tracing::error!(error = %e, "WebSocket receive error");
                return StreamEnd::Disconnected;
            }
            None => {
                tracing::info!("ComfyUI WebSocket stream exhausted");
                return StreamEnd::Disconnected;
            }
        }
    }
}
