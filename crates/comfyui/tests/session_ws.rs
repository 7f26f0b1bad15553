//! End-to-end tests for `GenerationSession` over a real WebSocket.
//!
//! A local tokio-tungstenite server plays the ComfyUI event stream; a
//! fake HTTP backend asks the server to push the next scripted event
//! whenever a prompt is submitted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use likeness_comfyui::api::{ComfyUIApiError, ComfyUIBackend};
use likeness_comfyui::client::ComfyUIClient;
use likeness_comfyui::prompt::Workflow;
use likeness_comfyui::session::{GenerationError, GenerationSession};

/// Start a one-connection WebSocket server that forwards every string
/// received on the returned channel as a text frame. The handshake path
/// (including the query string) is reported on `paths`.
async fn event_server() -> (String, mpsc::UnboundedSender<String>, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let paths = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&paths);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            seen.lock().unwrap().push(req.uri().to_string());
            Ok(resp)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();
        let (mut sink, mut incoming) = ws.split();
        loop {
            tokio::select! {
                Some(text) = rx.recv() => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                frame = incoming.next() => match frame {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                },
            }
        }
    });

    (format!("ws://{addr}"), tx, paths)
}

struct PushingBackend {
    server: mpsc::UnboundedSender<String>,
    events: Mutex<Vec<&'static str>>,
    submissions: AtomicUsize,
    client_ids: Mutex<Vec<String>>,
}

#[async_trait]
impl ComfyUIBackend for PushingBackend {
    async fn submit_prompt(&self, _workflow: &Workflow, client_id: &str) -> Result<(), ComfyUIApiError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.client_ids.lock().unwrap().push(client_id.to_string());
        let mut events = self.events.lock().unwrap();
        if !events.is_empty() {
            let event = events.remove(0);
            let _ = self.server.send(event.to_string());
        }
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), ComfyUIApiError> {
        Ok(())
    }
}

#[tokio::test]
async fn generate_over_websocket_with_one_retry() {
    let (ws_url, server, paths) = event_server().await;
    let backend = Arc::new(PushingBackend {
        server,
        events: Mutex::new(vec![
            r#"{"type":"execution_error","data":{"node_id":"3"}}"#,
            r#"{"type":"execution_success","data":{}}"#,
        ]),
        submissions: AtomicUsize::new(0),
        client_ids: Mutex::new(Vec::new()),
    });
    let session = GenerationSession::new(
        ComfyUIClient::new(ws_url, "http://unused".into()),
        backend.clone(),
    );
    let cancel = CancellationToken::new();

    session.start(&cancel).await.unwrap();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        session.generate(Workflow::new(), &cancel),
    )
    .await
    .expect("generation should complete");

    assert!(result.is_ok());
    assert_eq!(backend.submissions.load(Ordering::SeqCst), 2);
    let expected_query = format!("clientId={}", session.client_id());
    assert!(paths.lock().unwrap()[0].ends_with(&expected_query));
    assert!(backend
        .client_ids
        .lock()
        .unwrap()
        .iter()
        .all(|id| id == session.client_id()));

    session.stop(&cancel).await.unwrap();
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let (ws_url, server, paths) = event_server().await;
    let backend = Arc::new(PushingBackend {
        server,
        events: Mutex::new(Vec::new()),
        submissions: AtomicUsize::new(0),
        client_ids: Mutex::new(Vec::new()),
    });
    let session = GenerationSession::new(
        ComfyUIClient::new(ws_url, "http://unused".into()),
        backend,
    );
    let cancel = CancellationToken::new();

    session.start(&cancel).await.unwrap();
    session.start(&cancel).await.unwrap();
    assert_eq!(paths.lock().unwrap().len(), 1);

    session.stop(&cancel).await.unwrap();
    session.stop(&cancel).await.unwrap();
}

#[tokio::test]
async fn start_honours_cancellation() {
    let session = GenerationSession::new(
        ComfyUIClient::from_host("127.0.0.1", 9),
        Arc::new(likeness_comfyui::api::ComfyUIApi::new("http://127.0.0.1:9".into())),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = session.start(&cancel).await;

    assert_matches!(
        result,
        Err(GenerationError::Cancelled) | Err(GenerationError::Connection(_))
    );
}
