//! Addressing of a ComfyUI server and its event stream.
//!
//! ComfyUI serves HTTP and WebSocket on the same host and port. The
//! event stream is opened at `/ws?clientId=<id>`; execution messages
//! for prompts submitted with that id are pushed to this socket only.

use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream};

/// Raw WebSocket stream of a ComfyUI event connection.
pub type ComfyUIStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Base URLs of one ComfyUI server.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
    api_url: String,
}

/// An open event stream bound to a client id.
pub struct ComfyUIConnection {
    pub client_id: String,
    pub ws_stream: ComfyUIStream,
}

#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// The WebSocket handshake could not be completed.
    #[error("Failed to open ComfyUI event stream at {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: tungstenite::Error,
    },
}

impl ComfyUIClient {
    /// `ws_url` like `ws://host:8188`, `api_url` like `http://host:8188`.
    pub fn new(ws_url: String, api_url: String) -> Self {
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Both URLs for a plain host and port.
    pub fn from_host(host: &str, port: u16) -> Self {
        Self::new(
            format!("ws://{host}:{port}"),
            format!("http://{host}:{port}"),
        )
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Event stream URL for `client_id`.
    pub fn events_url(&self, client_id: &str) -> String {
        format!("{}/ws?clientId={client_id}", self.ws_url)
    }

    /// Open the event stream for `client_id`.
    pub async fn connect(&self, client_id: &str) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = self.events_url(client_id);
        let (ws_stream, _response) = connect_async(url.clone())
            .await
            .map_err(|source| ComfyUIClientError::Connection { url, source })?;

        tracing::info!(client_id, ws_url = %self.ws_url, "ComfyUI event stream open");

        Ok(ComfyUIConnection {
            client_id: client_id.to_string(),
            ws_stream,
        })
    }
}
