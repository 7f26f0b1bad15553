//! ComfyUI WebSocket and REST client library.
//!
//! Provides the API-format prompt graph, typed message parsing,
//! WebSocket connection handling, HTTP API wrappers, reconnection logic
//! and the [`session::GenerationSession`] that drives exactly one
//! generation at a time against a ComfyUI server.

pub mod api;
pub mod client;
pub mod messages;
pub mod processor;
pub mod prompt;
pub mod reconnect;
pub mod session;
