//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. Custom nodes and newer server
//! versions add types at will, so parsing only fails on malformed JSON
//! or a missing `type`; anything unrecognised becomes
//! [`ComfyUIMessage::Unknown`]. Payloads are parsed leniently and only
//! used for logging.

use serde::Deserialize;

pub const EXECUTION_SUCCESS: &str = "execution_success";
pub const EXECUTION_FAIL: &str = "execution_fail";
pub const EXECUTION_ERROR: &str = "execution_error";
pub const EXECUTING: &str = "executing";
pub const EXECUTED: &str = "executed";
pub const PROGRESS: &str = "progress";
pub const STATUS: &str = "status";
pub const EXECUTION_START: &str = "execution_start";
pub const EXECUTION_CACHED: &str = "execution_cached";

/// All ComfyUI WebSocket message types the session distinguishes.
#[derive(Debug, Clone, PartialEq)]
pub enum ComfyUIMessage {
    /// The prompt finished and every output node ran.
    ExecutionSuccess,

    /// The prompt failed without a node-level exception.
    ExecutionFail,

    /// A node raised during execution.
    ExecutionError(ErrorData),

    /// A specific node is currently executing (or execution finished when `node` is `None`).
    Executing(ExecutingData),

    /// Progress update from a long-running node (e.g. KSampler).
    Progress(ProgressData),

    /// A node has finished and produced output.
    Executed,

    /// Queue status, execution start and cache notices.
    Informational(String),

    /// A `type` this client does not know about.
    Unknown(String),
}

/// Broad effect a message has on an in-flight prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Succeeded,
    Failed,
    Informational,
    Unrecognized,
}

/// Payload for `executing` messages.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecutingData {
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `progress` messages (step-level progress within a node).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    #[serde(default)]
    pub value: i64,
    /// Total number of steps.
    #[serde(default)]
    pub max: i64,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub exception_message: Option<String>,
    #[serde(default)]
    pub exception_type: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl ComfyUIMessage {
    /// How the session should react to this message.
    pub fn signal(&self) -> Signal {
        match self {
            Self::ExecutionSuccess => Signal::Succeeded,
            Self::ExecutionFail | Self::ExecutionError(_) => Signal::Failed,
            Self::Executing(_) | Self::Progress(_) | Self::Executed | Self::Informational(_) => {
                Signal::Informational
            }
            Self::Unknown(_) => Signal::Unrecognized,
        }
    }
}

/// Parse a ComfyUI WebSocket text message.
///
/// Returns `Err` only for malformed JSON or a missing `type` field.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;

    let message = match envelope.kind.as_str() {
        EXECUTION_SUCCESS => ComfyUIMessage::ExecutionSuccess,
        EXECUTION_FAIL => ComfyUIMessage::ExecutionFail,
        EXECUTION_ERROR => ComfyUIMessage::ExecutionError(lenient(envelope.data)),
        EXECUTING => ComfyUIMessage::Executing(lenient(envelope.data)),
        EXECUTED => ComfyUIMessage::Executed,
        PROGRESS => ComfyUIMessage::Progress(lenient(envelope.data)),
        STATUS | EXECUTION_START | EXECUTION_CACHED => {
            ComfyUIMessage::Informational(envelope.kind)
        }
        _ => ComfyUIMessage::Unknown(envelope.kind),
    };

    Ok(message)
}

/// Deserialize a payload, falling back to the default on any mismatch.
fn lenient<T: serde::de::DeserializeOwned + Default>(data: serde_json::Value) -> T {
    serde_json::from_value(data).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_execution_success() {
        let json = r#"{"type":"execution_success","data":{"prompt_id":"abc","timestamp":1}}"#;
        let msg = parse_message(json).unwrap();
        assert_eq!(msg, ComfyUIMessage::ExecutionSuccess);
        assert_eq!(msg.signal(), Signal::Succeeded);
    }

    #[test]
    fn parse_execution_fail_without_data() {
        let msg = parse_message(r#"{"type":"execution_fail"}"#).unwrap();
        assert_eq!(msg.signal(), Signal::Failed);
    }

    #[test]
    fn parse_execution_error_message() {
        let json = r#"{"type":"execution_error","data":{"prompt_id":"abc","node_id":"5","exception_message":"out of memory","exception_type":"RuntimeError"}}"#;
        match parse_message(json).unwrap() {
            ComfyUIMessage::ExecutionError(data) => {
                assert_eq!(data.node_id.as_deref(), Some("5"));
                assert_eq!(data.exception_message.as_deref(), Some("out of memory"));
                assert_eq!(data.exception_type.as_deref(), Some("RuntimeError"));
            }
            other => panic!("Expected ExecutionError, got {other:?}"),
        }
    }

    #[test]
    fn execution_error_with_odd_payload_still_fails() {
        let msg = parse_message(r#"{"type":"execution_error","data":"boom"}"#).unwrap();
        assert_eq!(msg, ComfyUIMessage::ExecutionError(ErrorData::default()));
        assert_eq!(msg.signal(), Signal::Failed);
    }

    #[test]
    fn parse_executing_finished() {
        let json = r#"{"type":"executing","data":{"node":null,"prompt_id":"xyz"}}"#;
        match parse_message(json).unwrap() {
            ComfyUIMessage::Executing(data) => {
                assert!(data.node.is_none());
                assert_eq!(data.prompt_id.as_deref(), Some("xyz"));
            }
            other => panic!("Expected Executing, got {other:?}"),
        }
    }

    #[test]
    fn parse_progress_message() {
        let json = r#"{"type":"progress","data":{"value":5,"max":20}}"#;
        let msg = parse_message(json).unwrap();
        assert_eq!(msg, ComfyUIMessage::Progress(ProgressData { value: 5, max: 20 }));
        assert_eq!(msg.signal(), Signal::Informational);
    }

    #[test]
    fn status_is_informational() {
        let json = r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":3}}}}"#;
        assert_eq!(parse_message(json).unwrap().signal(), Signal::Informational);
    }

    #[test]
    fn unknown_type_is_tolerated() {
        let msg = parse_message(r#"{"type":"crystools.monitor","data":{}}"#).unwrap();
        assert_eq!(msg, ComfyUIMessage::Unknown("crystools.monitor".into()));
        assert_eq!(msg.signal(), Signal::Unrecognized);
    }

    #[test]
    fn missing_type_returns_error() {
        assert!(parse_message(r#"{"data":{}}"#).is_err());
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_message("not json at all").is_err());
    }
}
