//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. This module deserializes them
//! into a strongly-typed [`ComfyMessage`] enum. Only `executing` and
//! `execution_error` drive the job outcome; the remaining variants are
//! decoded so the monitor can log and skip them deliberately.

use serde::Deserialize;

/// All known ComfyUI WebSocket message types.
///
/// Deserialized via the internally-tagged `"type"` field with
/// associated `"data"` content.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ComfyMessage {
    /// Server status broadcast (queue depth, etc.).
    #[serde(rename = "status")]
    Status(StatusData),

    /// A prompt has started executing.
    #[serde(rename = "execution_start")]
    ExecutionStart(ExecutionStartData),

    /// Some nodes were skipped because their outputs are cached.
    #[serde(rename = "execution_cached")]
    ExecutionCached(ExecutionCachedData),

    /// A node is currently executing, or -- when `node` is absent --
    /// the whole prompt has finished.
    #[serde(rename = "executing")]
    Executing(ExecutingData),

    /// Step-level progress from a long-running node.
    #[serde(rename = "progress")]
    Progress(ProgressData),

    /// A node has finished and produced output.
    #[serde(rename = "executed")]
    Executed(ExecutedData),

    /// Execution failed at a specific node.
    #[serde(rename = "execution_error")]
    ExecutionError(ExecErrorData),
}

/// Queue status information.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

/// Current queue state.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

/// Execution queue statistics.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// Payload for `execution_start` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStartData {
    pub prompt_id: String,
}

/// Payload for `execution_cached` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    /// Node IDs whose outputs were served from cache.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Payload for `executing` messages.
///
/// A `null` or absent `node` means execution of the whole prompt has
/// completed, not that a single node finished.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    #[serde(default)]
    pub node: Option<String>,
    pub prompt_id: String,
}

/// Payload for `progress` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: i32,
    /// Total number of steps.
    pub max: i32,
}

/// Payload for `executed` messages (per-node output).
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    pub node: String,
    /// Raw output value (images, filenames, etc.).
    pub output: serde_json::Value,
    pub prompt_id: String,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecErrorData {
    pub prompt_id: String,
    pub node_id: String,
    /// Class type of the failing node (e.g. `KSampler`).
    #[serde(default)]
    pub node_type: String,
    pub exception_message: String,
}

impl ExecErrorData {
    /// Render the error entry recorded in the job result.
    pub fn describe(&self) -> String {
        format!(
            "Node {} ({}): {}",
            self.node_id, self.node_type, self.exception_message
        )
    }
}

/// Parse a ComfyUI WebSocket text frame into a typed message.
///
/// Returns `Err` for malformed JSON or unknown `type` values. Callers
/// treat both as ignorable and keep listening.
pub fn parse_message(text: &str) -> Result<ComfyMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parse_executing_with_node() {
        let json = r#"{"type":"executing","data":{"node":"42","prompt_id":"xyz"}}"#;
        let msg = parse_message(json).unwrap();
        assert_matches!(msg, ComfyMessage::Executing(data) => {
            assert_eq!(data.node.as_deref(), Some("42"));
            assert_eq!(data.prompt_id, "xyz");
        });
    }

    #[test]
    fn parse_executing_with_null_node() {
        let json = r#"{"type":"executing","data":{"node":null,"prompt_id":"xyz"}}"#;
        let msg = parse_message(json).unwrap();
        assert_matches!(msg, ComfyMessage::Executing(data) => {
            assert!(data.node.is_none());
        });
    }

    #[test]
    fn parse_executing_with_absent_node() {
        let json = r#"{"type":"executing","data":{"prompt_id":"xyz"}}"#;
        let msg = parse_message(json).unwrap();
        assert_matches!(msg, ComfyMessage::Executing(data) => {
            assert!(data.node.is_none());
        });
    }

    #[test]
    fn parse_execution_error() {
        let json = r#"{"type":"execution_error","data":{"prompt_id":"P1","node_id":"3","node_type":"KSampler","exception_message":"OOM"}}"#;
        let msg = parse_message(json).unwrap();
        assert_matches!(msg, ComfyMessage::ExecutionError(data) => {
            assert_eq!(data.describe(), "Node 3 (KSampler): OOM");
        });
    }

    #[test]
    fn parse_execution_error_without_node_type() {
        let json = r#"{"type":"execution_error","data":{"prompt_id":"P1","node_id":"3","exception_message":"boom"}}"#;
        let msg = parse_message(json).unwrap();
        assert_matches!(msg, ComfyMessage::ExecutionError(data) => {
            assert_eq!(data.node_type, "");
        });
    }

    #[test]
    fn parse_status_message() {
        let json = r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":3}}}}"#;
        let msg = parse_message(json).unwrap();
        assert_matches!(msg, ComfyMessage::Status(data) => {
            assert_eq!(data.status.exec_info.queue_remaining, 3);
        });
    }

    #[test]
    fn parse_progress_message() {
        let json = r#"{"type":"progress","data":{"value":5,"max":20}}"#;
        let msg = parse_message(json).unwrap();
        assert_matches!(msg, ComfyMessage::Progress(data) => {
            assert_eq!((data.value, data.max), (5, 20));
        });
    }

    #[test]
    fn parse_executed_message() {
        let json = r#"{"type":"executed","data":{"node":"9","output":{"images":[{"filename":"out.png"}]},"prompt_id":"abc"}}"#;
        let msg = parse_message(json).unwrap();
        assert_matches!(msg, ComfyMessage::Executed(data) => {
            assert_eq!(data.node, "9");
            assert!(data.output.is_object());
        });
    }

    #[test]
    fn parse_execution_cached_without_nodes() {
        let json = r#"{"type":"execution_cached","data":{"prompt_id":"abc"}}"#;
        let msg = parse_message(json).unwrap();
        assert_matches!(msg, ComfyMessage::ExecutionCached(data) => {
            assert!(data.nodes.is_empty());
        });
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(parse_message(r#"{"type":"crystools.monitor","data":{}}"#).is_err());
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(parse_message("not json at all").is_err());
    }
}
