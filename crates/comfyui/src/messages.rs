//! ComfyUI REST payload types.
//!
//! Typed views of the JSON bodies returned by `/prompt`, `/queue` and
//! `/history/{prompt_id}`. Every field that ComfyUI may omit is
//! defaulted so that partially filled responses still deserialize; the
//! callers decide what a missing value means.

use serde::Deserialize;

/// Response returned by the ComfyUI `/prompt` endpoint after queuing a
/// workflow.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    #[serde(default)]
    pub prompt_id: Option<String>,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: Option<i64>,
}

// ---------------------------------------------------------------------------
// /queue
// ---------------------------------------------------------------------------

/// Body of `GET /queue`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueResponse {
    #[serde(default)]
    pub queue_running: Option<QueueList>,
    #[serde(default)]
    pub queue_pending: Option<QueueList>,
}

/// One side (running or pending) of the queue.
///
/// Gateways in front of ComfyUI expose `{"tasks": [...]}` objects while
/// a bare ComfyUI server returns an array of positional tuples
/// `[number, prompt_id, prompt, extra_data, outputs_to_execute]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum QueueList {
    Tasks {
        #[serde(default)]
        tasks: Vec<QueueTask>,
    },
    Native(Vec<Vec<serde_json::Value>>),
}

/// A task in the object form of the queue.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueTask {
    #[serde(default)]
    pub prompt_id: Option<String>,
    /// Submission time in epoch milliseconds.
    #[serde(default)]
    pub timestamp: i64,
}

impl QueueList {
    /// Flatten either wire form into `(prompt_id, submit_time_ms)` pairs,
    /// dropping entries without an identifier.
    pub fn into_entries(self) -> Vec<(String, i64)> {
        match self {
            Self::Tasks { tasks } => tasks
                .into_iter()
                .filter_map(|t| t.prompt_id.map(|id| (id, t.timestamp)))
                .collect(),
            Self::Native(items) => items
                .into_iter()
                .filter_map(|item| {
                    let id = item.get(1)?.as_str()?.to_string();
                    let submitted = item
                        .get(3)
                        .and_then(|extra| extra.get("create_time"))
                        .and_then(serde_json::Value::as_i64)
                        .unwrap_or(0);
                    Some((id, submitted))
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// /history
// ---------------------------------------------------------------------------

/// A single entry of the `/history/{prompt_id}` mapping.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    /// Outputs keyed by node id, in the order ComfyUI wrote them.
    #[serde(default)]
    pub outputs: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub status: Option<HistoryStatus>,
}

/// Execution status recorded alongside a history entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
    /// Execution log as `[event_name, payload]` pairs.
    #[serde(default)]
    pub messages: Vec<(String, serde_json::Value)>,
}

/// The output of one node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

/// Reference to a file written by an output node.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl HistoryStatus {
    /// Whether ComfyUI recorded the execution as failed.
    pub fn is_error(&self) -> bool {
        self.status_str.as_deref() == Some("error")
    }

    /// The `exception_message` of the first `execution_error` event, if any.
    pub fn error_message(&self) -> Option<String> {
        self.messages
            .iter()
            .find(|(kind, _)| kind == "execution_error")
            .and_then(|(_, payload)| payload.get("exception_message"))
            .and_then(serde_json::Value::as_str)
            .map(|s| s.trim().to_string())
    }
}
