//! Task status resolution.
//!
//! A task's status is never stored: every call re-derives it from the
//! history entry for the prompt and, when there is none yet, from the
//! live queue.
//!
//! ```text
//! history lookup fails ............................ Running(0)
//! history has entry, status_str == "error" ........ Failed(ExecutionError)
//! history has entry with output images ............ Completed(images)
//! history has entry without output images ......... Failed(NoArtifacts)
//! no entry, prompt in queue_running ............... Running(50)
//! no entry, prompt in queue_pending ............... Running(0)
//! no entry, not queued ............................ Failed(NotFound)
//! ```

use std::fmt;

use serde::{Serialize, Serializer};

use crate::api::ComfyUIApi;
use crate::job::JobId;
use crate::messages::{HistoryEntry, NodeOutput};
use crate::queue::{read_queue, QueueSnapshot};

/// Progress reported for a prompt waiting in the queue.
pub const PROGRESS_QUEUED: u8 = 0;

/// Progress reported for the prompt currently executing. ComfyUI's REST
/// API does not expose real progress, so this is a fixed midpoint.
pub const PROGRESS_EXECUTING: u8 = 50;

/// Progress reported for a completed prompt.
pub const PROGRESS_DONE: u8 = 100;

/// Derived status of a submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Submitted but not observable yet.
    Pending,
    /// Queued or executing; `progress` is a coarse percentage.
    Running { progress: u8 },
    /// Finished with at least one output file.
    Completed { images: Vec<String> },
    /// Finished without usable output, or unknown to the service.
    Failed { reason: FailureReason },
}

impl TaskStatus {
    /// Whether polling can stop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    pub fn progress(&self) -> u8 {
        match self {
            Self::Pending => PROGRESS_QUEUED,
            Self::Running { progress } => *progress,
            Self::Completed { .. } => PROGRESS_DONE,
            Self::Failed { .. } => 0,
        }
    }

    /// Short state label (`pending`, `running`, `completed`, `failed`).
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running { .. } => "running",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Why a task ended without artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Neither history nor the queue knows the prompt.
    NotFound,
    /// The prompt finished but no output node wrote an image.
    NoArtifacts,
    /// ComfyUI recorded an execution error.
    ExecutionError(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("task not found"),
            Self::NoArtifacts => f.write_str("completed but produced no artifacts"),
            Self::ExecutionError(msg) => write!(f, "execution failed: {msg}"),
        }
    }
}

impl Serialize for FailureReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Resolve the current status of `prompt_id`.
///
/// Transport failures on the history lookup are reported as
/// `Running(0)` rather than surfaced, so a flaky network never ends a
/// poll loop early.
pub async fn resolve(api: &ComfyUIApi, prompt_id: &JobId) -> TaskStatus {
    let history = match api.get_history(prompt_id.as_str()).await {
        Ok(history) => history,
        Err(e) => {
            tracing::warn!(
                prompt_id = %prompt_id,
                error = %e,
                "History lookup failed, treating task as still running",
            );
            return TaskStatus::Running {
                progress: PROGRESS_QUEUED,
            };
        }
    };

    match history.get(prompt_id.as_str()) {
        Some(entry) => status_from_history(prompt_id, entry),
        None => {
            let queue = read_queue(api).await;
            status_from_queue(&queue, prompt_id)
        }
    }
}

/// Interpret a history entry. History entries are terminal.
pub fn status_from_history(prompt_id: &JobId, entry: &serde_json::Value) -> TaskStatus {
    let entry = match serde_json::from_value::<HistoryEntry>(entry.clone()) {
        Ok(entry) => entry,
        Err(e) => {
            tracing::warn!(prompt_id = %prompt_id, error = %e, "Unrecognised history entry shape");
            HistoryEntry::default()
        }
    };

    if let Some(status) = entry.status.as_ref().filter(|s| s.is_error()) {
        let message = status
            .error_message()
            .unwrap_or_else(|| "unknown error".to_string());
        return TaskStatus::Failed {
            reason: FailureReason::ExecutionError(message),
        };
    }

    let images = output_images(prompt_id, &entry);
    if images.is_empty() {
        return TaskStatus::Failed {
            reason: FailureReason::NoArtifacts,
        };
    }
    TaskStatus::Completed { images }
}

/// Interpret the queue for a prompt without a history entry.
pub fn status_from_queue(queue: &QueueSnapshot, prompt_id: &JobId) -> TaskStatus {
    if queue.is_running(prompt_id.as_str()) {
        TaskStatus::Running {
            progress: PROGRESS_EXECUTING,
        }
    } else if queue.is_pending(prompt_id.as_str()) {
        TaskStatus::Running {
            progress: PROGRESS_QUEUED,
        }
    } else {
        TaskStatus::Failed {
            reason: FailureReason::NotFound,
        }
    }
}

/// Every output image filename, node by node in history order.
fn output_images(prompt_id: &JobId, entry: &HistoryEntry) -> Vec<String> {
    let mut images = Vec::new();
    for (node_id, output) in &entry.outputs {
        match serde_json::from_value::<NodeOutput>(output.clone()) {
            Ok(node) => images.extend(node.images.into_iter().map(|img| img.filename)),
            Err(e) => tracing::warn!(
                prompt_id = %prompt_id,
                node_id = %node_id,
                error = %e,
                "Skipping unreadable node output",
            ),
        }
    }
    images
}
