//! Queue snapshots.
//!
//! The queue is only a secondary signal for task status, so reading it
//! never fails: any transport or decoding problem degrades to
//! [`QueueSnapshot::empty`].

use serde::Serialize;

use crate::api::ComfyUIApi;
use crate::messages::{QueueList, QueueResponse};

/// ComfyUI executes one prompt at a time. Reported, never enforced.
pub const MAX_CONCURRENT_TASKS: u32 = 1;

/// State tag of a queue entry. The queue view carries no finer detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryStatus {
    Queued,
}

/// One prompt waiting in or being executed from the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub prompt_id: String,
    /// Submission time in epoch milliseconds (0 when unknown).
    pub submit_time_ms: i64,
    pub status: QueueEntryStatus,
}

/// Point-in-time view of the ComfyUI queue. Rebuilt on every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub running: Vec<QueueEntry>,
    pub pending: Vec<QueueEntry>,
    pub total_count: usize,
    pub busy: bool,
}

impl QueueSnapshot {
    /// The snapshot reported when the queue cannot be read.
    pub fn empty() -> Self {
        Self {
            running: Vec::new(),
            pending: Vec::new(),
            total_count: 0,
            busy: false,
        }
    }

    /// Normalize a `/queue` response.
    pub fn from_response(response: QueueResponse) -> Self {
        let running = to_entries(response.queue_running);
        let pending = to_entries(response.queue_pending);
        let total_count = running.len() + pending.len();
        Self {
            running,
            pending,
            total_count,
            busy: total_count > 0,
        }
    }

    pub fn is_running(&self, prompt_id: &str) -> bool {
        self.running.iter().any(|e| e.prompt_id == prompt_id)
    }

    pub fn is_pending(&self, prompt_id: &str) -> bool {
        self.pending.iter().any(|e| e.prompt_id == prompt_id)
    }
}

fn to_entries(list: Option<QueueList>) -> Vec<QueueEntry> {
    list.map(QueueList::into_entries)
        .unwrap_or_default()
        .into_iter()
        .map(|(prompt_id, submit_time_ms)| QueueEntry {
            prompt_id,
            submit_time_ms,
            status: QueueEntryStatus::Queued,
        })
        .collect()
}

/// Read the current queue, degrading to an empty snapshot on failure.
pub async fn read_queue(api: &ComfyUIApi) -> QueueSnapshot {
    match api.get_queue().await {
        Ok(response) => QueueSnapshot::from_response(response),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read ComfyUI queue, reporting it as empty");
            QueueSnapshot::empty()
        }
    }
}
