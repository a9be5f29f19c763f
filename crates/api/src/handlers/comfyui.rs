//! Handlers for the ComfyUI image-generation endpoints.
//!
//! Prompts arrive as query parameters and are validated with the rules
//! in `aicenter_core::prompt` before anything is sent upstream.

use aicenter_comfyui::artifacts::Artifact;
use aicenter_comfyui::queue::{QueueSnapshot, MAX_CONCURRENT_TASKS};
use aicenter_comfyui::{JobId, TaskStatus};
use aicenter_core::error::CoreError;
use aicenter_core::prompt::{validate_prompt, validate_task_id};
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Query parameters for `generate` and `submit`.
#[derive(Debug, Deserialize)]
pub struct PromptQuery {
    pub prompt: Option<String>,
    /// Overall generation timeout; defaults to the configured value.
    pub timeout_secs: Option<u64>,
}

/// Result of a blocking generation.
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub task_id: JobId,
    /// URLs, or local paths when the server downloads artifacts.
    pub images: Vec<String>,
    pub artifacts: Vec<Artifact>,
}

/// Result of an asynchronous submission.
#[derive(Debug, Serialize)]
pub struct SubmitTaskResponse {
    pub task_id: JobId,
    pub status: &'static str,
    pub queue_position: usize,
    pub estimated_time_secs: u64,
    pub task_type: &'static str,
    pub submitted_at: DateTime<Utc>,
}

/// Status of one task.
#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: JobId,
    pub status: &'static str,
    pub finished: bool,
    pub progress: u8,
    pub images: Vec<String>,
    pub error: Option<String>,
}

impl TaskStatusResponse {
    fn new(task_id: JobId, status: TaskStatus) -> Self {
        let (images, error) = match &status {
            TaskStatus::Completed { images } => (images.clone(), None),
            TaskStatus::Failed { reason } => (Vec::new(), Some(reason.to_string())),
            TaskStatus::Pending | TaskStatus::Running { .. } => (Vec::new(), None),
        };
        Self {
            task_id,
            status: status.label(),
            finished: status.is_terminal(),
            progress: status.progress(),
            images,
            error,
        }
    }
}

/// Queue snapshot with service-level summary fields.
#[derive(Debug, Serialize)]
pub struct QueueStatusResponse {
    #[serde(flatten)]
    pub queue: QueueSnapshot,
    /// `busy` when anything is running or pending, else `idle`.
    pub system_status: &'static str,
    pub max_concurrent_tasks: u32,
}

impl From<QueueSnapshot> for QueueStatusResponse {
    fn from(queue: QueueSnapshot) -> Self {
        Self {
            system_status: if queue.busy { "busy" } else { "idle" },
            max_concurrent_tasks: MAX_CONCURRENT_TASKS,
            queue,
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /comfyui/generate?prompt=...
///
/// Submit a prompt and wait for its artifacts.
pub async fn generate(
    State(state): State<AppState>,
    Query(params): Query<PromptQuery>,
) -> AppResult<Json<DataResponse<GenerateResponse>>> {
    let prompt = required_prompt(params.prompt)?;
    let timeout_secs = params
        .timeout_secs
        .unwrap_or(state.generator.config().default_timeout_secs);

    tracing::info!(timeout_secs, prompt_len = prompt.chars().count(), "Generation requested");

    let cancel = state.shutdown.child_token();
    let output = state
        .generator
        .generate(&prompt, timeout_secs, &cancel)
        .await?;

    Ok(Json(DataResponse {
        data: GenerateResponse {
            task_id: output.prompt_id,
            images: output.artifacts.iter().map(Artifact::reference).collect(),
            artifacts: output.artifacts,
        },
    }))
}

/// POST /comfyui/submit?prompt=...
///
/// Submit a prompt without waiting for it to run.
pub async fn submit(
    State(state): State<AppState>,
    Query(params): Query<PromptQuery>,
) -> AppResult<Json<DataResponse<SubmitTaskResponse>>> {
    let prompt = required_prompt(params.prompt)?;
    let task = state.generator.submit_async(&prompt).await?;

    Ok(Json(DataResponse {
        data: SubmitTaskResponse {
            task_id: task.task_id,
            status: "submitted",
            queue_position: task.queue_position,
            estimated_time_secs: task.estimated_time_secs,
            task_type: task.task_type,
            submitted_at: task.submitted_at,
        },
    }))
}

/// GET /comfyui/status/{task_id}
pub async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<Json<DataResponse<TaskStatusResponse>>> {
    validate_task_id(&task_id)?;
    let task_id = JobId::parse(task_id)
        .ok_or_else(|| CoreError::Validation("task id must not be blank".to_string()))?;

    let status = state.generator.status(&task_id).await;
    Ok(Json(DataResponse {
        data: TaskStatusResponse::new(task_id, status),
    }))
}

/// GET /comfyui/queue
pub async fn queue_status(
    State(state): State<AppState>,
) -> Json<DataResponse<QueueStatusResponse>> {
    let queue = state.generator.queue().await;
    Json(DataResponse { data: queue.into() })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn required_prompt(prompt: Option<String>) -> Result<String, CoreError> {
    let prompt = prompt.ok_or_else(|| CoreError::Validation("prompt is required".to_string()))?;
    validate_prompt(&prompt)?;
    Ok(prompt)
}
