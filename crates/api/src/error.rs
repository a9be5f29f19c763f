use aicenter_comfyui::generator::GenerationError;
use aicenter_comfyui::submit::SubmissionError;
use aicenter_core::error::CoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for validation errors and the ComfyUI crate's
/// errors for everything that happens after a request is accepted.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `aicenter_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A blocking generation did not produce artifacts.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// An asynchronous submission was not accepted.
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(CoreError::Validation(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }

            // --- Generation and submission errors ---
            AppError::Generation(err) => classify_generation_error(err),
            AppError::Submission(err) => classify_submission_error(err),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Log the real cause and return a sanitized 500.
fn internal(detail: &str) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %detail, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

/// Classify a generation error into an HTTP status, error code, and message.
///
/// - An out-of-range timeout is the caller's fault (400).
/// - Submission problems follow [`classify_submission_error`].
/// - Timeouts map to 504, cancellation (server shutdown) to 503.
/// - A task that ran but produced nothing maps to 422.
fn classify_generation_error(err: &GenerationError) -> (StatusCode, &'static str, String) {
    match err {
        GenerationError::InvalidTimeout(e) => {
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
        }
        GenerationError::Submission(e) => classify_submission_error(e),
        GenerationError::Timeout { .. } => (
            StatusCode::GATEWAY_TIMEOUT,
            "GENERATION_TIMEOUT",
            err.to_string(),
        ),
        GenerationError::Cancelled { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "CANCELLED",
            err.to_string(),
        ),
        GenerationError::TaskFailed { .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "TASK_FAILED",
            err.to_string(),
        ),
        GenerationError::Download(e) => internal(&e.to_string()),
    }
}

/// Template problems are a server misconfiguration (500); anything the
/// ComfyUI service did wrong is an upstream failure (502). Upstream
/// bodies are logged, not echoed.
fn classify_submission_error(err: &SubmissionError) -> (StatusCode, &'static str, String) {
    match err {
        SubmissionError::Template(e) => internal(&e.to_string()),
        SubmissionError::Api(_) | SubmissionError::MissingPromptId => {
            tracing::error!(error = %err, "ComfyUI submission failed");
            (
                StatusCode::BAD_GATEWAY,
                "UPSTREAM_ERROR",
                "Failed to submit workflow to ComfyUI".to_string(),
            )
        }
    }
}
