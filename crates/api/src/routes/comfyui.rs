use axum::routing::{get, post};
use axum::Router;

use crate::handlers::comfyui;
use crate::state::AppState;

/// Mount the ComfyUI generation routes (nested under `/comfyui`).
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/generate", get(comfyui::generate))
        .route("/submit", post(comfyui::submit))
        .route("/status/{task_id}", get(comfyui::task_status))
        .route("/queue", get(comfyui::queue_status))
}
