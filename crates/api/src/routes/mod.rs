pub mod comfyui;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /comfyui/generate?prompt=...          blocking generation (GET)
/// /comfyui/submit?prompt=...            asynchronous submission (POST)
/// /comfyui/status/{task_id}             task status (GET)
/// /comfyui/queue                        queue snapshot (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/comfyui", comfyui::router())
}
