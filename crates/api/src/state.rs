use std::sync::Arc;

use aicenter_comfyui::generator::ImageGenerator;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: every field is behind an `Arc` or is a handle.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// ComfyUI generation orchestrator.
    pub generator: Arc<ImageGenerator>,
    /// Cancelled when the server starts shutting down. Long-running
    /// handlers wait on a child token.
    pub shutdown: CancellationToken,
}
