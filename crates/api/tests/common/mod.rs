//! Shared helpers for the API integration tests.
//!
//! Each test gets a fake ComfyUI server on an ephemeral loopback port and
//! a workflow template in a temporary directory, then drives the real
//! router through `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aicenter_api::config::ServerConfig;
use aicenter_api::router::build_app_router;
use aicenter_api::state::AppState;
use aicenter_comfyui::config::ComfyUIConfig;
use aicenter_comfyui::generator::ImageGenerator;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing;
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Identifier the fake server assigns to every submission.
pub const TASK_ID: &str = "task-1";

const TEMPLATE: &str = r#"{
  "3": {"class_type": "KSampler", "inputs": {"seed": "{seed}", "steps": 20}},
  "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "{prompt}"}}
}"#;

// ---------------------------------------------------------------------------
// Fake ComfyUI
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeState {
    submit_fails: AtomicBool,
    queue_fails: AtomicBool,
    queue: Mutex<Value>,
    history: Mutex<HashMap<String, Value>>,
}

/// Handle to the fake ComfyUI server backing a [`TestContext`].
#[derive(Clone)]
pub struct FakeComfy {
    state: Arc<FakeState>,
    pub base_url: String,
}

impl FakeComfy {
    async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        *state.queue.lock().unwrap() = json!({"queue_running": [], "queue_pending": []});

        let app = Router::new()
            .route("/prompt", routing::post(submit_prompt))
            .route("/queue", routing::get(read_queue).post(|| async { StatusCode::OK }))
            .route("/history/{id}", routing::get(read_history))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            base_url: format!("http://{addr}"),
        }
    }

    pub fn fail_submissions(&self) {
        self.state.submit_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_queue(&self) {
        self.state.queue_fails.store(true, Ordering::SeqCst);
    }

    pub fn set_queued(&self, running: &[&str], pending: &[&str]) {
        let tasks = |ids: &[&str]| -> Vec<Value> {
            ids.iter()
                .map(|id| json!({"prompt_id": id, "timestamp": 1_700_000_000_000i64}))
                .collect()
        };
        *self.state.queue.lock().unwrap() = json!({
            "queue_running": {"tasks": tasks(running)},
            "queue_pending": {"tasks": tasks(pending)},
        });
    }

    pub fn set_history(&self, id: &str, entry: Value) {
        self.state
            .history
            .lock()
            .unwrap()
            .insert(id.to_string(), entry);
    }

    pub fn complete_with(&self, id: &str, images: &[&str]) {
        let images: Vec<Value> = images
            .iter()
            .map(|name| json!({"filename": name, "subfolder": "", "type": "output"}))
            .collect();
        self.set_history(id, json!({"outputs": {"9": {"images": images}}}));
    }
}

async fn submit_prompt(State(state): State<Arc<FakeState>>) -> Response {
    if state.submit_fails.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "out of memory").into_response();
    }
    Json(json!({"prompt_id": TASK_ID, "number": 1})).into_response()
}

async fn read_queue(State(state): State<Arc<FakeState>>) -> Response {
    if state.queue_fails.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(state.queue.lock().unwrap().clone()).into_response()
}

async fn read_history(State(state): State<Arc<FakeState>>, Path(id): Path<String>) -> Json<Value> {
    let mut body = serde_json::Map::new();
    if let Some(entry) = state.history.lock().unwrap().get(&id) {
        body.insert(id, entry.clone());
    }
    Json(Value::Object(body))
}

// ---------------------------------------------------------------------------
// Application under test
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
    }
}

/// A fake ComfyUI plus everything needed to build the router against it.
pub struct TestContext {
    pub fake: FakeComfy,
    pub shutdown: CancellationToken,
    generator: Arc<ImageGenerator>,
    _workflow_dir: TempDir,
}

impl TestContext {
    pub async fn start() -> Self {
        let fake = FakeComfy::start().await;
        let dir = tempfile::tempdir().unwrap();
        let workflow_path = dir.path().join("image.json");
        std::fs::write(&workflow_path, TEMPLATE).unwrap();

        let mut config = ComfyUIConfig::new(fake.base_url.clone()).unwrap();
        config.workflow_path = workflow_path;
        config.request_timeout = Duration::from_secs(5);
        config.poll_interval = Duration::from_millis(50);
        config.not_found_grace = Duration::ZERO;

        Self {
            fake,
            shutdown: CancellationToken::new(),
            generator: Arc::new(ImageGenerator::new(config).unwrap()),
            _workflow_dir: dir,
        }
    }

    /// Build the full application router, mirroring `main.rs`.
    pub fn app(&self) -> Router {
        let config = test_config();
        let state = AppState {
            config: Arc::new(config.clone()),
            generator: Arc::clone(&self.generator),
            shutdown: self.shutdown.clone(),
        };
        build_app_router(state, &config)
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(app: Router, method: Method, uri: &str) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response {
    send(app, Method::GET, uri).await
}

pub async fn post(app: Router, uri: &str) -> Response {
    send(app, Method::POST, uri).await
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
