//! In-process stand-in for a ComfyUI server.
//!
//! Serves the REST endpoints the client uses from mutable in-memory
//! state, bound to an ephemeral port on loopback. Tests drive the
//! server's answers through [`FakeComfy`] and inspect what it received.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{json, Value};

use aicenter_comfyui::config::ComfyUIConfig;
use aicenter_comfyui::generator::ImageGenerator;

#[derive(Default)]
struct Inner {
    prompt_id: Mutex<Option<String>>,
    submit_fails: AtomicBool,
    queue_fails: AtomicBool,
    history_fails: AtomicBool,
    queue: Mutex<Value>,
    history: Mutex<HashMap<String, Value>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    truncated: Mutex<HashSet<String>>,
    history_delay_ms: AtomicU64,
    submissions: Mutex<Vec<Value>>,
    deleted: Mutex<Vec<String>>,
    history_polls: AtomicUsize,
}

/// Handle to a running fake ComfyUI server.
#[derive(Clone)]
pub struct FakeComfy {
    inner: Arc<Inner>,
    base_url: String,
}

impl FakeComfy {
    /// Start the server. It answers `/prompt` with `prompt_id` "p1" and
    /// reports an empty queue until told otherwise.
    pub async fn start() -> Self {
        let inner = Arc::new(Inner::default());
        *inner.prompt_id.lock().unwrap() = Some("p1".to_string());
        *inner.queue.lock().unwrap() = json!({"queue_running": [], "queue_pending": []});

        let app = Router::new()
            .route("/prompt", post(submit_prompt))
            .route("/queue", get(read_queue).post(delete_from_queue))
            .route("/history/{id}", get(read_history))
            .route("/view", get(view_file))
            .with_state(Arc::clone(&inner));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            inner,
            base_url: format!("http://{addr}"),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Set the `prompt_id` returned by `/prompt` (`None` omits the field).
    pub fn set_prompt_id(&self, id: Option<&str>) {
        *self.inner.prompt_id.lock().unwrap() = id.map(str::to_string);
    }

    pub fn fail_submissions(&self) {
        self.inner.submit_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_queue(&self) {
        self.inner.queue_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_history(&self) {
        self.inner.history_fails.store(true, Ordering::SeqCst);
    }

    /// Replace the `/queue` body.
    pub fn set_queue(&self, queue: Value) {
        *self.inner.queue.lock().unwrap() = queue;
    }

    /// Put `id` in the running slot with `pending` ids behind it.
    pub fn set_queued(&self, running: &[&str], pending: &[&str]) {
        let tasks = |ids: &[&str]| -> Vec<Value> {
            ids.iter()
                .enumerate()
                .map(|(i, id)| json!({"prompt_id": id, "timestamp": 1_700_000_000_000i64 + i as i64}))
                .collect()
        };
        self.set_queue(json!({
            "queue_running": {"tasks": tasks(running)},
            "queue_pending": {"tasks": tasks(pending)},
        }));
    }

    /// Record a history entry for `id`.
    pub fn set_history(&self, id: &str, entry: Value) {
        self.inner
            .history
            .lock()
            .unwrap()
            .insert(id.to_string(), entry);
    }

    /// Record a completed history entry producing `images`.
    pub fn complete_with(&self, id: &str, images: &[&str]) {
        let images: Vec<Value> = images
            .iter()
            .map(|name| json!({"filename": name, "subfolder": "", "type": "output"}))
            .collect();
        self.set_history(
            id,
            json!({
                "outputs": {"9": {"images": images}},
                "status": {"status_str": "success", "completed": true, "messages": []}
            }),
        );
    }

    /// Serve `bytes` from `/view?filename=<name>`.
    pub fn add_file(&self, name: &str, bytes: &[u8]) {
        self.inner
            .files
            .lock()
            .unwrap()
            .insert(name.to_string(), bytes.to_vec());
    }

    /// Serve `name` with a body that breaks off after a few bytes.
    pub fn add_truncated_file(&self, name: &str) {
        self.inner
            .truncated
            .lock()
            .unwrap()
            .insert(name.to_string());
    }

    /// Hold every `/history` answer back by `delay`.
    pub fn delay_history(&self, delay: Duration) {
        self.inner
            .history_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> Vec<Value> {
        self.inner.submissions.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.inner.deleted.lock().unwrap().clone()
    }

    pub fn history_polls(&self) -> usize {
        self.inner.history_polls.load(Ordering::SeqCst)
    }
}

type Shared = State<Arc<Inner>>;

fn server_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
}

async fn submit_prompt(State(inner): Shared, Json(body): Json<Value>) -> Response {
    inner.submissions.lock().unwrap().push(body);
    if inner.submit_fails.load(Ordering::SeqCst) {
        return server_error();
    }
    let number = inner.submissions.lock().unwrap().len();
    match inner.prompt_id.lock().unwrap().clone() {
        Some(id) => Json(json!({"prompt_id": id, "number": number, "node_errors": {}})).into_response(),
        None => Json(json!({"number": number})).into_response(),
    }
}

async fn read_queue(State(inner): Shared) -> Response {
    if inner.queue_fails.load(Ordering::SeqCst) {
        return server_error();
    }
    Json(inner.queue.lock().unwrap().clone()).into_response()
}

async fn delete_from_queue(State(inner): Shared, Json(body): Json<Value>) -> StatusCode {
    if let Some(ids) = body["delete"].as_array() {
        let mut deleted = inner.deleted.lock().unwrap();
        deleted.extend(ids.iter().filter_map(Value::as_str).map(str::to_string));
    }
    StatusCode::OK
}

async fn read_history(State(inner): Shared, UrlPath(id): UrlPath<String>) -> Response {
    inner.history_polls.fetch_add(1, Ordering::SeqCst);
    let delay = inner.history_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if inner.history_fails.load(Ordering::SeqCst) {
        return server_error();
    }
    let mut body = serde_json::Map::new();
    if let Some(entry) = inner.history.lock().unwrap().get(&id) {
        body.insert(id, entry.clone());
    }
    Json(Value::Object(body)).into_response()
}

async fn view_file(State(inner): Shared, Query(params): Query<HashMap<String, String>>) -> Response {
    if params.get("type").map(String::as_str) != Some("output") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let name = params.get("filename").cloned().unwrap_or_default();
    if inner.truncated.lock().unwrap().contains(&name) {
        return truncated_body();
    }
    match inner.files.lock().unwrap().get(&name) {
        Some(bytes) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Announces a megabyte, sends a few bytes, then drops the connection.
fn truncated_body() -> Response {
    let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
        Ok(Bytes::from_static(b"partial image data")),
        Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection dropped",
        )),
    ];
    let stream = futures::stream::iter(chunks).then(|chunk| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        chunk
    });
    Response::builder()
        .header(header::CONTENT_LENGTH, "1048576")
        .body(Body::from_stream(stream))
        .unwrap()
}

// ---------------------------------------------------------------------------
// Generator helpers
// ---------------------------------------------------------------------------

/// A small but realistic API-format workflow.
pub const TEMPLATE: &str = r#"{
  "3": {
    "class_type": "KSampler",
    "inputs": {"seed": "{seed}", "steps": 20, "cfg": 7.5, "model": ["4", 0], "positive": ["6", 0]}
  },
  "4": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "sd_xl_base_1.0.safetensors"}},
  "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "{prompt}", "clip": ["4", 1]}},
  "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": "aicenter_{seed}", "images": ["8", 0]}}
}"#;

/// Write `contents` as the workflow template inside `dir`.
pub fn write_template(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("image.json");
    std::fs::write(&path, contents).unwrap();
    path
}

/// Configuration pointed at `fake` with fast polling.
pub fn test_config(fake: &FakeComfy, workflow_path: PathBuf) -> ComfyUIConfig {
    let mut config = ComfyUIConfig::new(fake.base_url()).unwrap();
    config.workflow_path = workflow_path;
    config.request_timeout = Duration::from_secs(5);
    config.poll_interval = Duration::from_millis(50);
    config.not_found_grace = Duration::ZERO;
    config
}

pub fn generator(config: ComfyUIConfig) -> ImageGenerator {
    ImageGenerator::new(config).unwrap()
}
