//! ComfyUI REST client and generation orchestration.
//!
//! Provides typed wire messages, an HTTP API wrapper, workflow template
//! loading, task status resolution, queue inspection and artifact
//! retrieval, tied together by [`generator::ImageGenerator`].

pub mod api;
pub mod artifacts;
pub mod config;
pub mod generator;
pub mod job;
pub mod messages;
pub mod queue;
pub mod status;
pub mod submit;
pub mod workflow;

pub use config::ComfyUIConfig;
pub use generator::{GenerationError, GenerationOutput, ImageGenerator, SubmittedTask};
pub use job::JobId;
pub use status::{FailureReason, TaskStatus};
