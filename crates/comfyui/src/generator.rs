//! End-to-end image generation against a ComfyUI instance.
//!
//! [`ImageGenerator`] ties the pieces together: it loads and submits the
//! workflow template, polls the task status until it is terminal, and
//! delivers the resulting artifacts. It holds no mutable state, so one
//! instance can be shared (behind an `Arc`) by any number of concurrent
//! callers.
//!
//! Waiting is cooperative: between polls the loop sleeps on a timer that
//! races the caller's [`CancellationToken`], so cancellation is observed
//! within one scheduler tick and no further polls are issued.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;
use crate::artifacts::{self, Artifact};
use crate::config::{validate_generation_timeout, ComfyUIConfig, ConfigError};
use crate::job::JobId;
use crate::queue::{read_queue, QueueSnapshot};
use crate::status::{resolve, FailureReason, TaskStatus};
use crate::submit::{submit, SubmissionError};
use crate::workflow::{JobTemplate, TemplateError, WorkflowLoader};

/// Rough completion estimate returned to asynchronous submitters.
pub const ESTIMATED_TIME_SECS: u64 = 60;

/// Task type reported for every submission.
pub const TASK_TYPE_IMAGE_GENERATION: &str = "image_generation";

/// Result of a successful [`ImageGenerator::generate`] call.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutput {
    pub prompt_id: JobId,
    pub artifacts: Vec<Artifact>,
}

/// Result of [`ImageGenerator::submit_async`].
#[derive(Debug, Clone, Serialize)]
pub struct SubmittedTask {
    pub task_id: JobId,
    /// Number of prompts pending right after submission.
    pub queue_position: usize,
    pub estimated_time_secs: u64,
    pub task_type: &'static str,
    pub submitted_at: DateTime<Utc>,
}

/// Errors that end a generation.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The requested timeout is outside the accepted range.
    #[error(transparent)]
    InvalidTimeout(#[from] ConfigError),

    /// The workflow was never accepted; no task exists.
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    /// The task did not reach a terminal state in time.
    #[error("Generation timed out after {timeout_secs} seconds (prompt {prompt_id})")]
    Timeout { prompt_id: JobId, timeout_secs: u64 },

    /// The caller cancelled while the task was in flight.
    #[error("Generation cancelled (prompt {prompt_id})")]
    Cancelled { prompt_id: JobId },

    /// The task reached a terminal failure state.
    #[error("Generation failed (prompt {prompt_id}): {reason}")]
    TaskFailed {
        prompt_id: JobId,
        reason: FailureReason,
    },

    /// The local output directory could not be prepared.
    #[error("Failed to prepare output directory: {0}")]
    Download(#[source] std::io::Error),
}

/// Orchestrates generation jobs on one ComfyUI instance.
pub struct ImageGenerator {
    config: ComfyUIConfig,
    api: Arc<ComfyUIApi>,
    loader: WorkflowLoader,
}

impl ImageGenerator {
    /// Validate `config` and build the HTTP client and template loader.
    pub fn new(config: ComfyUIConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let api = ComfyUIApi::new(config.base_url.clone(), config.request_timeout)
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        let loader = WorkflowLoader::new(config.workflow_path.clone());

        tracing::info!(
            base_url = %config.base_url,
            workflow_path = %config.workflow_path.display(),
            "ComfyUI generator initialised",
        );

        Ok(Self {
            config,
            api: Arc::new(api),
            loader,
        })
    }

    pub fn config(&self) -> &ComfyUIConfig {
        &self.config
    }

    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    /// Load the workflow template with a fresh seed and `prompt`.
    pub async fn load_workflow(&self, prompt: &str) -> Result<JobTemplate, TemplateError> {
        self.loader.load(prompt).await
    }

    /// Load the template and submit it. One attempt, no retry.
    pub async fn submit(&self, prompt: &str) -> Result<JobId, SubmissionError> {
        let template = self.load_workflow(prompt).await?;
        submit(&self.api, &template).await
    }

    /// Submit without waiting and report the queue position.
    pub async fn submit_async(&self, prompt: &str) -> Result<SubmittedTask, SubmissionError> {
        let task_id = self.submit(prompt).await?;
        let queue = read_queue(&self.api).await;

        Ok(SubmittedTask {
            task_id,
            queue_position: queue.pending.len(),
            estimated_time_secs: ESTIMATED_TIME_SECS,
            task_type: TASK_TYPE_IMAGE_GENERATION,
            submitted_at: Utc::now(),
        })
    }

    /// Current status of a task.
    pub async fn status(&self, prompt_id: &JobId) -> TaskStatus {
        resolve(&self.api, prompt_id).await
    }

    /// Current queue snapshot.
    pub async fn queue(&self) -> QueueSnapshot {
        read_queue(&self.api).await
    }

    /// Submit `prompt`, wait up to `timeout_secs` for the task to finish,
    /// and deliver its artifacts.
    ///
    /// Artifacts are returned as URLs unless an output directory is
    /// configured, in which case they are downloaded first.
    pub async fn generate(
        &self,
        prompt: &str,
        timeout_secs: u64,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput, GenerationError> {
        validate_generation_timeout(timeout_secs)?;

        // The submission round trip counts against the timeout.
        let started = Instant::now();
        let timeout = Duration::from_secs(timeout_secs);

        let prompt_id = self.submit(prompt).await?;
        let images = self
            .poll_until(&prompt_id, started, started + timeout, cancel)
            .await?;
        let artifacts = self.deliver(&images).await?;

        tracing::info!(
            prompt_id = %prompt_id,
            count = artifacts.len(),
            "Generation completed",
        );

        Ok(GenerationOutput {
            prompt_id,
            artifacts,
        })
    }

    /// Poll `prompt_id` until it completes, fails, times out or `cancel`
    /// fires. Returns the output image names on success.
    pub async fn wait_for_completion(
        &self,
        prompt_id: &JobId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, GenerationError> {
        let started = Instant::now();
        self.poll_until(prompt_id, started, started + timeout, cancel)
            .await
    }

    /// Polling loop shared by [`generate`](Self::generate) and
    /// [`wait_for_completion`](Self::wait_for_completion). `started` is
    /// when the task was submitted; `deadline` bounds every wait,
    /// including a status call still in flight.
    async fn poll_until(
        &self,
        prompt_id: &JobId,
        started: Instant,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, GenerationError> {
        let timeout = deadline.saturating_duration_since(started);

        loop {
            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.abandon(prompt_id)),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(self.timed_out(prompt_id, timeout));
                }
                status = resolve(&self.api, prompt_id) => status,
            };
            let status = settle_not_found(status, started.elapsed(), self.config.not_found_grace);

            tracing::debug!(
                prompt_id = %prompt_id,
                status = status.label(),
                progress = status.progress(),
                "Polled task status",
            );

            match status {
                TaskStatus::Completed { images } => return Ok(images),
                TaskStatus::Failed { reason } => {
                    tracing::warn!(prompt_id = %prompt_id, reason = %reason, "Task failed");
                    return Err(GenerationError::TaskFailed {
                        prompt_id: prompt_id.clone(),
                        reason,
                    });
                }
                TaskStatus::Pending => {
                    tracing::debug!(prompt_id = %prompt_id, "Task not visible yet, waiting");
                }
                TaskStatus::Running { .. } => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timed_out(prompt_id, timeout));
            }
            let wake = (now + self.config.poll_interval).min(deadline);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.abandon(prompt_id)),
                _ = tokio::time::sleep_until(wake) => {}
            }

            if Instant::now() >= deadline {
                return Err(self.timed_out(prompt_id, timeout));
            }

            tracing::info!(
                prompt_id = %prompt_id,
                elapsed_secs = started.elapsed().as_secs(),
                "Waiting for task to complete",
            );
        }
    }

    /// Turn output names into artifacts according to the configured mode.
    async fn deliver(&self, images: &[String]) -> Result<Vec<Artifact>, GenerationError> {
        match &self.config.output_dir {
            Some(dir) => artifacts::download_artifacts(&self.api, images, dir)
                .await
                .map_err(GenerationError::Download),
            None => Ok(artifacts::to_urls(&self.api, images)),
        }
    }

    fn timed_out(&self, prompt_id: &JobId, timeout: Duration) -> GenerationError {
        tracing::warn!(
            prompt_id = %prompt_id,
            timeout_secs = timeout.as_secs(),
            "Generation timed out",
        );
        GenerationError::Timeout {
            prompt_id: prompt_id.clone(),
            timeout_secs: timeout.as_secs(),
        }
    }

    /// Ask ComfyUI to drop the abandoned prompt from its queue in the
    /// background and build the cancellation error.
    fn abandon(&self, prompt_id: &JobId) -> GenerationError {
        tracing::info!(prompt_id = %prompt_id, "Generation cancelled, removing task from queue");

        let api = Arc::clone(&self.api);
        let id = prompt_id.clone();
        tokio::spawn(async move {
            if let Err(e) = api.cancel_execution(id.as_str()).await {
                tracing::warn!(prompt_id = %id, error = %e, "Failed to remove cancelled task");
            }
        });

        GenerationError::Cancelled {
            prompt_id: prompt_id.clone(),
        }
    }
}

/// A task ComfyUI does not know about within `grace` of submission has
/// most likely not been indexed yet, so it is reported as pending.
fn settle_not_found(status: TaskStatus, since_submit: Duration, grace: Duration) -> TaskStatus {
    match status {
        TaskStatus::Failed {
            reason: FailureReason::NotFound,
        } if since_submit < grace => TaskStatus::Pending,
        other => other,
    }
}
