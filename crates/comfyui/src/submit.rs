//! Job submission.
//!
//! One attempt per call: the workflow is posted once and either a
//! non-blank [`JobId`] comes back or a [`SubmissionError`] explains why
//! not. Retrying is left to the caller.

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::job::{new_client_id, JobId};
use crate::workflow::{JobTemplate, TemplateError};

/// Errors that prevent a workflow from being accepted.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    /// The workflow template could not be prepared.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The `/prompt` call failed or returned a non-success status.
    #[error("Failed to submit workflow: {0}")]
    Api(#[from] ComfyUIApiError),

    /// ComfyUI accepted the request but returned no usable `prompt_id`.
    #[error("ComfyUI response did not contain a prompt_id")]
    MissingPromptId,
}

/// Submit a prepared workflow and return the service-assigned job id.
pub async fn submit(api: &ComfyUIApi, template: &JobTemplate) -> Result<JobId, SubmissionError> {
    let client_id = new_client_id();

    let response = api
        .submit_workflow(&template.workflow, &client_id)
        .await
        .inspect_err(|e| {
            tracing::error!(client_id = %client_id, error = %e, "Workflow submission failed");
        })?;

    let prompt_id = response
        .prompt_id
        .and_then(JobId::parse)
        .ok_or_else(|| {
            tracing::error!(client_id = %client_id, "Submission response is missing prompt_id");
            SubmissionError::MissingPromptId
        })?;

    tracing::info!(
        prompt_id = %prompt_id,
        client_id = %client_id,
        seed = template.seed,
        queue_number = response.number,
        "Workflow submitted to ComfyUI",
    );

    Ok(prompt_id)
}
