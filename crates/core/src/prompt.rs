//! Validation rules for user-supplied generation prompts.
//!
//! Prompts are free text forwarded into a workflow template. The only
//! constraints enforced here are the ones the REST layer promises its
//! callers; escaping is the template loader's job.

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Maximum prompt length, counted in characters (not bytes).
pub const MAX_PROMPT_LENGTH: usize = 1000;

// ---------------------------------------------------------------------------
// Validation functions
// ---------------------------------------------------------------------------

/// Validate a generation prompt.
///
/// The prompt must contain at least one non-whitespace character and be
/// at most [`MAX_PROMPT_LENGTH`] characters long.
pub fn validate_prompt(prompt: &str) -> Result<(), CoreError> {
    if prompt.trim().is_empty() {
        return Err(CoreError::Validation("prompt must not be blank".to_string()));
    }
    let len = prompt.chars().count();
    if len > MAX_PROMPT_LENGTH {
        return Err(CoreError::Validation(format!(
            "prompt must be at most {MAX_PROMPT_LENGTH} characters, got {len}"
        )));
    }
    Ok(())
}

/// Validate a task identifier received from a caller.
pub fn validate_task_id(task_id: &str) -> Result<(), CoreError> {
    if task_id.trim().is_empty() {
        return Err(CoreError::Validation("task id must not be blank".to_string()));
    }
    Ok(())
}
