//! Identifiers for jobs accepted by ComfyUI.

use std::fmt;

use serde::Serialize;

/// Prefix of the client identifiers attached to submissions.
const CLIENT_ID_PREFIX: &str = "aicenter";

/// Identifier assigned by ComfyUI to an accepted job (`prompt_id`).
///
/// Never blank: the only constructor rejects empty and whitespace-only
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wrap a service-issued identifier, returning `None` if it is blank.
    pub fn parse(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.len() == raw.len() {
            Some(Self(raw))
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Generate a client identifier for one submission.
pub fn new_client_id() -> String {
    format!("{CLIENT_ID_PREFIX}_{}", uuid::Uuid::new_v4().simple())
}
