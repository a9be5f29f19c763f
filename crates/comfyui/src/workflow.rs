//! Workflow template loading and placeholder substitution.
//!
//! A workflow template is a ComfyUI API-format JSON document in which
//! string values may carry `{placeholder}` tokens. Substitution walks
//! the parsed tree and rewrites string leaves, so user text is never
//! spliced into raw JSON and cannot alter the document structure.
//!
//! Two placeholders are supported:
//!
//! * `{seed}` -- a fresh numeric seed, unique for every load.
//! * `{prompt}` -- the caller's prompt text.
//!
//! A leaf consisting of exactly `"{seed}"` becomes a JSON number; any
//! other occurrence is replaced textually inside its string. Any other
//! token is an error, raised before the workflow can reach the network.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

use rand::Rng;
use regex::{Captures, Regex};
use serde_json::Value;

/// Placeholder name for the generated seed.
pub const SEED_PLACEHOLDER: &str = "seed";

/// Placeholder name for the user prompt.
pub const PROMPT_PLACEHOLDER: &str = "prompt";

/// Upper bound (exclusive) for the randomly chosen first seed. Leaves
/// room for billions of increments below `u64::MAX`.
const SEED_START_BOUND: u64 = 1 << 48;

/// Matches `{placeholder}` tokens.
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// A fully substituted workflow ready for submission.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    /// The ComfyUI API-format workflow document.
    pub workflow: Value,
    /// Seed written into the workflow.
    pub seed: u64,
}

/// Hands out strictly increasing seeds, starting from a random offset so
/// that restarts do not replay the same sequence.
#[derive(Debug)]
pub struct SeedSource {
    next: AtomicU64,
}

impl SeedSource {
    pub fn new() -> Self {
        Self::starting_at(rand::rng().random_range(0..SEED_START_BOUND))
    }

    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    pub fn next_seed(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SeedSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Loads the workflow template from disk and substitutes placeholders.
///
/// The file is re-read on every [`load`](Self::load) so edits to the
/// template take effect without a restart.
#[derive(Debug)]
pub struct WorkflowLoader {
    path: PathBuf,
    seeds: SeedSource,
}

impl WorkflowLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            seeds: SeedSource::new(),
        }
    }

    pub fn with_seeds(path: impl Into<PathBuf>, seeds: SeedSource) -> Self {
        Self {
            path: path.into(),
            seeds,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the template and substitute a fresh seed and `prompt`.
    pub async fn load(&self, prompt: &str) -> Result<JobTemplate, TemplateError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| TemplateError::Load {
                path: self.path.clone(),
                source,
            })?;

        let template: Value = serde_json::from_str(&text).map_err(TemplateError::Format)?;
        if !template.is_object() {
            return Err(TemplateError::NotAnObject);
        }

        let seed = self.seeds.next_seed();
        let workflow = substitute(&template, seed, prompt)?;

        tracing::debug!(
            path = %self.path.display(),
            seed,
            "Workflow template loaded",
        );

        Ok(JobTemplate { workflow, seed })
    }
}

/// Return a copy of `template` with every placeholder replaced.
pub fn substitute(template: &Value, seed: u64, prompt: &str) -> Result<Value, TemplateError> {
    match template {
        Value::String(s) => substitute_str(s, seed, prompt),
        Value::Array(items) => items
            .iter()
            .map(|item| substitute(item, seed, prompt))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), substitute(value, seed, prompt)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_str(s: &str, seed: u64, prompt: &str) -> Result<Value, TemplateError> {
    if s == "{seed}" {
        return Ok(Value::from(seed));
    }

    let mut unresolved = None;
    let replaced = PLACEHOLDER_RE.replace_all(s, |caps: &Captures| match &caps[1] {
        SEED_PLACEHOLDER => seed.to_string(),
        PROMPT_PLACEHOLDER => prompt.to_string(),
        other => {
            unresolved.get_or_insert_with(|| other.to_string());
            caps[0].to_string()
        }
    });

    match unresolved {
        Some(name) => Err(TemplateError::UnresolvedPlaceholder(name)),
        None => Ok(Value::String(replaced.into_owned())),
    }
}

/// Errors raised while preparing a workflow template.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// The template resource could not be read.
    #[error("Failed to read workflow template {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The template is not well-formed JSON.
    #[error("Workflow template is not valid JSON: {0}")]
    Format(#[source] serde_json::Error),

    /// The template parsed but is not a JSON object of nodes.
    #[error("Workflow template must be a JSON object")]
    NotAnObject,

    /// The template references a placeholder that is never supplied.
    #[error("Workflow template references unknown placeholder '{{{0}}}'")]
    UnresolvedPlaceholder(String),
}
