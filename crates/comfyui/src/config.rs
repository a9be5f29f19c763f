//! Immutable configuration for the ComfyUI integration.
//!
//! Built once at startup (usually via [`ComfyUIConfig::from_env`]) and
//! validated eagerly. A process holding an invalid configuration must
//! not serve requests, so every constructor returns [`ConfigError`]
//! instead of panicking.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Defaults and bounds
// ---------------------------------------------------------------------------

/// Default ComfyUI base URL (local instance).
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8188";

/// Default location of the workflow template resource.
pub const DEFAULT_WORKFLOW_PATH: &str = "comfyui_workflow/image.json";

/// Default per-request HTTP timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default overall generation timeout in seconds.
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 60;

/// Smallest accepted generation timeout in seconds.
pub const MIN_GENERATION_TIMEOUT_SECS: u64 = 1;

/// Largest accepted generation timeout in seconds.
pub const MAX_GENERATION_TIMEOUT_SECS: u64 = 600;

/// Default delay between two status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default window after submission during which "task not found" is
/// treated as "not indexed yet".
pub const DEFAULT_NOT_FOUND_GRACE: Duration = Duration::from_secs(6);

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Connection and timing settings for one ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIConfig {
    /// Base HTTP URL without trailing slash, e.g. `http://host:8188`.
    pub base_url: String,
    /// Path of the JSON workflow template.
    pub workflow_path: PathBuf,
    /// Timeout applied to every individual HTTP call.
    pub request_timeout: Duration,
    /// Overall generation timeout used when a caller does not pass one.
    pub default_timeout_secs: u64,
    /// Delay between two status polls while waiting for a task.
    pub poll_interval: Duration,
    /// Grace window for freshly submitted tasks that are not visible yet.
    pub not_found_grace: Duration,
    /// When set, completed artifacts are downloaded here instead of being
    /// returned as direct-access URLs.
    pub output_dir: Option<PathBuf>,
}

impl ComfyUIConfig {
    /// Build a configuration for `base_url` with every other setting at
    /// its default, validating the result.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ConfigError> {
        let config = Self {
            base_url: normalize_base_url(base_url.into()),
            workflow_path: PathBuf::from(DEFAULT_WORKFLOW_PATH),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            default_timeout_secs: DEFAULT_GENERATION_TIMEOUT_SECS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            not_found_grace: DEFAULT_NOT_FOUND_GRACE,
            output_dir: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                       |
    /// |--------------------------------|-------------------------------|
    /// | `COMFYUI_BASE_URL`             | `http://127.0.0.1:8188`       |
    /// | `COMFYUI_WORKFLOW_PATH`        | `comfyui_workflow/image.json` |
    /// | `COMFYUI_REQUEST_TIMEOUT_SECS` | `30`                          |
    /// | `COMFYUI_DEFAULT_TIMEOUT_SECS` | `60`                          |
    /// | `COMFYUI_POLL_INTERVAL_MS`     | `2000`                        |
    /// | `COMFYUI_NOT_FOUND_GRACE_SECS` | `6`                           |
    /// | `COMFYUI_OUTPUT_DIR`           | unset (URL mode)              |
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url =
            std::env::var("COMFYUI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());

        let workflow_path = std::env::var("COMFYUI_WORKFLOW_PATH")
            .unwrap_or_else(|_| DEFAULT_WORKFLOW_PATH.into());

        let request_timeout_secs =
            env_or("COMFYUI_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        let default_timeout_secs =
            env_or("COMFYUI_DEFAULT_TIMEOUT_SECS", DEFAULT_GENERATION_TIMEOUT_SECS)?;
        let poll_interval_ms = env_or(
            "COMFYUI_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL.as_millis() as u64,
        )?;
        let not_found_grace_secs = env_or(
            "COMFYUI_NOT_FOUND_GRACE_SECS",
            DEFAULT_NOT_FOUND_GRACE.as_secs(),
        )?;

        let output_dir = std::env::var("COMFYUI_OUTPUT_DIR")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let config = Self {
            base_url: normalize_base_url(base_url),
            workflow_path: PathBuf::from(workflow_path),
            request_timeout: Duration::from_secs(request_timeout_secs),
            default_timeout_secs,
            poll_interval: Duration::from_millis(poll_interval_ms),
            not_found_grace: Duration::from_secs(not_found_grace_secs),
            output_dir,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every invariant of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::BlankBaseUrl);
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidScheme(self.base_url.clone()));
        }
        reqwest::Url::parse(&self.base_url)
            .map_err(|e| ConfigError::InvalidBaseUrl(format!("{}: {e}", self.base_url)))?;

        validate_generation_timeout(self.default_timeout_secs)?;

        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("request timeout"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("poll interval"));
        }
        Ok(())
    }
}

/// Validate an overall generation timeout against the accepted range.
pub fn validate_generation_timeout(secs: u64) -> Result<(), ConfigError> {
    if !(MIN_GENERATION_TIMEOUT_SECS..=MAX_GENERATION_TIMEOUT_SECS).contains(&secs) {
        return Err(ConfigError::TimeoutOutOfRange(secs));
    }
    Ok(())
}

fn normalize_base_url(raw: String) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn env_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
            key,
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Errors raised while building or validating a [`ComfyUIConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("ComfyUI base URL must not be blank")]
    BlankBaseUrl,

    #[error("ComfyUI base URL must start with http:// or https://, got '{0}'")]
    InvalidScheme(String),

    #[error("ComfyUI base URL is not a valid URL: {0}")]
    InvalidBaseUrl(String),

    #[error("Generation timeout must be between 1 and 600 seconds, got {0}")]
    TimeoutOutOfRange(u64),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("Invalid value for {key}: {message}")]
    InvalidEnv { key: &'static str, message: String },

    /// The HTTP client could not be constructed from this configuration.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}
