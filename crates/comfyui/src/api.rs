//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (workflow submission, queue inspection,
//! queue deletion, history retrieval and output download) using
//! [`reqwest`]. Every call is bounded by the per-request timeout of the
//! underlying client.

use std::time::Duration;

use crate::messages::{QueueResponse, SubmitResponse};

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    base: reqwest::Url,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, or an
    /// undecodable body).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The base URL cannot be combined into an endpoint URL.
    #[error("Invalid ComfyUI URL: {0}")]
    InvalidUrl(String),
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    /// * `request_timeout` - Upper bound for each individual request.
    pub fn new(api_url: String, request_timeout: Duration) -> Result<Self, ComfyUIApiError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Self::with_client(client, api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling across components).
    pub fn with_client(client: reqwest::Client, api_url: String) -> Result<Self, ComfyUIApiError> {
        let api_url = api_url.trim_end_matches('/').to_string();
        let base = reqwest::Url::parse(&api_url)
            .map_err(|e| ComfyUIApiError::InvalidUrl(format!("{api_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ComfyUIApiError::InvalidUrl(api_url));
        }
        Ok(Self {
            client,
            api_url,
            base,
        })
    }

    /// Base HTTP URL of this instance.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID.  Returns the decoded body; callers must check that a
    /// `prompt_id` is actually present.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(self.endpoint(&["prompt"]))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch the current queue (running and pending prompts).
    pub async fn get_queue(&self) -> Result<QueueResponse, ComfyUIApiError> {
        let response = self
            .client
            .get(self.endpoint(&["queue"]))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Cancel a queued execution.
    ///
    /// Sends a `POST /queue` request asking ComfyUI to delete the
    /// specified prompt from the queue.
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = serde_json::json!({
            "delete": [prompt_id],
        });

        let response = self
            .client
            .post(self.endpoint(&["queue"]))
            .json(&body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request.  The returned JSON is
    /// a mapping keyed by prompt id; it is empty while the prompt has
    /// not finished.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(self.endpoint(&["history", prompt_id]))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Start downloading an output file.
    ///
    /// Sends `GET /view?filename=<name>&type=output` and returns the
    /// response once its status is known to be successful, leaving the
    /// body to be streamed by the caller.
    pub async fn view(&self, filename: &str) -> Result<reqwest::Response, ComfyUIApiError> {
        let response = self
            .client
            .get(self.endpoint(&["view"]))
            .query(&[("filename", filename), ("type", "output")])
            .send()
            .await?;

        Self::ensure_success(response).await
    }

    /// Direct-access URL for an output file, with the name
    /// percent-encoded into the query string.
    pub fn view_url(&self, filename: &str) -> String {
        let mut url = self.endpoint(&["view"]);
        url.query_pairs_mut()
            .append_pair("filename", filename)
            .append_pair("type", "output");
        url.into()
    }

    // ---- private helpers ----

    /// Append percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> reqwest::Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> ComfyUIApi {
        ComfyUIApi::new("http://127.0.0.1:8188/".into(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        assert_eq!(api().api_url(), "http://127.0.0.1:8188");
    }

    #[test]
    fn view_url_includes_output_type() {
        assert_eq!(
            api().view_url("x.png"),
            "http://127.0.0.1:8188/view?filename=x.png&type=output"
        );
    }

    #[test]
    fn history_id_is_a_single_path_segment() {
        let url = api().endpoint(&["history", "../queue?x=1"]);
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8188/history/..%2Fqueue%3Fx=1"
        );
    }

    #[test]
    fn base_path_is_preserved() {
        let api = ComfyUIApi::new("http://gw.local/comfy".into(), Duration::from_secs(5)).unwrap();
        assert_eq!(api.endpoint(&["prompt"]).as_str(), "http://gw.local/comfy/prompt");
    }

    #[test]
    fn view_url_encodes_filename() {
        let url = api().view_url("a b&c=d.png");
        assert_eq!(
            url,
            "http://127.0.0.1:8188/view?filename=a+b%26c%3Dd.png&type=output"
        );
    }
}
