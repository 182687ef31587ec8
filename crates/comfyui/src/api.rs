//! REST client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (liveness probe, workflow submission,
//! history retrieval, artifact download, media upload) using
//! [`reqwest`]. Every call carries its own timeout so a stalled engine
//! surfaces as a call failure rather than a hang.

use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

/// Timeout for the `GET /` liveness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for submission and history calls.
const API_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for artifact download and video upload.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client for a single ComfyUI instance.
#[derive(Clone)]
pub struct ComfyApi {
    client: reqwest::Client,
    base_url: String,
}

/// Response returned by `POST /prompt` after queuing a workflow.
#[derive(Debug, Deserialize)]
struct QueueResponse {
    /// Server-assigned execution handle for the queued prompt.
    prompt_id: String,
}

/// One history record: the per-node output manifest for a prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    /// Node id -> produced artifacts, in engine enumeration order.
    #[serde(default)]
    pub outputs: IndexMap<String, NodeOutput>,
}

/// Artifacts produced by a single node, grouped by media kind.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub videos: Vec<ArtifactRef>,
    #[serde(default)]
    pub gifs: Vec<ArtifactRef>,
    #[serde(default)]
    pub images: Vec<ArtifactRef>,
}

impl NodeOutput {
    /// All artifact references in collection order (videos, gifs, images).
    pub fn artifacts(&self) -> impl Iterator<Item = &ArtifactRef> {
        self.videos
            .iter()
            .chain(self.gifs.iter())
            .chain(self.images.iter())
    }
}

/// Reference to one produced file, as listed in the output manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtifactRef {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage kind (`output`, `temp`, ...).
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl ArtifactRef {
    /// Transient artifacts live in the engine's temp area and are
    /// never collected.
    pub fn is_transient(&self) -> bool {
        self.kind == "temp"
    }
}

/// Mapping from prompt id to its history record.
pub type HistoryMap = IndexMap<String, HistoryEntry>;

/// Errors from the ComfyUI REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyApiError {
    /// The HTTP request itself failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The engine rejected the workflow graph. Caller error, not retryable.
    #[error("Workflow validation failed: {0}")]
    Validation(String),

    /// The engine returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The engine's response was missing expected fields.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ComfyApi {
    /// Create a new API client.
    ///
    /// * `base_url` - HTTP base URL, e.g. `http://127.0.0.1:8188`.
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    /// HTTP base URL of this instance.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe the engine's liveness endpoint. `true` means 200 within
    /// the probe timeout.
    pub async fn check_ready(&self) -> bool {
        match self
            .client
            .get(format!("{}/", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Submit a workflow for execution and return its execution handle.
    ///
    /// A 400 from the engine means the graph failed validation and is
    /// surfaced as [`ComfyApiError::Validation`]; a 2xx response
    /// without a `prompt_id` is a [`ComfyApiError::Protocol`] error.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
        org_api_key: Option<&str>,
    ) -> Result<String, ComfyApiError> {
        let mut body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });
        if let Some(key) = org_api_key {
            body["extra_data"] = serde_json::json!({ "api_key_comfy_org": key });
        }

        let response = self
            .client
            .post(format!("{}/prompt", self.base_url))
            .timeout(API_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyApiError::Validation(detail));
        }

        let queued: QueueResponse = Self::read_json(response, "queue").await?;
        Ok(queued.prompt_id)
    }

    /// Retrieve the output manifest for a prompt via `GET /history/{id}`.
    pub async fn get_history(&self, prompt_id: &str) -> Result<HistoryMap, ComfyApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.base_url, prompt_id))
            .timeout(API_TIMEOUT)
            .send()
            .await?;

        Self::read_json(response, "history").await
    }

    /// Download one artifact's bytes via `GET /view`.
    pub async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ComfyApiError> {
        let response = self
            .client
            .get(format!("{}/view", self.base_url))
            .timeout(TRANSFER_TIMEOUT)
            .query(&[
                ("filename", artifact.filename.as_str()),
                ("subfolder", artifact.subfolder.as_str()),
                ("type", artifact.kind.as_str()),
            ])
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Upload image bytes into the engine's input namespace.
    pub async fn upload_image(
        &self,
        filename: &str,
        subfolder: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<(), ComfyApiError> {
        self.upload_media("/upload/image", "image", "image/png", filename, subfolder, bytes, API_TIMEOUT)
            .await
    }

    /// Upload video bytes into the engine's input namespace.
    pub async fn upload_video(
        &self,
        filename: &str,
        subfolder: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<(), ComfyApiError> {
        self.upload_media("/upload/video", "video", "video/mp4", filename, subfolder, bytes, TRANSFER_TIMEOUT)
            .await
    }

    // ---- private helpers ----

    /// Build and send a multipart upload with `overwrite=true` and an
    /// optional `subfolder` field.
    async fn upload_media(
        &self,
        endpoint: &str,
        field: &'static str,
        content_type: &str,
        filename: &str,
        subfolder: Option<&str>,
        bytes: Vec<u8>,
        timeout: Duration,
    ) -> Result<(), ComfyApiError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(content_type)?;

        let mut form = reqwest::multipart::Form::new()
            .part(field, part)
            .text("overwrite", "true");
        if let Some(subfolder) = subfolder {
            form = form.text("subfolder", subfolder.to_string());
        }

        let response = self
            .client
            .post(format!("{}{}", self.base_url, endpoint))
            .timeout(timeout)
            .multipart(form)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or [`ComfyApiError::Api`] with
    /// the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful response body, mapping decode failures to
    /// protocol errors.
    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, ComfyApiError> {
        let response = Self::ensure_success(response).await?;
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| ComfyApiError::Protocol(format!("unexpected {what} response: {e}")))
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_manifest_preserves_node_and_media_order() {
        let json = r#"{
            "P1": {"outputs": {
                "9": {"images": [{"filename": "a.png", "subfolder": "", "type": "output"}]},
                "4": {"videos": [{"filename": "b.mp4", "subfolder": "clips", "type": "output"}],
                       "images": [{"filename": "c.png", "subfolder": "", "type": "temp"}]}
            }}
        }"#;

        let history: HistoryMap = serde_json::from_str(json).unwrap();
        let entry = &history["P1"];

        let nodes: Vec<&String> = entry.outputs.keys().collect();
        assert_eq!(nodes, ["9", "4"]);

        let names: Vec<&str> = entry.outputs["4"]
            .artifacts()
            .map(|a| a.filename.as_str())
            .collect();
        assert_eq!(names, ["b.mp4", "c.png"]);
    }

    #[test]
    fn temp_artifacts_are_transient() {
        let artifact: ArtifactRef = serde_json::from_str(
            r#"{"filename": "preview.png", "subfolder": "", "type": "temp"}"#,
        )
        .unwrap();
        assert!(artifact.is_transient());
    }

    #[test]
    fn manifest_entry_without_outputs_defaults_empty() {
        let entry: HistoryEntry = serde_json::from_str(r#"{"status": {"completed": true}}"#).unwrap();
        assert!(entry.outputs.is_empty());
    }

    #[test]
    fn validation_error_display_carries_engine_detail() {
        let err = ComfyApiError::Validation("invalid prompt: missing node 7".into());
        assert_eq!(
            err.to_string(),
            "Workflow validation failed: invalid prompt: missing node 7"
        );
    }
}
