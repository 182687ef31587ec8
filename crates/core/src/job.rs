//! Job request/result model.
//!
//! A job is one request to execute a workflow graph against the engine.
//! It exists only in memory for the duration of execution; the terminal
//! [`JobResult`] is delivered once through the callback notifier and
//! then discarded.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `POST /run`: one job submission.
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    /// Opaque workflow graph (node id -> node definition), forwarded
    /// verbatim to the engine.
    pub workflow: serde_json::Value,
    /// Where the terminal result is delivered.
    pub callback_url: String,
    /// Inline input assets (base64-encoded image bytes).
    #[serde(default)]
    pub images: Vec<InlineAsset>,
    /// Remote input assets, fetched before staging.
    #[serde(default)]
    pub download_urls: Vec<NamedUrl>,
    /// Output destinations keyed by artifact filename. Artifacts whose
    /// filename matches are pushed there instead of inlined.
    #[serde(default)]
    pub upload_urls: Vec<NamedUrl>,
    /// Credential override for the engine's third-party asset provider.
    #[serde(default)]
    pub credential: Option<String>,
}

/// A named input asset supplied inline as base64 data.
#[derive(Debug, Clone, Deserialize)]
pub struct InlineAsset {
    pub name: String,
    /// Base64 payload, optionally prefixed with a `data:...,` URI header.
    pub image: String,
}

/// A (name, url) pair used for both remote inputs and output targets.
#[derive(Debug, Clone, Deserialize)]
pub struct NamedUrl {
    pub name: String,
    pub url: String,
}

/// Stages a job moves through while the orchestrator drives it.
///
/// Any stage may short-circuit directly to `Notifying` with a failure
/// payload; `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Intake,
    Staging,
    Submitted,
    Monitoring,
    Collecting,
    Notifying,
    Done,
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStage::Intake => "intake",
            JobStage::Staging => "staging",
            JobStage::Submitted => "submitted",
            JobStage::Monitoring => "monitoring",
            JobStage::Collecting => "collecting",
            JobStage::Notifying => "notifying",
            JobStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Terminal job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Failed,
}

/// One collected output artifact, terminally classified.
///
/// An artifact is either pushed to a caller-supplied destination
/// (`uploaded`) or embedded in the result as base64 (`base64` on the
/// wire), never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ArtifactPayload {
    #[serde(rename = "uploaded")]
    Uploaded { filename: String },
    #[serde(rename = "base64")]
    Inlined { filename: String, data: String },
}

impl ArtifactPayload {
    pub fn filename(&self) -> &str {
        match self {
            ArtifactPayload::Uploaded { filename } => filename,
            ArtifactPayload::Inlined { filename, .. } => filename,
        }
    }
}

/// Terminal payload for one job.
///
/// `images` is present (possibly empty) on completed results and
/// omitted on failures; `error`/`details` are only present on failures.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ArtifactPayload>>,
    /// Non-fatal errors from a partially successful run.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl JobResult {
    /// A failed result with a human-readable error description.
    pub fn failed(error: impl Into<String>) -> Self {
        Self::failed_with_details(error, Vec::new())
    }

    /// A failed result carrying structured per-item details.
    pub fn failed_with_details(error: impl Into<String>, details: Vec<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            images: None,
            warnings: Vec::new(),
            error: Some(error.into()),
            details,
        }
    }

    /// Classify the terminal outcome from collected artifacts and the
    /// errors accumulated across monitoring and collection.
    ///
    /// A run that produced no usable artifacts and hit at least one
    /// error is a failure; otherwise the errors are demoted to warnings.
    pub fn from_collection(images: Vec<ArtifactPayload>, errors: Vec<String>) -> Self {
        if images.is_empty() && !errors.is_empty() {
            return Self::failed_with_details("Job produced no output", errors);
        }
        Self {
            status: JobStatus::Completed,
            images: Some(images),
            warnings: errors,
            error: None,
            details: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }
}

/// The callback body: job id plus the flattened terminal result.
#[derive(Debug, Clone, Serialize)]
pub struct JobCallback {
    pub job_id: Uuid,
    #[serde(flatten)]
    pub result: JobResult,
}
