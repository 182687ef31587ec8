//! Output collection and classification.
//!
//! Walks the engine's output manifest in enumeration order, fetches
//! each collectible artifact, and classifies it: pushed to a
//! caller-supplied destination (`uploaded`) when the filename matches
//! an output target, inlined as base64 otherwise. Transient artifacts
//! are never collected. Per-artifact failures become warning entries
//! and never abort collection of the rest.

use std::collections::HashMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use indexmap::IndexMap;
use spindle_comfyui::api::{ComfyApi, NodeOutput};
use spindle_core::job::{ArtifactPayload, NamedUrl};

/// Timeout for pushing one artifact to a destination URI.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Collect every artifact from the manifest.
///
/// Returns the classified artifacts in manifest order plus the
/// per-artifact error entries accumulated along the way.
pub async fn collect_outputs(
    engine: &ComfyApi,
    http: &reqwest::Client,
    outputs: &IndexMap<String, NodeOutput>,
    targets: &[NamedUrl],
) -> (Vec<ArtifactPayload>, Vec<String>) {
    let target_map: HashMap<&str, &str> = targets
        .iter()
        .map(|t| (t.name.as_str(), t.url.as_str()))
        .collect();

    let mut collected = Vec::new();
    let mut errors = Vec::new();

    for (node_id, node_output) in outputs {
        for artifact in node_output.artifacts() {
            if artifact.filename.is_empty() || artifact.is_transient() {
                continue;
            }

            let bytes = match engine.fetch_artifact(artifact).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    errors.push(format!("Failed to fetch {}: {e}", artifact.filename));
                    continue;
                }
            };
            tracing::debug!(
                node_id = %node_id,
                filename = %artifact.filename,
                size = bytes.len(),
                "Collected artifact",
            );

            match target_map.get(artifact.filename.as_str()) {
                Some(url) => match push_artifact(http, url, &artifact.filename, bytes).await {
                    Ok(()) => collected.push(ArtifactPayload::Uploaded {
                        filename: artifact.filename.clone(),
                    }),
                    Err(e) => {
                        errors.push(format!("Failed to upload {}: {e}", artifact.filename));
                    }
                },
                None => collected.push(ArtifactPayload::Inlined {
                    filename: artifact.filename.clone(),
                    data: STANDARD.encode(&bytes),
                }),
            }
        }
    }

    (collected, errors)
}

/// PUT an artifact's bytes to a caller-supplied destination.
async fn push_artifact(
    http: &reqwest::Client,
    url: &str,
    filename: &str,
    bytes: Vec<u8>,
) -> Result<(), reqwest::Error> {
    http.put(url)
        .timeout(UPLOAD_TIMEOUT)
        .header(reqwest::header::CONTENT_TYPE, content_type_for(filename))
        .body(bytes)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

/// Content type for a destination push.
fn content_type_for(filename: &str) -> &'static str {
    let lower = filename.to_ascii_lowercase();
    if [".mp4", ".mov", ".avi"]
        .iter()
        .any(|ext| lower.ends_with(ext))
    {
        "video/mp4"
    } else {
        "image/png"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(json: serde_json::Value) -> IndexMap<String, NodeOutput> {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn destination_content_type_follows_extension() {
        assert_eq!(content_type_for("clip.mp4"), "video/mp4");
        assert_eq!(content_type_for("CLIP.MOV"), "video/mp4");
        assert_eq!(content_type_for("out.png"), "image/png");
        // The destination set is narrower than the staging set.
        assert_eq!(content_type_for("anim.webm"), "image/png");
    }

    #[tokio::test]
    async fn transient_and_unnamed_artifacts_are_never_collected() {
        // The engine endpoint is unroutable, so every *attempted* fetch
        // fails loudly. Skipped artifacts must not even be attempted.
        let engine = ComfyApi::new("http://127.0.0.1:9".into());
        let http = reqwest::Client::new();
        let outputs = manifest(serde_json::json!({
            "7": {"images": [
                {"filename": "preview.png", "subfolder": "", "type": "temp"},
                {"filename": "", "subfolder": "", "type": "output"},
                {"filename": "final.png", "subfolder": "", "type": "output"}
            ]}
        }));

        let (collected, errors) = collect_outputs(&engine, &http, &outputs, &[]).await;

        assert!(collected.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Failed to fetch final.png:"));
    }

    #[tokio::test]
    async fn fetch_failures_do_not_abort_remaining_artifacts() {
        let engine = ComfyApi::new("http://127.0.0.1:9".into());
        let http = reqwest::Client::new();
        let outputs = manifest(serde_json::json!({
            "3": {"images": [{"filename": "a.png", "subfolder": "", "type": "output"}]},
            "9": {"videos": [{"filename": "b.mp4", "subfolder": "", "type": "output"}]}
        }));

        let (collected, errors) = collect_outputs(&engine, &http, &outputs, &[]).await;

        assert!(collected.is_empty());
        let names: Vec<&str> = errors.iter().map(|e| e.as_str()).collect();
        assert!(names[0].starts_with("Failed to fetch a.png:"));
        assert!(names[1].starts_with("Failed to fetch b.mp4:"));
    }
}
