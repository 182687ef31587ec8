//! Inbound staging of caller-supplied input assets.
//!
//! Inline assets arrive as base64 and go straight to the engine's
//! image upload endpoint. Remote assets are fetched first and routed
//! by filename extension to the video or image upload path. Each
//! item fails independently: staging runs to the end of the list and
//! reports every failure, so callers see the full picture instead of
//! the first broken item.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use spindle_comfyui::api::{ComfyApi, ComfyApiError};
use spindle_core::job::{InlineAsset, NamedUrl};

/// Extensions routed to the video upload endpoint.
const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mov", "avi", "mkv", "webm"];

/// Timeout for fetching one remote input asset.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-item staging failure.
#[derive(Debug, thiserror::Error)]
enum StageItemError {
    #[error(transparent)]
    Decode(#[from] base64::DecodeError),
    #[error(transparent)]
    Engine(#[from] ComfyApiError),
    #[error(transparent)]
    Fetch(#[from] reqwest::Error),
}

/// Decode and upload inline assets into the engine's input namespace.
///
/// Returns one error entry per failed item; empty means every item
/// staged successfully.
pub async fn upload_inline_assets(engine: &ComfyApi, assets: &[InlineAsset]) -> Vec<String> {
    let mut errors = Vec::new();
    for asset in assets {
        if let Err(e) = stage_inline(engine, asset).await {
            errors.push(format!("Failed to upload {}: {e}", asset.name));
        }
    }
    errors
}

/// Fetch remote assets and upload each into the engine's input
/// namespace. Same per-item error semantics as
/// [`upload_inline_assets`].
pub async fn stage_remote_assets(
    engine: &ComfyApi,
    http: &reqwest::Client,
    assets: &[NamedUrl],
) -> Vec<String> {
    let mut errors = Vec::new();
    for asset in assets {
        if let Err(e) = stage_remote(engine, http, asset).await {
            errors.push(format!("Failed to process {}: {e}", asset.name));
        }
    }
    errors
}

async fn stage_inline(engine: &ComfyApi, asset: &InlineAsset) -> Result<(), StageItemError> {
    let bytes = STANDARD.decode(strip_data_uri(&asset.image))?;
    tracing::debug!(name = %asset.name, size = bytes.len(), "Staging inline asset");
    engine.upload_image(&asset.name, None, bytes).await?;
    Ok(())
}

async fn stage_remote(
    engine: &ComfyApi,
    http: &reqwest::Client,
    asset: &NamedUrl,
) -> Result<(), StageItemError> {
    let response = http
        .get(&asset.url)
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;
    let bytes = response.bytes().await?.to_vec();

    let (subfolder, filename) = split_subfolder(&asset.name);
    tracing::debug!(name = %asset.name, size = bytes.len(), "Staging remote asset");

    if is_video(filename) {
        engine.upload_video(filename, subfolder, bytes).await?;
    } else {
        engine.upload_image(filename, subfolder, bytes).await?;
    }
    Ok(())
}

/// Split an optional `subfolder/` prefix off an asset name.
fn split_subfolder(name: &str) -> (Option<&str>, &str) {
    match name.rsplit_once('/') {
        Some((subfolder, filename)) if !subfolder.is_empty() => (Some(subfolder), filename),
        Some((_, filename)) => (None, filename),
        None => (None, name),
    }
}

/// Case-insensitive membership in the video extension set.
fn is_video(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    VIDEO_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
}

/// Drop a `data:...,` URI header, if present, from a base64 payload.
fn strip_data_uri(data: &str) -> &str {
    match data.split_once(',') {
        Some((_, rest)) => rest,
        None => data,
    }
}
