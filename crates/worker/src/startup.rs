//! Engine readiness polling and the startup ready callback.

use std::time::Duration;

use spindle_comfyui::api::ComfyApi;

use crate::state::AppState;

/// Poll the engine's liveness endpoint until it answers or the attempt
/// budget is spent.
pub async fn wait_for_engine(engine: &ComfyApi, max_retries: u32, interval: Duration) -> bool {
    for attempt in 1..=max_retries {
        if engine.check_ready().await {
            tracing::info!(attempt, "ComfyUI ready");
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    tracing::error!(max_retries, "ComfyUI did not become ready");
    false
}

/// Wait for the engine at startup and announce readiness to the
/// configured callback URL, if any.
pub async fn announce_ready(state: AppState) {
    let ok = wait_for_engine(
        &state.engine,
        state.config.ready_max_retries,
        state.config.ready_interval,
    )
    .await;

    let Some(url) = state.config.ready_callback_url.clone() else {
        tracing::info!("No ready callback configured, skipping");
        return;
    };

    let payload = serde_json::json!({
        "event": "ready",
        "worker_id": state.config.worker_id,
        "success": ok,
    });

    if let Err(e) = state.notifier.deliver(&url, &payload, "ready-callback").await {
        tracing::error!(error = %e, "Ready callback not delivered");
    }
}
