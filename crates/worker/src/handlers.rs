//! HTTP surface: job intake and health.
//!
//! `POST /run` validates and acknowledges immediately with 202; the
//! job itself runs on a spawned task so intake never blocks on engine
//! I/O. All outcome detail reaches the caller via the callback, never
//! the HTTP response.

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use spindle_core::job::RunRequest;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::executor::{self, JobContext};
use crate::state::AppState;

/// Response to an accepted job submission.
#[derive(Serialize)]
pub struct AcceptedResponse {
    pub job_id: Uuid,
    pub status: &'static str,
}

/// Health check payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Worker process liveness.
    pub status: &'static str,
    pub worker_id: String,
    /// Whether the upstream engine currently answers its liveness probe.
    pub engine_ready: bool,
}

/// Mount the worker's routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/run", post(run))
        .route("/health", get(health))
        .with_state(state)
}

/// POST /run
///
/// Accept a job, acknowledge with `202 {job_id, status: "accepted"}`,
/// and execute it asynchronously.
async fn run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RunRequest>,
) -> AppResult<impl IntoResponse> {
    check_auth(&state, &headers)?;

    if !request.workflow.is_object() {
        return Err(AppError::BadRequest("workflow must be an object".into()));
    }
    if request.callback_url.trim().is_empty() {
        return Err(AppError::BadRequest("callback_url must not be empty".into()));
    }

    let job_id = Uuid::new_v4();
    tracing::info!(%job_id, "Accepted job");

    tokio::spawn(executor::run_job(state, JobContext { job_id, request }));

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            job_id,
            status: "accepted",
        }),
    ))
}

/// GET /health
///
/// Worker liveness plus a live upstream readiness probe.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let engine_ready = state.engine.check_ready().await;

    Json(HealthResponse {
        status: "ok",
        worker_id: state.config.worker_id.clone(),
        engine_ready,
    })
}

/// Compare the `Authorization` header against the configured key.
/// An unset key disables the check.
fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(key) = state.config.api_key.as_deref() else {
        return Ok(());
    };

    let expected = format!("Bearer {key}");
    match headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => Ok(()),
        _ => Err(AppError::Unauthorized("Invalid or missing API key".into())),
    }
}
