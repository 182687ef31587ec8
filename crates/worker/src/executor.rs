//! Per-job orchestration.
//!
//! [`run_job`] drives one accepted job through its stages -- cleanup,
//! staging, submission, monitoring, collection -- and guarantees
//! exactly one terminal callback delivery sequence, whatever stage
//! failed. Stage errors are caught here and converted into a failed
//! [`JobResult`]; nothing propagates out of the orchestrator, so one
//! bad job can never take the worker process down.

use std::time::Duration;

use spindle_comfyui::api::ComfyApiError;
use spindle_comfyui::client::{ClientError, ComfyClient};
use spindle_comfyui::monitor::{monitor_execution, ExecutionOutcome, MonitorError};
use spindle_core::job::{JobCallback, JobResult, JobStage, RunRequest};
use uuid::Uuid;

use crate::state::AppState;
use crate::{cleanup, outputs, staging, startup};

/// Liveness probes before submission (reachability pre-check).
const PRE_SUBMIT_PROBES: u32 = 5;
/// Delay between pre-submission probes.
const PRE_SUBMIT_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Everything one job carries while the orchestrator drives it.
pub struct JobContext {
    pub job_id: Uuid,
    pub request: RunRequest,
}

/// Stage-level failures, rendered into the terminal result's error
/// string. Staging variants carry per-item details.
#[derive(Debug, thiserror::Error)]
enum JobError {
    #[error("ComfyUI not reachable")]
    EngineUnreachable,

    #[error("Image upload failed")]
    InlineStaging { details: Vec<String> },

    #[error("File download/upload failed")]
    RemoteStaging { details: Vec<String> },

    #[error(transparent)]
    Connect(#[from] ClientError),

    #[error(transparent)]
    Engine(#[from] ComfyApiError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error("Prompt {0} not found in history")]
    HistoryMiss(String),
}

impl JobError {
    /// Structured per-item details for the failure payload.
    fn into_details(self) -> Vec<String> {
        match self {
            JobError::InlineStaging { details } | JobError::RemoteStaging { details } => details,
            _ => Vec::new(),
        }
    }
}

/// Drive one job end-to-end and deliver its terminal callback.
///
/// Holds the worker's single-flight job slot for the whole execution,
/// so a concurrent submission queues instead of racing the scratch
/// cleanup.
pub async fn run_job(state: AppState, ctx: JobContext) {
    let _slot = state.job_slot.lock().await;

    let result = match execute(&state, &ctx).await {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(job_id = %ctx.job_id, error = %e, "Job failed");
            let message = e.to_string();
            JobResult::failed_with_details(message, e.into_details())
        }
    };

    tracing::info!(
        job_id = %ctx.job_id,
        stage = %JobStage::Notifying,
        status = ?result.status,
        "Delivering terminal callback",
    );
    notify(&state, &ctx.request.callback_url, JobCallback {
        job_id: ctx.job_id,
        result,
    })
    .await;

    tracing::info!(job_id = %ctx.job_id, stage = %JobStage::Done, "Job finished");
}

/// Run the job's stages in order. Any error short-circuits back to
/// [`run_job`], which folds it into the failure payload.
async fn execute(state: &AppState, ctx: &JobContext) -> Result<JobResult, JobError> {
    let job_id = ctx.job_id;
    let request = &ctx.request;

    tracing::info!(%job_id, stage = %JobStage::Intake, "Preparing engine scratch directories");
    cleanup::clean_scratch_dirs(&state.config.engine_root, &state.config.preserve_paths()).await;

    if !startup::wait_for_engine(&state.engine, PRE_SUBMIT_PROBES, PRE_SUBMIT_PROBE_INTERVAL).await
    {
        return Err(JobError::EngineUnreachable);
    }

    tracing::info!(
        %job_id,
        stage = %JobStage::Staging,
        inline = request.images.len(),
        remote = request.download_urls.len(),
        "Staging input assets",
    );
    let details = staging::upload_inline_assets(&state.engine, &request.images).await;
    if !details.is_empty() {
        return Err(JobError::InlineStaging { details });
    }
    let details = staging::stage_remote_assets(&state.engine, &state.http, &request.download_urls).await;
    if !details.is_empty() {
        return Err(JobError::RemoteStaging { details });
    }

    // Open the event stream before queuing so the terminal event
    // cannot arrive in the gap between submission and first receive.
    let client = ComfyClient::new(state.engine.clone(), state.config.ws_url());
    let stream = client.connect().await?;

    let credential = request
        .credential
        .as_deref()
        .or(state.config.engine_org_api_key.as_deref());
    let prompt_id = state
        .engine
        .submit_workflow(&request.workflow, client.client_id(), credential)
        .await?;
    tracing::info!(%job_id, stage = %JobStage::Submitted, prompt_id = %prompt_id, "Workflow submitted");

    tracing::info!(%job_id, stage = %JobStage::Monitoring, prompt_id = %prompt_id, "Monitoring execution");
    let exec_errors =
        match monitor_execution(&client, stream, &prompt_id, &state.config.monitor()).await? {
            ExecutionOutcome::Completed => Vec::new(),
            ExecutionOutcome::Failed(errors) => errors,
        };

    tracing::info!(%job_id, stage = %JobStage::Collecting, "Collecting output artifacts");
    let history = state.engine.get_history(&prompt_id).await?;
    let entry = history
        .get(&prompt_id)
        .ok_or_else(|| JobError::HistoryMiss(prompt_id.clone()))?;

    let (artifacts, output_errors) =
        outputs::collect_outputs(&state.engine, &state.http, &entry.outputs, &request.upload_urls)
            .await;

    let mut all_errors = exec_errors;
    all_errors.extend(output_errors);
    Ok(JobResult::from_collection(artifacts, all_errors))
}

/// Serialize and deliver the terminal callback. Failures are logged,
/// never escalated -- the job's outcome is already decided.
async fn notify(state: &AppState, url: &str, callback: JobCallback) {
    let job_id = callback.job_id;
    let payload = match serde_json::to_value(&callback) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(%job_id, error = %e, "Failed to serialize callback payload");
            return;
        }
    };

    if let Err(e) = state.notifier.deliver(url, &payload, "job-callback").await {
        tracing::error!(%job_id, error = %e, "Terminal callback not delivered");
    }
}
