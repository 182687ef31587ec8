use std::sync::Arc;

use spindle_comfyui::api::ComfyApi;
use tokio::sync::Mutex;

use crate::callback::Notifier;
use crate::config::WorkerConfig;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// Cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Worker configuration.
    pub config: Arc<WorkerConfig>,
    /// Shared HTTP client (remote asset fetches, artifact pushes).
    pub http: reqwest::Client,
    /// REST client for the engine instance this worker fronts.
    pub engine: ComfyApi,
    /// Callback delivery capability, injected so tests can observe
    /// deliveries without HTTP.
    pub notifier: Arc<dyn Notifier>,
    /// Single-flight job slot. Job execution holds this for its whole
    /// duration so scratch-directory cleanup never races another job.
    pub job_slot: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: WorkerConfig, http: reqwest::Client, notifier: Arc<dyn Notifier>) -> Self {
        let engine = ComfyApi::with_client(http.clone(), config.api_url());
        Self {
            config: Arc::new(config),
            http,
            engine,
            notifier,
            job_slot: Arc::new(Mutex::new(())),
        }
    }
}
