//! Worker configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use spindle_comfyui::monitor::MonitorConfig;

/// Configuration for the sidecar process.
///
/// All fields have defaults suitable for running next to a local
/// ComfyUI instance. Override via environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8189`).
    pub port: u16,
    /// Bearer token required on `POST /run`. Unset disables the check.
    pub api_key: Option<String>,
    /// Identifier reported in health and ready payloads.
    pub worker_id: String,
    /// Engine host:port, used for both HTTP and WebSocket URLs.
    pub engine_host: String,
    /// Engine installation root holding the scratch directories.
    pub engine_root: PathBuf,
    /// Fallback third-party asset-provider key for submissions.
    pub engine_org_api_key: Option<String>,
    /// Where the startup ready callback is delivered, if anywhere.
    pub ready_callback_url: Option<String>,
    /// Liveness poll budget while waiting for the engine at startup.
    pub ready_max_retries: u32,
    /// Delay between startup liveness polls.
    pub ready_interval: Duration,
    /// Reconnect budget for a lost event stream.
    pub reconnect_attempts: u32,
    /// Fixed delay between stream reconnect attempts.
    pub reconnect_delay: Duration,
    /// HTTP request timeout for the worker's own surface, in seconds.
    pub request_timeout_secs: u64,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default          |
    /// |------------------------------|------------------|
    /// | `HOST`                       | `0.0.0.0`        |
    /// | `PORT`                       | `8189`           |
    /// | `WORKER_API_KEY`             | unset            |
    /// | `WORKER_ID`                  | `unknown`        |
    /// | `ENGINE_HOST`                | `127.0.0.1:8188` |
    /// | `ENGINE_ROOT`                | `/comfyui`       |
    /// | `ENGINE_ORG_API_KEY`         | unset            |
    /// | `READY_CALLBACK_URL`         | unset            |
    /// | `ENGINE_READY_MAX_RETRIES`   | `600`            |
    /// | `ENGINE_READY_INTERVAL_SECS` | `1`              |
    /// | `STREAM_RECONNECT_ATTEMPTS`  | `5`              |
    /// | `STREAM_RECONNECT_DELAY_SECS`| `3`              |
    /// | `REQUEST_TIMEOUT_SECS`       | `30`             |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8189".into())
            .parse()
            .expect("PORT must be a valid u16");

        let api_key = std::env::var("WORKER_API_KEY").ok().filter(|k| !k.is_empty());
        let worker_id = std::env::var("WORKER_ID").unwrap_or_else(|_| "unknown".into());

        let engine_host =
            std::env::var("ENGINE_HOST").unwrap_or_else(|_| "127.0.0.1:8188".into());
        let engine_root =
            PathBuf::from(std::env::var("ENGINE_ROOT").unwrap_or_else(|_| "/comfyui".into()));
        let engine_org_api_key = std::env::var("ENGINE_ORG_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());

        let ready_callback_url = std::env::var("READY_CALLBACK_URL")
            .ok()
            .filter(|u| !u.is_empty());

        Self {
            host,
            port,
            api_key,
            worker_id,
            engine_host,
            engine_root,
            engine_org_api_key,
            ready_callback_url,
            ready_max_retries: env_u32("ENGINE_READY_MAX_RETRIES", 600),
            ready_interval: Duration::from_secs(env_u64("ENGINE_READY_INTERVAL_SECS", 1)),
            reconnect_attempts: env_u32("STREAM_RECONNECT_ATTEMPTS", 5),
            reconnect_delay: Duration::from_secs(env_u64("STREAM_RECONNECT_DELAY_SECS", 3)),
            request_timeout_secs: env_u64("REQUEST_TIMEOUT_SECS", 30),
        }
    }

    /// Engine HTTP base URL.
    pub fn api_url(&self) -> String {
        format!("http://{}", self.engine_host)
    }

    /// Engine WebSocket base URL.
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.engine_host)
    }

    /// Monitoring policy derived from this configuration.
    pub fn monitor(&self) -> MonitorConfig {
        MonitorConfig {
            reconnect_attempts: self.reconnect_attempts,
            reconnect_delay: self.reconnect_delay,
            ..MonitorConfig::default()
        }
    }

    /// Paths exempt from scratch-directory cleanup.
    pub fn preserve_paths(&self) -> Vec<PathBuf> {
        vec![self.engine_root.join("input").join("demo")]
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A config pointing at an unroutable engine, for handler and
    /// orchestrator tests.
    pub(crate) fn test_config() -> WorkerConfig {
        WorkerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            api_key: None,
            worker_id: "test-worker".into(),
            engine_host: "127.0.0.1:9".into(),
            engine_root: PathBuf::from("/tmp/engine"),
            engine_org_api_key: None,
            ready_callback_url: None,
            ready_max_retries: 1,
            ready_interval: Duration::from_millis(1),
            reconnect_attempts: 2,
            reconnect_delay: Duration::from_millis(1),
            request_timeout_secs: 5,
        }
    }
}
