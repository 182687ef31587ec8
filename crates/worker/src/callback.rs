//! Callback delivery with bounded fixed-delay retry.
//!
//! [`HttpNotifier`] POSTs a JSON payload to a caller-supplied URL and
//! retries up to three times. Delivery is best-effort: exhausting the
//! attempts is logged by callers, never folded back into the job's
//! already-computed terminal status.

use std::time::Duration;

use async_trait::async_trait;

/// Number of delivery attempts before giving up.
const DELIVERY_ATTEMPTS: u32 = 3;

/// Fixed delay between attempts.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for callback delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote endpoint answered with an error status.
    #[error("Callback returned HTTP {0}")]
    HttpStatus(u16),
}

/// One-shot notification capability injected into the orchestrator.
///
/// `label` names the delivery in diagnostics (`job-callback`,
/// `ready-callback`).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(
        &self,
        url: &str,
        payload: &serde_json::Value,
        label: &str,
    ) -> Result<(), NotifyError>;
}

/// Production notifier: HTTP POST with bounded retry.
pub struct HttpNotifier {
    client: reqwest::Client,
}

impl HttpNotifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, url: &str, payload: &serde_json::Value) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(url)
            .timeout(REQUEST_TIMEOUT)
            .json(payload)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status >= 300 {
            return Err(NotifyError::HttpStatus(status));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn deliver(
        &self,
        url: &str,
        payload: &serde_json::Value,
        label: &str,
    ) -> Result<(), NotifyError> {
        for attempt in 1..DELIVERY_ATTEMPTS {
            match self.try_send(url, payload).await {
                Ok(()) => {
                    tracing::info!(label, attempt, "Callback delivered");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(label, attempt, error = %e, "Callback attempt failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }

        // Final attempt after the last delay.
        match self.try_send(url, payload).await {
            Ok(()) => {
                tracing::info!(label, attempt = DELIVERY_ATTEMPTS, "Callback delivered");
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    label,
                    url,
                    error = %e,
                    "Callback failed after {DELIVERY_ATTEMPTS} attempts",
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording [`Notifier`] used by orchestrator and handler tests.

    use super::*;

    /// One captured delivery.
    #[derive(Debug, Clone)]
    pub(crate) struct Delivery {
        pub url: String,
        pub payload: serde_json::Value,
        pub label: String,
    }

    /// Captures every delivery instead of performing HTTP.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub deliveries: std::sync::Mutex<Vec<Delivery>>,
    }

    impl RecordingNotifier {
        pub(crate) fn captured(&self) -> Vec<Delivery> {
            self.deliveries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn deliver(
            &self,
            url: &str,
            payload: &serde_json::Value,
            label: &str,
        ) -> Result<(), NotifyError> {
            self.deliveries.lock().unwrap().push(Delivery {
                url: url.to_string(),
                payload: payload.clone(),
                label: label.to_string(),
            });
            Ok(())
        }
    }
}
