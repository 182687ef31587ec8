//! Bounded reconnection for a lost event stream.
//!
//! When the connection scoped to an execution drops, the monitor calls
//! [`reconnect`] to restore it: up to a configured number of attempts,
//! separated by a fixed delay, each preceded by a liveness probe. If
//! the engine itself is down there is no point hammering the stream
//! layer, so a failed probe aborts immediately.

use crate::monitor::{MonitorConfig, MonitorError, StreamSource};

/// Attempt to restore the event stream within the configured budget.
///
/// Returns a fresh stream scoped to the same client id on success.
/// Fails with [`MonitorError::EngineUnreachable`] as soon as a
/// liveness probe fails, or [`MonitorError::ReconnectExhausted`] once
/// every attempt has been spent.
pub async fn reconnect<S: StreamSource>(
    source: &S,
    config: &MonitorConfig,
) -> Result<S::Stream, MonitorError> {
    for attempt in 1..=config.reconnect_attempts {
        if !source.probe().await {
            tracing::warn!(attempt, "Engine liveness probe failed during reconnect");
            return Err(MonitorError::EngineUnreachable);
        }

        match source.connect().await {
            Ok(stream) => {
                tracing::info!(attempt, "Event stream reconnected");
                return Ok(stream);
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
                if attempt < config.reconnect_attempts {
                    tokio::time::sleep(config.reconnect_delay).await;
                }
            }
        }
    }

    Err(MonitorError::ReconnectExhausted {
        attempts: config.reconnect_attempts,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::client::ClientError;
    use crate::monitor::testing::{frames, ScriptedSource};
    use assert_matches::assert_matches;

    fn config(attempts: u32) -> MonitorConfig {
        MonitorConfig {
            reconnect_attempts: attempts,
            reconnect_delay: Duration::from_millis(1),
            ..MonitorConfig::default()
        }
    }

    #[tokio::test]
    async fn returns_stream_on_first_success() {
        let source = ScriptedSource::new(vec![Ok(frames(Vec::new()))]);
        assert!(reconnect(&source, &config(5)).await.is_ok());
        assert_eq!(source.attempts(), 1);
    }

    #[tokio::test]
    async fn retries_until_budget_spent() {
        let source = ScriptedSource::new(vec![
            Err(ClientError::Connection("refused".into())),
            Err(ClientError::Connection("refused".into())),
            Err(ClientError::Connection("refused".into())),
        ]);

        let err = reconnect(&source, &config(3)).await.unwrap_err();
        assert_matches!(err, MonitorError::ReconnectExhausted { attempts: 3 });
        assert_eq!(source.attempts(), 3);
    }

    #[tokio::test]
    async fn failed_probe_skips_stream_attempts_entirely() {
        let source = ScriptedSource::unreachable_engine();

        let err = reconnect(&source, &config(5)).await.unwrap_err();
        assert_matches!(err, MonitorError::EngineUnreachable);
        assert_eq!(source.attempts(), 0);
    }
}
