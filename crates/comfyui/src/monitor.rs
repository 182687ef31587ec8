//! Streaming-execution monitor for one submitted workflow.
//!
//! Observes the event stream scoped to a single execution handle and
//! classifies the job outcome. A matching `executing` event with no
//! node reference means the whole prompt finished; a matching
//! `execution_error` terminates monitoring immediately. Everything
//! else -- progress events, other prompts' events, undecodable frames --
//! is ignored without terminating.
//!
//! Connection loss is handled by an explicit state machine
//! ([`StreamState`]) with bounded reconnection via
//! [`reconnect`](crate::reconnect::reconnect). No events are replayed
//! after a reconnect; the monitor relies solely on the next terminal
//! event, never on cumulative state.

use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::client::ClientError;
use crate::messages::{parse_message, ComfyMessage};
use crate::reconnect::reconnect;

/// Receive error type of the underlying frame stream.
pub type WsError = tokio_tungstenite::tungstenite::Error;

/// Source of event streams for one execution, probe included.
///
/// The production implementation is [`ComfyClient`](crate::client::ComfyClient);
/// tests substitute scripted sources.
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Frame stream produced by a successful connection.
    type Stream: Stream<Item = Result<Message, WsError>> + Unpin + Send;

    /// Probe the engine's liveness endpoint.
    async fn probe(&self) -> bool;

    /// Open a fresh event stream scoped to this source's client id.
    async fn connect(&self) -> Result<Self::Stream, ClientError>;
}

/// Tunables for the monitoring loop.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Maximum reconnection attempts after a connection loss.
    pub reconnect_attempts: u32,
    /// Fixed delay between reconnection attempts.
    pub reconnect_delay: Duration,
    /// How long a single receive may stay quiet before it is re-polled.
    pub recv_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(3),
            recv_timeout: Duration::from_secs(10),
        }
    }
}

/// Terminal classification of one monitored execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The engine reported the whole prompt finished.
    Completed,
    /// The engine reported a node failure; entries describe each error.
    Failed(Vec<String>),
}

/// Terminal monitoring failures (distinct from an engine-reported
/// execution error, which is an [`ExecutionOutcome::Failed`]).
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The connection dropped and could not be restored within budget.
    #[error("Event stream closed; failed to reconnect after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// The engine's liveness probe failed while reconnecting.
    #[error("ComfyUI unreachable during reconnect")]
    EngineUnreachable,
}

/// Connection states of the event stream for one job.
///
/// At most one connection is active at any time; a new one is only
/// attempted after the previous is confirmed closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connected,
    Disconnected,
    Reconnecting,
    Exhausted,
}

/// How a single connection session ended.
#[derive(Debug)]
enum SessionEnd {
    Completed,
    Errored(Vec<String>),
    Disconnected,
}

/// What a single decoded frame means for this execution.
enum Signal {
    Finished,
    NodeError(String),
    Ignore,
}

/// Monitor an execution until a terminal event arrives or reconnection
/// is exhausted.
///
/// `stream` is the already-open connection used for submission; on
/// loss, fresh connections come from `source`.
pub async fn monitor_execution<S: StreamSource>(
    source: &S,
    stream: S::Stream,
    prompt_id: &str,
    config: &MonitorConfig,
) -> Result<ExecutionOutcome, MonitorError> {
    let mut stream = stream;
    let mut state = StreamState::Connected;
    let mut reconnect_err: Option<MonitorError> = None;

    loop {
        match state {
            StreamState::Connected => {
                match run_session(&mut stream, prompt_id, config.recv_timeout).await {
                    SessionEnd::Completed => return Ok(ExecutionOutcome::Completed),
                    SessionEnd::Errored(entries) => return Ok(ExecutionOutcome::Failed(entries)),
                    SessionEnd::Disconnected => state = StreamState::Disconnected,
                }
            }
            StreamState::Disconnected => {
                tracing::warn!(prompt_id, "Event stream lost, entering reconnect");
                state = StreamState::Reconnecting;
            }
            StreamState::Reconnecting => match reconnect(source, config).await {
                Ok(fresh) => {
                    stream = fresh;
                    state = StreamState::Connected;
                }
                Err(e) => {
                    reconnect_err = Some(e);
                    state = StreamState::Exhausted;
                }
            },
            StreamState::Exhausted => {
                return Err(reconnect_err.take().unwrap_or(
                    MonitorError::ReconnectExhausted {
                        attempts: config.reconnect_attempts,
                    },
                ));
            }
        }
    }
}

/// Drive one connection until a terminal event or a disconnect.
///
/// A quiet stream is re-polled on receive timeout rather than treated
/// as an error.
async fn run_session<St>(stream: &mut St, prompt_id: &str, recv_timeout: Duration) -> SessionEnd
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let frame = match tokio::time::timeout(recv_timeout, stream.next()).await {
            Err(_elapsed) => continue,
            Ok(None) => {
                tracing::info!(prompt_id, "Event stream exhausted");
                return SessionEnd::Disconnected;
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(prompt_id, error = %e, "WebSocket receive error");
                return SessionEnd::Disconnected;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => match classify(&text, prompt_id) {
                Signal::Finished => {
                    tracing::info!(prompt_id, "Execution completed (all nodes done)");
                    return SessionEnd::Completed;
                }
                Signal::NodeError(entry) => {
                    return SessionEnd::Errored(vec![entry]);
                }
                Signal::Ignore => {}
            },
            Message::Binary(_) => {
                // ComfyUI sends binary frames for preview images.
                tracing::trace!(prompt_id, "Ignoring binary frame (preview image)");
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Handled automatically by tungstenite.
            }
            Message::Close(close_frame) => {
                tracing::info!(prompt_id, ?close_frame, "ComfyUI closed the event stream");
                return SessionEnd::Disconnected;
            }
            Message::Frame(_) => {}
        }
    }
}

/// Classify a text frame against this execution's handle.
fn classify(text: &str, prompt_id: &str) -> Signal {
    let msg = match parse_message(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::trace!(error = %e, "Ignoring undecodable message");
            return Signal::Ignore;
        }
    };

    match msg {
        ComfyMessage::Executing(data) if data.prompt_id == prompt_id => {
            match data.node {
                // No node reference: the whole prompt is done.
                None => Signal::Finished,
                Some(node) => {
                    tracing::debug!(prompt_id, node = %node, "Executing node");
                    Signal::Ignore
                }
            }
        }
        ComfyMessage::ExecutionError(data) if data.prompt_id == prompt_id => {
            tracing::error!(
                prompt_id,
                node_id = %data.node_id,
                node_type = %data.node_type,
                error_message = %data.exception_message,
                "Execution error",
            );
            Signal::NodeError(data.describe())
        }
        _ => Signal::Ignore,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use assert_matches::assert_matches;

    fn quick_config(attempts: u32) -> MonitorConfig {
        MonitorConfig {
            reconnect_attempts: attempts,
            reconnect_delay: Duration::from_millis(5),
            recv_timeout: Duration::from_millis(200),
        }
    }

    const DONE_P1: &str = r#"{"type":"executing","data":{"node":null,"prompt_id":"P1"}}"#;

    #[tokio::test]
    async fn completion_requires_empty_node_and_matching_prompt() {
        let stream = frames(vec![
            text(r#"{"type":"executing","data":{"node":"5","prompt_id":"P1"}}"#),
            text(r#"{"type":"progress","data":{"value":3,"max":20}}"#),
            // Another prompt finishing must not complete ours.
            text(r#"{"type":"executing","data":{"node":null,"prompt_id":"OTHER"}}"#),
            text(DONE_P1),
        ]);
        let source = ScriptedSource::new(Vec::new());

        let outcome = monitor_execution(&source, stream, "P1", &quick_config(3))
            .await
            .unwrap();

        assert_eq!(outcome, ExecutionOutcome::Completed);
        assert_eq!(source.attempts(), 0);
    }

    #[tokio::test]
    async fn execution_error_terminates_before_later_events() {
        // Both a node error and a (would-be) completion are queued; the
        // error must win because monitoring stops at the first match.
        let stream = frames(vec![
            text(r#"{"type":"execution_error","data":{"prompt_id":"P1","node_id":"3","node_type":"KSampler","exception_message":"OOM"}}"#),
            text(DONE_P1),
        ]);
        let source = ScriptedSource::new(Vec::new());

        let outcome = monitor_execution(&source, stream, "P1", &quick_config(3))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ExecutionOutcome::Failed(vec!["Node 3 (KSampler): OOM".to_string()])
        );
    }

    #[tokio::test]
    async fn foreign_errors_and_garbage_are_ignored() {
        let stream = frames(vec![
            text("{not json"),
            text(r#"{"type":"surprise","data":{}}"#),
            text(r#"{"type":"execution_error","data":{"prompt_id":"OTHER","node_id":"1","node_type":"X","exception_message":"nope"}}"#),
            text(DONE_P1),
        ]);
        let source = ScriptedSource::new(Vec::new());

        let outcome = monitor_execution(&source, stream, "P1", &quick_config(3))
            .await
            .unwrap();

        assert_eq!(outcome, ExecutionOutcome::Completed);
    }

    #[tokio::test]
    async fn reconnect_resumes_monitoring_after_connection_loss() {
        // Initial stream dies, two reconnects fail, the third delivers
        // the completion event.
        let initial = frames(vec![Err(WsError::ConnectionClosed)]);
        let source = ScriptedSource::new(vec![
            Err(ClientError::Connection("refused".into())),
            Err(ClientError::Connection("refused".into())),
            Ok(frames(vec![text(DONE_P1)])),
        ]);

        let outcome = monitor_execution(&source, initial, "P1", &quick_config(3))
            .await
            .unwrap();

        assert_eq!(outcome, ExecutionOutcome::Completed);
        assert_eq!(source.attempts(), 3);
    }

    #[tokio::test]
    async fn reconnect_exhaustion_fails_the_job() {
        let initial = frames(vec![Ok(Message::Close(None))]);
        let source = ScriptedSource::new(Vec::new());

        let err = monitor_execution(&source, initial, "P1", &quick_config(2))
            .await
            .unwrap_err();

        assert_matches!(err, MonitorError::ReconnectExhausted { attempts: 2 });
        assert_eq!(source.attempts(), 2);
    }

    #[tokio::test]
    async fn unreachable_engine_fails_fast_without_stream_attempts() {
        let initial = frames(vec![]);
        let source = ScriptedSource::unreachable_engine();

        let err = monitor_execution(&source, initial, "P1", &quick_config(5))
            .await
            .unwrap_err();

        assert_matches!(err, MonitorError::EngineUnreachable);
        assert_eq!(source.attempts(), 0);
    }

    #[tokio::test]
    async fn quiet_stream_is_repolled_until_an_event_arrives() {
        // The completion event only arrives after several receive
        // timeouts have elapsed; each timeout must re-poll, not error.
        let (tx, mut rx) = futures::channel::mpsc::unbounded();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            tx.unbounded_send(text(DONE_P1)).unwrap();
        });

        let end = run_session(&mut rx, "P1", Duration::from_millis(5)).await;
        assert_matches!(end, SessionEnd::Completed);
    }
}
