//! ComfyUI WebSocket and REST client library.
//!
//! Provides typed message parsing, clientId-scoped WebSocket
//! connections, HTTP API wrappers (submission, history, artifact
//! transfer), and the streaming-execution monitor with bounded
//! reconnection used by the worker to observe a single job.

pub mod api;
pub mod client;
pub mod messages;
pub mod monitor;
pub mod reconnect;
