//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyClient`] holds the connection configuration for one job's
//! event stream. The client id is generated once at construction and
//! reused for every (re)connect so all connections stay scoped to the
//! same submission.

use std::time::Duration;

use async_trait::async_trait;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::api::ComfyApi;
use crate::monitor::StreamSource;

/// Timeout for the WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The concrete frame stream produced by a live connection.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// WebSocket client bound to one ComfyUI instance and one client id.
pub struct ComfyClient {
    api: ComfyApi,
    ws_url: String,
    client_id: String,
}

/// Errors that can occur when establishing the event stream.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}

impl ComfyClient {
    /// Create a client targeting a ComfyUI instance.
    ///
    /// * `api`    - REST client for the same instance (used for liveness probes).
    /// * `ws_url` - WebSocket base URL, e.g. `ws://127.0.0.1:8188`.
    ///
    /// Generates a fresh client id (UUID v4); pass it to workflow
    /// submission so the engine addresses events to this stream.
    pub fn new(api: ComfyApi, ws_url: String) -> Self {
        Self {
            api,
            ws_url,
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// The client id sent during the WebSocket handshake.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// WebSocket base URL (e.g. `ws://127.0.0.1:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Connect to the engine's WebSocket endpoint, scoped to this
    /// client's id.
    pub async fn connect(&self) -> Result<WsStream, ClientError> {
        let url = format!("{}/ws?clientId={}", self.ws_url, self.client_id);

        let (ws_stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&url))
            .await
            .map_err(|_| {
                ClientError::Connection(format!(
                    "Timed out connecting to ComfyUI at {}",
                    self.ws_url
                ))
            })?
            .map_err(|e| {
                ClientError::Connection(format!(
                    "Failed to connect to ComfyUI at {}: {e}",
                    self.ws_url
                ))
            })?;

        tracing::info!(
            client_id = %self.client_id,
            "Connected to ComfyUI at {}",
            self.ws_url,
        );

        Ok(ws_stream)
    }
}

#[async_trait]
impl StreamSource for ComfyClient {
    type Stream = WsStream;

    async fn probe(&self) -> bool {
        self.api.check_ready().await
    }

    async fn connect(&self) -> Result<Self::Stream, ClientError> {
        ComfyClient::connect(self).await
    }
}
