//! Control-socket session to OBS Studio
//!
//! [`Connector`] opens sessions, [`ControlSession`] is one open session. The
//! WebSocket implementation lives in [`client`]; tests use the scripted fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::ConnectionConfig;

pub mod client;
pub mod protocol;

#[cfg(test)]
pub mod fake;

pub use client::WebSocketConnector;

/// `outputState` values of StreamStateChanged
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    #[serde(rename = "OBS_WEBSOCKET_OUTPUT_STARTING")]
    Starting,
    #[serde(rename = "OBS_WEBSOCKET_OUTPUT_STARTED")]
    Started,
    #[serde(rename = "OBS_WEBSOCKET_OUTPUT_STOPPING")]
    Stopping,
    #[serde(rename = "OBS_WEBSOCKET_OUTPUT_STOPPED")]
    Stopped,
    #[serde(rename = "OBS_WEBSOCKET_OUTPUT_RECONNECTING")]
    Reconnecting,
    #[serde(rename = "OBS_WEBSOCKET_OUTPUT_RECONNECTED")]
    Reconnected,
    #[serde(other)]
    Other,
}

/// Notifications published by an open session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Stream output changed state
    StreamStateChanged { active: bool, state: OutputState },

    /// Socket closed; no further events follow
    Closed { code: Option<u16>, reason: String },
}

/// Failure of a single request on an open session
#[derive(Debug, Clone, thiserror::Error)]
pub enum RequestError {
    #[error("request rejected (code {code}): {}", comment.as_deref().unwrap_or("no comment"))]
    Rejected { code: u16, comment: Option<String> },

    #[error("session closed before a response arrived")]
    SessionClosed,

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Failure to open a session; classified into a `ConnectionError` by the manager
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("invalid control socket address '{0}'")]
    InvalidAddress(String),

    #[error("control socket unreachable: {0}")]
    Unreachable(#[source] std::io::Error),

    #[error("endpoint is not a control socket: {0}")]
    ProtocolMismatch(String),

    #[error("session closed during handshake (code {code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },

    #[error("malformed handshake: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// One open control-socket session
#[async_trait]
pub trait ControlSession: Send + Sync {
    /// Scene names in the tool's native order
    async fn list_scenes(&self) -> Result<Vec<String>, RequestError>;

    async fn set_current_scene(&self, scene: &str) -> Result<(), RequestError>;

    /// Names of inputs of `kind`, in the tool's order
    async fn list_inputs(&self, kind: &str) -> Result<Vec<String>, RequestError>;

    async fn get_input_settings(&self, name: &str) -> Result<Map<String, Value>, RequestError>;

    /// Patch settings; `overlay = true` merges instead of replacing
    async fn set_input_settings(
        &self,
        name: &str,
        patch: Map<String, Value>,
        overlay: bool,
    ) -> Result<(), RequestError>;

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    fn is_open(&self) -> bool;

    async fn close(&self);
}

/// Opens sessions
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, config: &ConnectionConfig) -> Result<Arc<dyn ControlSession>, OpenError>;
}
