//! Connection lifecycle for the control socket
//!
//! The manager owns the only session. Dependents never hold the session
//! directly; they [`acquire`](ConnectionManager::acquire) a [`SessionGuard`]
//! per high-level operation, which also serializes those operations.
//! Connect failures are recorded as a [`ConnectionError`], never returned.

use serde_json::json;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedMutexGuard, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigStore, ConfigStoreExt, ConnectionConfig};
use crate::constants::keys;
use crate::constants::protocol::close;
use crate::obs::{Connector, ControlSession, OpenError, OutputState, SessionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Why the last connect attempt failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Unable to connect. Check the URL and OBS Websocket settings.")]
    InvalidAddress,

    #[error("Unable to connect. Check the OBS Websocket password.")]
    AuthFailure,

    #[error("Unknown Error: {0}")]
    Unknown(String),
}

impl From<&OpenError> for ConnectionError {
    fn from(err: &OpenError) -> Self {
        match err {
            OpenError::InvalidAddress(_) | OpenError::Unreachable(_) | OpenError::ProtocolMismatch(_) => {
                ConnectionError::InvalidAddress
            }
            OpenError::Closed { code, .. } => match code {
                None | Some(close::ABNORMAL) | Some(close::UNSUPPORTED_RPC_VERSION) => {
                    ConnectionError::InvalidAddress
                }
                Some(close::AUTHENTICATION_FAILED) => ConnectionError::AuthFailure,
                Some(_) => ConnectionError::Unknown(diagnostic(err)),
            },
            OpenError::Malformed(_) | OpenError::Transport(_) => ConnectionError::Unknown(diagnostic(err)),
        }
    }
}

/// JSON description of a failure that fits no known category
fn diagnostic(err: &OpenError) -> String {
    let (kind, code) = match err {
        OpenError::InvalidAddress(_) => ("invalid_address", None),
        OpenError::Unreachable(_) => ("unreachable", None),
        OpenError::ProtocolMismatch(_) => ("protocol_mismatch", None),
        OpenError::Closed { code, .. } => ("closed", *code),
        OpenError::Malformed(_) => ("malformed", None),
        OpenError::Transport(_) => ("transport", None),
    };
    json!({ "kind": kind, "code": code, "reason": err.to_string() }).to_string()
}

/// Operation attempted without an open session
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("not connected to OBS")]
pub struct NotConnected;

/// Exclusive use of the session for one high-level operation
pub struct SessionGuard {
    session: Arc<dyn ControlSession>,
    _permit: OwnedMutexGuard<()>,
}

impl Deref for SessionGuard {
    type Target = dyn ControlSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

/// Records a stream start once per stopped→started transition
#[derive(Debug, Default)]
struct StreamEdge {
    live: bool,
}

impl StreamEdge {
    /// Returns true when `state` is a new start
    fn observe(&mut self, state: OutputState) -> bool {
        match state {
            OutputState::Started => !std::mem::replace(&mut self.live, true),
            OutputState::Stopped => {
                self.live = false;
                false
            }
            _ => false,
        }
    }
}

struct Inner {
    state: ConnectionState,
    error: Option<ConnectionError>,
    session: Option<Arc<dyn ControlSession>>,
    watcher: Option<JoinHandle<()>>,
    /// Bumped on every connect/disconnect so stale watchers can't clobber state
    generation: u64,
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    store: Arc<dyn ConfigStore>,
    inner: Arc<Mutex<Inner>>,
    permit: Arc<tokio::sync::Mutex<()>>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            connector,
            store,
            inner: Arc::new(Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                error: None,
                session: None,
                watcher: None,
                generation: 0,
            })),
            permit: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn state(&self) -> ConnectionState {
        let mut inner = lock(&self.inner);
        // Socket loss may not have been processed by the watcher yet
        if inner.state == ConnectionState::Connected
            && !inner.session.as_ref().is_some_and(|session| session.is_open())
        {
            inner.state = ConnectionState::Disconnected;
            inner.session = None;
        }
        inner.state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn error(&self) -> Option<ConnectionError> {
        lock(&self.inner).error.clone()
    }

    /// Open a session; on failure the classified error is kept in [`error`](Self::error)
    pub async fn connect(&self, config: &ConnectionConfig) {
        let (attempt, previous) = {
            let mut inner = lock(&self.inner);
            inner.generation += 1;
            inner.state = ConnectionState::Connecting;
            (inner.generation, (inner.session.take(), inner.watcher.take()))
        };
        if let (Some(session), watcher) = previous {
            info!("Replacing existing control socket session");
            if let Some(watcher) = watcher {
                watcher.abort();
            }
            session.close().await;
        }

        info!(host = %config.host, port = config.port, "Connecting to OBS");
        let result = if config.host.trim().is_empty() {
            Err(OpenError::InvalidAddress(config.address()))
        } else {
            self.connector.open(config).await
        };

        if let Some(stale) = self.settle_attempt(attempt, result, config) {
            stale.close().await;
        }
    }

    /// Record the outcome of connect attempt `attempt`; hands back a session
    /// that arrived after a newer connect/disconnect so the caller can close it
    fn settle_attempt(
        &self,
        attempt: u64,
        result: Result<Arc<dyn ControlSession>, OpenError>,
        config: &ConnectionConfig,
    ) -> Option<Arc<dyn ControlSession>> {
        let mut inner = lock(&self.inner);
        if inner.generation != attempt {
            debug!("Connect attempt superseded");
            return result.ok();
        }
        match result {
            Ok(session) => {
                let watcher = self.spawn_watcher(session.subscribe(), attempt);
                inner.state = ConnectionState::Connected;
                inner.error = None;
                inner.session = Some(session);
                inner.watcher = Some(watcher);
                info!(host = %config.host, port = config.port, "Connected to OBS");
            }
            Err(err) => {
                let classified = ConnectionError::from(&err);
                error!(error = %err, classified = ?classified, "Failed to connect to OBS");
                inner.state = ConnectionState::Disconnected;
                inner.error = Some(classified);
            }
        }
        None
    }

    /// Tear down the session if any; always leaves Disconnected with no error
    pub async fn disconnect(&self) {
        let (session, watcher) = {
            let mut inner = lock(&self.inner);
            inner.generation += 1;
            inner.state = ConnectionState::Disconnected;
            inner.error = None;
            (inner.session.take(), inner.watcher.take())
        };
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        match session {
            Some(session) => {
                session.close().await;
                info!("Disconnected from OBS");
            }
            None => debug!("Disconnect requested while already disconnected"),
        }
    }

    /// Wait for exclusive use of the session
    pub async fn acquire(&self) -> Result<SessionGuard, NotConnected> {
        let permit = self.permit.clone().lock_owned().await;
        if !self.is_connected() {
            return Err(NotConnected);
        }
        let session = lock(&self.inner).session.clone().ok_or(NotConnected)?;
        Ok(SessionGuard {
            session,
            _permit: permit,
        })
    }

    fn spawn_watcher(&self, mut events: broadcast::Receiver<SessionEvent>, generation: u64) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut edge = StreamEdge::default();
            loop {
                match events.recv().await {
                    Ok(SessionEvent::StreamStateChanged { active, state }) => {
                        debug!(active, state = ?state, "Stream state changed");
                        if edge.observe(state) {
                            let now = chrono::Utc::now().timestamp_millis();
                            info!(timestamp = now, "Stream started");
                            if let Err(e) = store.set(keys::STREAM_START, now) {
                                error!(error = ?e, "Failed to save stream start time");
                            }
                        }
                    }
                    Ok(SessionEvent::Closed { code, reason }) => {
                        let mut inner = lock(&inner);
                        if inner.generation == generation {
                            warn!(code = ?code, reason = %reason, "Lost connection to OBS");
                            inner.state = ConnectionState::Disconnected;
                            inner.session = None;
                            inner.watcher = None;
                        }
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Session events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
