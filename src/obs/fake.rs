//! Scripted in-memory session for component tests

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use super::{Connector, ControlSession, OpenError, OutputState, RequestError, SessionEvent};
use crate::config::ConnectionConfig;

/// Calls recorded in the order they were issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListScenes,
    SetCurrentScene(String),
    ListInputs(String),
    GetInputSettings(String),
    SetInputSettings { name: String, patch: Map<String, Value>, overlay: bool },
}

pub struct FakeSession {
    scenes: Vec<String>,
    /// (name, settings) in the tool's order
    inputs: Mutex<Vec<(String, Map<String, Value>)>>,
    failing_reads: Mutex<HashSet<String>>,
    failing_writes: Mutex<HashSet<String>>,
    calls: Mutex<Vec<Call>>,
    events: broadcast::Sender<SessionEvent>,
    open: AtomicBool,
}

impl Default for FakeSession {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSession {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            scenes: Vec::new(),
            inputs: Mutex::new(Vec::new()),
            failing_reads: Mutex::new(HashSet::new()),
            failing_writes: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            events,
            open: AtomicBool::new(true),
        }
    }

    pub fn with_scenes(mut self, scenes: &[&str]) -> Self {
        self.scenes = scenes.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Add a browser source whose settings hold `url` plus one unrelated setting
    pub fn with_source(self, name: &str, url: &str) -> Self {
        let settings = json!({ "url": url, "width": 1920 });
        self.with_settings(name, settings.as_object().cloned().unwrap_or_default())
    }

    pub fn with_settings(self, name: &str, settings: Map<String, Value>) -> Self {
        self.inputs.lock().unwrap().push((name.to_string(), settings));
        self
    }

    pub fn fail_reads_of(self, name: &str) -> Self {
        self.failing_reads.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn fail_writes_to(self, name: &str) -> Self {
        self.failing_writes.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn scene_switches(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::SetCurrentScene(scene) => Some(scene),
                _ => None,
            })
            .collect()
    }

    pub fn url_of(&self, name: &str) -> Option<String> {
        self.inputs
            .lock()
            .unwrap()
            .iter()
            .find(|(input, _)| input == name)
            .and_then(|(_, settings)| settings.get("url").and_then(Value::as_str).map(str::to_string))
    }

    pub fn settings_of(&self, name: &str) -> Option<Map<String, Value>> {
        self.inputs
            .lock()
            .unwrap()
            .iter()
            .find(|(input, _)| input == name)
            .map(|(_, settings)| settings.clone())
    }

    pub fn emit_stream_state(&self, state: OutputState) {
        let active = matches!(state, OutputState::Started | OutputState::Reconnected);
        let _ = self.events.send(SessionEvent::StreamStateChanged { active, state });
    }

    /// Simulate the socket dropping
    pub fn drop_socket(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.events.send(SessionEvent::Closed {
            code: Some(1006),
            reason: "socket lost".to_string(),
        });
    }

    fn record(&self, call: Call) -> Result<(), RequestError> {
        self.calls.lock().unwrap().push(call);
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RequestError::SessionClosed)
        }
    }
}

#[async_trait]
impl ControlSession for FakeSession {
    async fn list_scenes(&self) -> Result<Vec<String>, RequestError> {
        self.record(Call::ListScenes)?;
        Ok(self.scenes.clone())
    }

    async fn set_current_scene(&self, scene: &str) -> Result<(), RequestError> {
        self.record(Call::SetCurrentScene(scene.to_string()))?;
        if self.scenes.is_empty() || self.scenes.iter().any(|s| s == scene) {
            Ok(())
        } else {
            Err(RequestError::Rejected {
                code: 600,
                comment: Some(format!("No scene named {scene}")),
            })
        }
    }

    async fn list_inputs(&self, kind: &str) -> Result<Vec<String>, RequestError> {
        self.record(Call::ListInputs(kind.to_string()))?;
        Ok(self.inputs.lock().unwrap().iter().map(|(name, _)| name.clone()).collect())
    }

    async fn get_input_settings(&self, name: &str) -> Result<Map<String, Value>, RequestError> {
        self.record(Call::GetInputSettings(name.to_string()))?;
        if self.failing_reads.lock().unwrap().contains(name) {
            return Err(RequestError::SessionClosed);
        }
        self.settings_of(name).ok_or(RequestError::Rejected {
            code: 600,
            comment: Some(format!("No source named {name}")),
        })
    }

    async fn set_input_settings(
        &self,
        name: &str,
        patch: Map<String, Value>,
        overlay: bool,
    ) -> Result<(), RequestError> {
        self.record(Call::SetInputSettings {
            name: name.to_string(),
            patch: patch.clone(),
            overlay,
        })?;
        if self.failing_writes.lock().unwrap().contains(name) {
            return Err(RequestError::Rejected {
                code: 702,
                comment: Some("Settings write failed".to_string()),
            });
        }
        let mut inputs = self.inputs.lock().unwrap();
        let Some((_, settings)) = inputs.iter_mut().find(|(input, _)| input == name) else {
            return Err(RequestError::Rejected {
                code: 600,
                comment: Some(format!("No source named {name}")),
            });
        };
        if overlay {
            settings.extend(patch);
        } else {
            *settings = patch;
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Connector that hands out a prepared session, or fails with a scripted error
pub struct FakeConnector {
    session: Option<Arc<FakeSession>>,
    pub failure: Mutex<Option<OpenError>>,
    pub attempts: Mutex<Vec<ConnectionConfig>>,
}

impl FakeConnector {
    pub fn succeeding(session: Arc<FakeSession>) -> Self {
        Self {
            session: Some(session),
            failure: Mutex::new(None),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: OpenError) -> Self {
        Self {
            session: None,
            failure: Mutex::new(Some(error)),
            attempts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, config: &ConnectionConfig) -> Result<Arc<dyn ControlSession>, OpenError> {
        self.attempts.lock().unwrap().push(config.clone());
        if let Some(error) = self.failure.lock().unwrap().take() {
            return Err(error);
        }
        match &self.session {
            Some(session) => {
                session.open.store(true, Ordering::SeqCst);
                Ok(session.clone() as Arc<dyn ControlSession>)
            }
            None => Err(OpenError::Transport("no scripted session".to_string())),
        }
    }
}
