//! Typed views over the settings store

use anyhow::Result;
use serde::Serialize;

use super::store::{ConfigStore, ConfigStoreExt};
use crate::constants::keys;

/// Where and how to reach the production tool's control socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionConfig {
    #[serde(rename = "control-host")]
    pub host: String,
    #[serde(rename = "control-port")]
    pub port: u16,
    #[serde(skip_serializing)]
    pub password: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: keys::DEFAULT_CONTROL_HOST.to_string(),
            port: keys::DEFAULT_CONTROL_PORT,
            password: String::new(),
        }
    }
}

impl ConnectionConfig {
    pub fn load(store: &dyn ConfigStore) -> Self {
        let defaults = Self::default();
        Self {
            host: store.get(keys::CONTROL_HOST, defaults.host),
            port: store.get(keys::CONTROL_PORT, defaults.port),
            password: store.get(keys::CONTROL_PASSWORD, defaults.password),
        }
    }

    pub fn save(&self, store: &dyn ConfigStore) -> Result<()> {
        store.set(keys::CONTROL_HOST, &self.host)?;
        store.set(keys::CONTROL_PORT, self.port)?;
        store.set(keys::CONTROL_PASSWORD, &self.password)
    }

    /// WebSocket address of the control socket
    pub fn address(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

/// Scene shown for each physical field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FieldSceneMap {
    pub field1_scene: Option<String>,
    pub field2_scene: Option<String>,
}

impl FieldSceneMap {
    pub fn load(store: &dyn ConfigStore) -> Self {
        Self {
            field1_scene: store.get(keys::FIELD1_SCENE, None),
            field2_scene: store.get(keys::FIELD2_SCENE, None),
        }
    }

    /// Scene configured for `field`; `None` for unmapped or unknown fields
    pub fn scene_for(&self, field: u32) -> Option<&str> {
        match field {
            1 => self.field1_scene.as_deref(),
            2 => self.field2_scene.as_deref(),
            _ => None,
        }
    }

    /// Persist a single field's mapping (`None` clears it)
    pub fn assign(store: &dyn ConfigStore, field: u32, scene: Option<&str>) -> Result<()> {
        let key = match field {
            1 => keys::FIELD1_SCENE,
            2 => keys::FIELD2_SCENE,
            other => anyhow::bail!("Field {other} has no scene mapping (only 1 and 2 are mappable)"),
        };
        store.set(key, scene)
    }
}

pub fn catalog_host(store: &dyn ConfigStore) -> String {
    store.get(keys::CATALOG_HOST, keys::DEFAULT_CATALOG_HOST.to_string())
}

pub fn selected_event(store: &dyn ConfigStore) -> Option<String> {
    store.get(keys::SELECTED_EVENT, None)
}

/// Epoch milliseconds of the last detected stream start (0 = never)
pub fn stream_start(store: &dyn ConfigStore) -> i64 {
    store.get(keys::STREAM_START, 0)
}

/// Every effective setting with the password masked, keyed like the settings file
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EffectiveSettings {
    #[serde(flatten)]
    pub connection: ConnectionConfig,
    pub control_password_set: bool,
    #[serde(flatten)]
    pub fields: FieldSceneMap,
    pub stream_start_timestamp: i64,
    pub catalog_host: String,
    pub selected_event: Option<String>,
}

impl EffectiveSettings {
    pub fn load(store: &dyn ConfigStore) -> Self {
        let connection = ConnectionConfig::load(store);
        Self {
            control_password_set: !connection.password.is_empty(),
            connection,
            fields: FieldSceneMap::load(store),
            stream_start_timestamp: stream_start(store),
            catalog_host: catalog_host(store),
            selected_event: selected_event(store),
        }
    }
}
