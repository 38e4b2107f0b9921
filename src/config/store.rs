//! Persisted key-value settings
//!
//! Every setting is one entry in a flat JSON object. Reads take a default that
//! is returned when the key is absent (or holds a value of the wrong shape),
//! writes are persisted immediately and then announced to `on_change` listeners.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Listener invoked with the new value after a key is written
pub type ChangeCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Raw key-value contract; use [`ConfigStoreExt`] for typed access
pub trait ConfigStore: Send + Sync {
    fn get_value(&self, key: &str) -> Option<Value>;
    fn set_value(&self, key: &str, value: Value) -> Result<()>;
    fn on_change(&self, key: &str, callback: ChangeCallback);
}

/// Typed get/set on top of any [`ConfigStore`]
pub trait ConfigStoreExt {
    fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T;
    fn set<T: Serialize>(&self, key: &str, value: T) -> Result<()>;
}

impl<S: ConfigStore + ?Sized> ConfigStoreExt for S {
    fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.get_value(key) {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(key = %key, error = %e, "Stored value has unexpected type, using default");
                default
            }),
            None => default,
        }
    }

    fn set<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value)
            .with_context(|| format!("Failed to serialize value for '{key}'"))?;
        self.set_value(key, value)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct Listeners(Mutex<HashMap<String, Vec<ChangeCallback>>>);

impl Listeners {
    fn add(&self, key: &str, callback: ChangeCallback) {
        lock(&self.0).entry(key.to_string()).or_default().push(callback);
    }

    fn notify(&self, key: &str, value: &Value) {
        // Clone out so callbacks may touch the store without deadlocking
        let callbacks = lock(&self.0).get(key).cloned().unwrap_or_default();
        for callback in callbacks {
            callback(value);
        }
    }
}

/// Store backed by a JSON file, written through on every `set`
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
    listeners: Listeners,
}

impl JsonFileStore {
    /// Default settings path under the platform config dir
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(crate::constants::config::APP_DIR);
        path.push(crate::constants::config::FILENAME);
        path
    }

    /// Load settings from `path`; a missing file is an empty store
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            let values: Map<String, Value> = serde_json::from_str(&contents).with_context(|| {
                format!("Failed to parse settings in {} (fix or remove the file)", path.display())
            })?;
            info!(path = %path.display(), keys = values.len(), "Loaded settings");
            values
        } else {
            info!(path = %path.display(), "No settings file found, using defaults");
            Map::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
            listeners: Listeners::default(),
        })
    }

    fn persist(&self, values: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(values).context("Failed to serialize settings")?;
        fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))?;
        Ok(())
    }
}

impl ConfigStore for JsonFileStore {
    fn get_value(&self, key: &str) -> Option<Value> {
        lock(&self.values).get(key).cloned()
    }

    fn set_value(&self, key: &str, value: Value) -> Result<()> {
        {
            let mut values = lock(&self.values);
            values.insert(key.to_string(), value.clone());
            self.persist(&values)?;
        }
        debug!(key = %key, value = %value, "Saved setting");
        self.listeners.notify(key, &value);
        Ok(())
    }

    fn on_change(&self, key: &str, callback: ChangeCallback) {
        self.listeners.add(key, callback);
    }
}

/// In-memory store for tests
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<Map<String, Value>>,
    listeners: Listeners,
}

#[cfg(test)]
impl ConfigStore for MemoryStore {
    fn get_value(&self, key: &str) -> Option<Value> {
        lock(&self.values).get(key).cloned()
    }

    fn set_value(&self, key: &str, value: Value) -> Result<()> {
        lock(&self.values).insert(key.to_string(), value.clone());
        self.listeners.notify(key, &value);
        Ok(())
    }

    fn on_change(&self, key: &str, callback: ChangeCallback) {
        self.listeners.add(key, callback);
    }
}
