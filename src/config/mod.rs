//! Configuration management for obs-event-sync
//!
//! This module provides two layers:
//! - **store**: the persisted key-value store (JSON file, write-through)
//! - **settings**: typed views used by the connection, scene and catalog code

pub mod settings;
pub mod store;

// Re-export commonly used types
pub use settings::{ConnectionConfig, FieldSceneMap};
pub use store::{ConfigStore, ConfigStoreExt, JsonFileStore};
