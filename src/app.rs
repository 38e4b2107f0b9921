//! Service wiring
//!
//! Components are built once here and handed their collaborators explicitly.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::browser_sources::BrowserSourceSynchronizer;
use crate::config::{ConfigStore, ConnectionConfig, JsonFileStore, settings};
use crate::connection::ConnectionManager;
use crate::ftc_live::EventCatalogClient;
use crate::obs::{Connector, WebSocketConnector};
use crate::scenes::SceneSwitcher;

pub struct App {
    pub store: Arc<dyn ConfigStore>,
    pub connection: Arc<ConnectionManager>,
    pub scenes: SceneSwitcher,
    pub sources: BrowserSourceSynchronizer,
}

impl App {
    pub fn new(store: Arc<dyn ConfigStore>, connector: Arc<dyn Connector>) -> Self {
        let connection = Arc::new(ConnectionManager::new(connector, store.clone()));
        Self {
            scenes: SceneSwitcher::new(connection.clone(), store.clone()),
            sources: BrowserSourceSynchronizer::new(connection.clone()),
            connection,
            store,
        }
    }

    /// Production wiring: JSON settings file plus the WebSocket control client
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let path = config_path.unwrap_or_else(JsonFileStore::default_path);
        let store = JsonFileStore::load(&path)?;
        info!(path = %path.display(), "Using settings file");
        Ok(Self::new(Arc::new(store), Arc::new(WebSocketConnector)))
    }

    /// Connect with the stored connection settings; the classified error becomes the `Err`
    pub async fn connect(&self) -> Result<()> {
        let config = ConnectionConfig::load(self.store.as_ref());
        self.connection.connect(&config).await;
        match self.connection.error() {
            Some(e) => Err(e).with_context(|| format!("Connecting to {}", config.address())),
            None => Ok(()),
        }
    }

    /// Catalog client for `host`, or the stored catalog host
    pub fn catalog(&self, host: Option<&str>) -> Result<EventCatalogClient> {
        let host = host
            .map(str::to_string)
            .unwrap_or_else(|| settings::catalog_host(self.store.as_ref()));
        Ok(EventCatalogClient::new(&host)?)
    }
}
