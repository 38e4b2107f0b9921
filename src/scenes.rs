//! Field-to-scene switching

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{ConfigStore, FieldSceneMap};
use crate::connection::{ConnectionManager, NotConnected};
use crate::obs::RequestError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SwitchError {
    #[error(transparent)]
    NotConnected(#[from] NotConnected),

    #[error("no scene configured for field {field}")]
    MissingMapping { field: u32 },

    #[error("scene switch failed: {0}")]
    Request(#[from] RequestError),
}

/// What `set_active_field` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOutcome {
    Switched(String),
    /// Field 0: no fixed mapping (finals), the operator switches by hand
    ManualSwitching,
}

pub struct SceneSwitcher {
    connection: Arc<ConnectionManager>,
    store: Arc<dyn ConfigStore>,
}

impl SceneSwitcher {
    pub fn new(connection: Arc<ConnectionManager>, store: Arc<dyn ConfigStore>) -> Self {
        Self { connection, store }
    }

    /// Switch program output to `scene`
    pub async fn switch_scene(&self, scene: &str) -> Result<(), SwitchError> {
        let session = self.connection.acquire().await.inspect_err(|_| {
            error!(scene = %scene, "Unable to switch scene. Not connected");
        })?;
        info!(scene = %scene, "Switching scene");
        session
            .set_current_scene(scene)
            .await
            .inspect_err(|e| error!(scene = %scene, error = %e, "Scene switch failed"))?;
        Ok(())
    }

    /// Show the scene mapped to `field`; 0 means manual switching
    pub async fn set_active_field(&self, field: u32) -> Result<FieldOutcome, SwitchError> {
        if field == 0 {
            info!("Finals match, manual switching required");
            return Ok(FieldOutcome::ManualSwitching);
        }

        let mapping = FieldSceneMap::load(self.store.as_ref());
        let Some(scene) = mapping.scene_for(field) else {
            warn!(
                field,
                field1 = ?mapping.field1_scene,
                field2 = ?mapping.field2_scene,
                "Unable to switch stream to field"
            );
            return Err(SwitchError::MissingMapping { field });
        };

        self.switch_scene(scene).await?;
        Ok(FieldOutcome::Switched(scene.to_string()))
    }

    /// All scene names, most recently created first
    pub async fn fetch_scenes(&self) -> Result<Vec<String>, SwitchError> {
        let session = self.connection.acquire().await?;
        let mut scenes = session.list_scenes().await?;
        scenes.reverse();
        Ok(scenes)
    }
}
