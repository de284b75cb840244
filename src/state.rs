use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::db::database::Database;
use crate::llm::assistant::PromptAssistant;
use crate::llm::replicate::ReplicateClient;
use crate::scenes::{GenerationDefaults, SceneIntegrationService, ScenePackLibrary};
use crate::storage::StorageClient;
use crate::tags::catalog::catalog;
use crate::tags::index::TagIndex;
use crate::tags::mapping::TagMappingService;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub index: Arc<TagIndex>,
    pub mapping: TagMappingService,
    pub scenes: Arc<SceneIntegrationService>,
    pub assistant: Arc<PromptAssistant>,
    pub replicate: ReplicateClient,
    pub storage: StorageClient,
}

impl AppState {
    pub fn new(config: &Config, db: Database) -> Result<Self> {
        let index = Arc::new(TagIndex::build(catalog())?);
        let mapping = TagMappingService::new(index.clone());
        let packs = Arc::new(ScenePackLibrary::load(&config.scene_packs_config_path));
        info!(
            "Loaded {} catalog tags and {} scene packs",
            index.len(),
            packs.packs().len()
        );

        let scenes = SceneIntegrationService::new(
            mapping.clone(),
            packs,
            Arc::new(db.clone()),
            GenerationDefaults::from_config(config),
        )
        .with_store(
            db.clone(),
            Duration::from_secs(config.template_cache_ttl_seconds),
        );

        Ok(AppState {
            assistant: Arc::new(PromptAssistant::from_config(config, index.clone())),
            replicate: ReplicateClient::from_config(config),
            storage: StorageClient::from_config(config),
            scenes: Arc::new(scenes),
            mapping,
            index,
            db,
        })
    }
}
