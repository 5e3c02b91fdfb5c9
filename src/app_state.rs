use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::catalog::BlocksCatalog;
use crate::constants;
use crate::engine::{ConversationEngine, ReadinessMarker};
use crate::llm_interaction::{LlmClient, OpenAiClient, OpenAiConfig};
use crate::settings::SettingsStore;

/// Where persisted files live.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub settings: PathBuf,
    pub catalog: PathBuf,
}

impl DataPaths {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            settings: dir.join(constants::SETTINGS_FILE_NAME),
            catalog: dir.join(constants::CATALOG_FILE_NAME),
        }
    }
}

/// Shared handles for every front-end: the stores and the engine built on them.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<SettingsStore>,
    pub catalog: Arc<BlocksCatalog>,
    pub engine: Arc<ConversationEngine>,
}

impl AppState {
    pub fn new(paths: &DataPaths, llm: Arc<dyn LlmClient>, marker: ReadinessMarker) -> Result<Self> {
        Self::build(paths, llm, marker, "")
    }

    fn build(
        paths: &DataPaths,
        llm: Arc<dyn LlmClient>,
        marker: ReadinessMarker,
        fallback_api_key: &str,
    ) -> Result<Self> {
        let settings = Arc::new(SettingsStore::new(&paths.settings));
        let catalog = Arc::new(BlocksCatalog::new(&paths.catalog));
        let engine = ConversationEngine::new(settings.clone(), catalog.clone(), llm, marker)
            .context("Failed to initialize conversation engine")?
            .with_fallback_api_key(fallback_api_key);
        Ok(Self {
            settings,
            catalog,
            engine: Arc::new(engine),
        })
    }

    /// Build with the OpenAI client and readiness marker from the environment.
    pub fn from_env(paths: &DataPaths) -> Result<Self> {
        let config = OpenAiConfig::from_env()
            .map_err(anyhow::Error::msg)
            .context("Invalid LLM configuration")?;
        info!(
            base_url = %config.base_url,
            flavor = ?config.flavor,
            settings = %paths.settings.display(),
            catalog = %paths.catalog.display(),
            "Initializing application state"
        );
        let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(config));
        Self::build(
            paths,
            llm,
            ReadinessMarker::new(constants::READY_MARKER.as_str()),
            constants::OPENAI_API_KEY.as_str(),
        )
    }
}
