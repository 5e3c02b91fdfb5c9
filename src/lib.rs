pub mod app_state;
pub mod catalog;
pub mod chat;
pub mod constants;
pub mod engine;
pub mod error;
pub mod llm_interaction;
pub mod prompts;
pub mod settings;
pub mod storage;
pub mod web_server;

pub use app_state::{AppState, DataPaths};
pub use catalog::{BlockEntry, BlocksCatalog};
pub use engine::{ConversationEngine, Phase, ReadinessMarker, TurnReply, WorkflowState};
pub use error::{CatalogError, EngineError, GenerationError, PersistenceError, SettingsError};
pub use llm_interaction::{ChatMessage, LlmClient, Prompt, Role};
pub use settings::{Settings, SettingsPatch, SettingsStore};
