// Defaults loaded from the environment (or .env), overridable per command on the CLI.

use std::env;

pub const SETTINGS_FILE_NAME: &str = "app_settings.json";
pub const CATALOG_FILE_NAME: &str = "app_blocks_catalog.csv";
pub const TEMPLATE_DOWNLOAD_NAME: &str = "blocks_template.csv";

/// Columns every uploaded catalog must carry, in output order.
pub const REQUIRED_COLUMNS: [&str; 2] = ["block_name", "functionality_description"];

pub const DEFAULT_READY_MARKER: &str = "READY_FOR_DESIGN";

lazy_static::lazy_static! {
    pub static ref OPENAI_BASE_URL: String = env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    // Used only when no key has been saved through the settings dialog.
    pub static ref OPENAI_API_KEY: String = env::var("OPENAI_API_KEY").unwrap_or_default();
    pub static ref REASONING_MODEL: String = env::var("BLOCKPLAN_MODEL").unwrap_or_else(|_| "o4-mini".to_string());
    pub static ref FALLBACK_CHAT_MODEL: String = env::var("BLOCKPLAN_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    pub static ref API_FLAVOR: String = env::var("BLOCKPLAN_API_FLAVOR").unwrap_or_else(|_| "responses".to_string());
    pub static ref READY_MARKER: String = env::var("BLOCKPLAN_READY_MARKER").unwrap_or_else(|_| DEFAULT_READY_MARKER.to_string());
    pub static ref TEMPLATES_DIR: String = env::var("BLOCKPLAN_TEMPLATES_DIR").unwrap_or_else(|_| "templates".to_string());
    pub static ref STATIC_DIR: String = env::var("BLOCKPLAN_STATIC_DIR").unwrap_or_else(|_| "static".to_string());
}
