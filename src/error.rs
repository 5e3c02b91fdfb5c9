use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single LLM call. The engine treats every variant as
/// "generation failed"; only the text shown to the user differs.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<u64>,
    },
    #[error("transport error: {0}")]
    Transport(String),
}

impl GenerationError {
    /// Map a non-success HTTP status from the provider onto the taxonomy.
    pub fn from_status(status: u16, body: &str, retry_after: Option<u64>) -> Self {
        match status {
            401 | 403 => GenerationError::Auth(format!("HTTP {}: {}", status, body)),
            429 => GenerationError::RateLimited {
                message: body.to_string(),
                retry_after,
            },
            _ => GenerationError::Transport(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        GenerationError::Transport(err.to_string())
    }
}

#[derive(Debug, Error)]
#[error("failed to write {}: {source}", .path.display())]
pub struct PersistenceError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl PersistenceError {
    pub fn new(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid settings: {0}")]
    Validation(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("CSV file is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("Unable to read CSV file: {0}")]
    Parse(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl From<csv::Error> for CatalogError {
    fn from(err: csv::Error) -> Self {
        CatalogError::Parse(err.to_string())
    }
}

/// Why a conversation turn produced no new state.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("empty input")]
    EmptyInput,
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("failed to render prompt: {0}")]
    Prompt(#[from] minijinja::Error),
}

impl EngineError {
    /// Text shown to the user as the single assistant-facing error message.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::EmptyInput => "Empty input.".to_string(),
            EngineError::Configuration(msg) => msg.clone(),
            EngineError::Generation(GenerationError::Auth(_)) => {
                "The model provider rejected the API key. Update it in Settings and try again."
                    .to_string()
            }
            EngineError::Generation(GenerationError::RateLimited { retry_after, .. }) => {
                match retry_after {
                    Some(secs) => format!(
                        "The model provider is rate limiting requests. Resend your message in about {} seconds.",
                        secs
                    ),
                    None => "The model provider is rate limiting requests. Wait a moment and resend your message."
                        .to_string(),
                }
            }
            EngineError::Generation(GenerationError::Transport(detail)) => {
                format!("Error while contacting the model provider: {}", detail)
            }
            EngineError::Prompt(err) => format!("Internal error while building the prompt: {}", err),
        }
    }
}
