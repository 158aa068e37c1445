use thiserror::Error;

use crate::gemini::GeminiError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum FlexageError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Gemini API error: {0}")]
    Gemini(#[from] GeminiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, FlexageError>;

impl FlexageError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        FlexageError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// HTTP status the routing layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            FlexageError::NotFound { .. } => 404,
            FlexageError::Conflict(_) => 400,
            FlexageError::Forbidden(_) => 403,
            _ => 500,
        }
    }
}
