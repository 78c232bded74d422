use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccoladeError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Not owner: {0}")]
    NotOwner(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("Malformed reference: {0}")]
    MalformedReference(String),
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl AccoladeError {
    /// Terminal errors describe the request, not the stores; retrying cannot help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AccoladeError::NotFound(_)
                | AccoladeError::NotOwner(_)
                | AccoladeError::Unauthorized(_)
                | AccoladeError::InvalidTransition { .. }
                | AccoladeError::ValidationError(_)
        )
    }

    /// Process exit code used by the CLI surface.
    pub fn exit_code(&self) -> i32 {
        match self {
            AccoladeError::NotFound(_) => 3,
            AccoladeError::NotOwner(_) | AccoladeError::Unauthorized(_) => 4,
            AccoladeError::InvalidTransition { .. } => 5,
            AccoladeError::MalformedReference(_) => 6,
            AccoladeError::Timeout(_) => 7,
            AccoladeError::ValidationError(_) | AccoladeError::ConfigError(_) => 2,
            _ => 1,
        }
    }
}
