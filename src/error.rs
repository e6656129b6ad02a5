use thiserror::Error;

#[derive(Error, Debug)]
pub enum RankError {
    /// Stored rank/tier state contradicts itself. The collection must be
    /// reloaded from source data; nothing should keep operating on it.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no collection here (run `tierank init` first)")]
    NotInitialized,

    #[error("collection already initialized at {0}")]
    AlreadyInitialized(String),

    #[error("config parse error: {0}")]
    ConfigParse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RankError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RankError::InvariantViolation(_))
    }
}

pub type Result<T> = std::result::Result<T, RankError>;
