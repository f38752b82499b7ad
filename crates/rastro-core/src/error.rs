//! Error taxonomy shared by every Rastro crate.

use thiserror::Error;

/// Errors surfaced by the tracking engine.
#[derive(Debug, Error)]
pub enum RastroError {
    /// Malformed delivery model.
    #[error("Invalid delivery model: {0}")]
    InvalidModel(String),

    /// Monthly creation allowance exhausted.
    #[error("Quota exceeded: {usage} of {limit} trackings used this month")]
    QuotaExceeded { usage: u32, limit: u32 },

    /// Malformed automation setting.
    #[error("Invalid automation setting: {0}")]
    InvalidSetting(String),

    /// Retryable transport failure (network, timeout, throttling).
    #[error("Transient dispatch error: {0}")]
    TransientDispatch(String),

    /// Non-retryable transport failure.
    #[error("Permanent dispatch error: {0}")]
    PermanentDispatch(String),

    /// Unknown tracking, model, setting or user.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller does not own the resource.
    #[error("Access denied")]
    AccessDenied,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RastroError {
    /// Whether a dispatch failure may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, RastroError::TransientDispatch(_))
    }
}

impl From<rusqlite::Error> for RastroError {
    fn from(e: rusqlite::Error) -> Self {
        RastroError::Storage(e.to_string())
    }
}

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, RastroError>;
