use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Isolated storage is unavailable: {0}")]
    Unavailable(String),

    #[error("Store is not open")]
    StoreNotOpen,

    #[error("Store has been disposed")]
    Disposed,

    #[error("Store root no longer exists on disk")]
    StoreDeleted,

    #[error("Isolated storage has been disabled")]
    Disabled,

    #[error("Security violation: path is outside the permitted scope")]
    SecurityDenied,

    #[error("{operation} failed for '{path}': {source}")]
    OperationFailed {
        operation: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid open mode: {0}")]
    InvalidMode(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Quota increase rejected: {0}")]
    QuotaRejected(String),

    #[error("Operation not permitted: {0}")]
    NotPermitted(String),

    #[error("Failed to remove the entire store contents")]
    RemoveIncomplete,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn invalid_mode(msg: impl Into<String>) -> Self {
        Self::InvalidMode(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn quota_rejected(msg: impl Into<String>) -> Self {
        Self::QuotaRejected(msg.into())
    }

    pub fn not_permitted(msg: impl Into<String>) -> Self {
        Self::NotPermitted(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wraps a filesystem error with the caller-visible path. The resolved
    /// absolute path never appears in the message.
    pub fn operation_failed(
        operation: &'static str,
        path: impl AsRef<str>,
        source: io::Error,
    ) -> Self {
        Self::OperationFailed {
            operation,
            path: path.as_ref().to_string(),
            source,
        }
    }

    /// True when the error wraps a filesystem not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::OperationFailed { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}
