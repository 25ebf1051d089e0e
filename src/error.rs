use thiserror::Error;

#[derive(Error, Debug)]
pub enum PingitError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("tab not found: {0}")]
    TabNotFound(String),

    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("workspace not loaded: {0}")]
    WorkspaceNotLoaded(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("{0}")]
    Other(String),
}

impl PingitError {
    /// Re-labels any failure coming out of a storage backend so callers only
    /// ever see `StorageUnavailable` from gateway calls.
    pub fn into_storage(self) -> Self {
        match self {
            PingitError::StorageUnavailable(_) => self,
            other => PingitError::StorageUnavailable(other.to_string()),
        }
    }

    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, PingitError::StorageUnavailable(_))
    }
}

impl From<anyhow::Error> for PingitError {
    fn from(err: anyhow::Error) -> Self {
        PingitError::Other(err.to_string())
    }
}

/// Result type for the pingit crate
pub type Result<T> = std::result::Result<T, PingitError>;
