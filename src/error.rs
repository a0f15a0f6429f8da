use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy for a single capture attempt.
///
/// Every variant is reported to the caller as a per-URL failure; none of them
/// is fatal to the process.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SnapshotError {
    #[error("HTTP fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP fetch failed with status {0}")]
    HttpStatus(u16),

    #[error("HTTP fetch error: {0}")]
    Transport(String),

    #[error("Unsupported content type for snapshot: {0}")]
    UnsupportedContentType(String),

    #[error("Browser rendering failed: {0}")]
    Rendering(String),

    #[error("Browser renderer is not configured")]
    NotConfigured,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to store snapshot: {0}")]
    Storage(String),
}

impl SnapshotError {
    /// The resource was reachable but is not something we archive.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, SnapshotError::UnsupportedContentType(_))
    }

    /// Stable label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SnapshotError::Timeout(_) => "timeout",
            SnapshotError::HttpStatus(_) => "http_status",
            SnapshotError::Transport(_) => "transport",
            SnapshotError::UnsupportedContentType(_) => "unsupported_content_type",
            SnapshotError::Rendering(_) => "rendering",
            SnapshotError::NotConfigured => "not_configured",
            SnapshotError::InvalidUrl(_) => "invalid_url",
            SnapshotError::Storage(_) => "storage",
        }
    }
}

impl From<std::io::Error> for SnapshotError {
    fn from(err: std::io::Error) -> Self {
        SnapshotError::Storage(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History log IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("History serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("History worker failed: {0}")]
    Worker(String),
}

impl From<tokio::task::JoinError> for HistoryError {
    fn from(err: tokio::task::JoinError) -> Self {
        HistoryError::Worker(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
