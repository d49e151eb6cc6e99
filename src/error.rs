use thiserror::Error;

/// Highway halo error types
#[derive(Error, Debug)]
pub enum HaloError {
    #[error("Tracking session already running")]
    AlreadyRunning,

    #[error("Tracking session not running")]
    NotRunning,

    #[error("Marker query failed: {0}")]
    Query(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notification failed: {0}")]
    Notify(String),

    #[error("Invalid marker: {0}")]
    InvalidMarker(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type for library operations
pub type HaloResult<T> = Result<T, HaloError>;
