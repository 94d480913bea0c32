//! Error type shared by every writeflow operation

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, WriteflowError>;

/// Error kinds surfaced by the store and the services built on it
#[derive(Debug, thiserror::Error)]
pub enum WriteflowError {
    /// Malformed input: bad JSON, unknown enum value, invalid phase name
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The underlying store rejected a read or write
    #[error("persistence error: {0}")]
    Persistence(#[from] diesel::result::Error),

    #[error("connection error: {0}")]
    Connection(String),

    /// Submitted projects cannot be saved again
    #[error("project is submitted and can no longer be edited")]
    ImmutableState,

    /// Reserved for optimistic-lock support
    #[error("conflicting write: {0}")]
    Conflict(String),

    /// The legacy single-blob record could not be parsed
    #[error("legacy project data is malformed: {0}")]
    MalformedLegacyData(#[source] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl From<diesel::r2d2::PoolError> for WriteflowError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        WriteflowError::Connection(e.to_string())
    }
}

impl WriteflowError {
    /// True when nothing was written because the caller's input was rejected
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            WriteflowError::Validation(_)
                | WriteflowError::NotFound(_)
                | WriteflowError::ImmutableState
                | WriteflowError::MalformedLegacyData(_)
        )
    }
}
