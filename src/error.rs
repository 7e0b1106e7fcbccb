use thiserror::Error;

/// Errors produced by the checker library.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying PostgreSQL / sqlx error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// A submitted address was rejected before reaching storage.
    #[error("Invalid proxy address '{input}': {reason}")]
    InvalidAddress { input: String, reason: String },

    #[error("A check batch needs at least one proxy address")]
    EmptyBatch,

    /// A stored column held a value the model cannot represent.
    #[error("Invalid stored value for {field}: {value}")]
    InvalidStoredValue { field: &'static str, value: String },

    #[error("Probe record not found: {0}")]
    ProbeNotFound(uuid::Uuid),

    #[error("Geolocation lookup failed: {0}")]
    Geo(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn invalid_address(input: &str, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
