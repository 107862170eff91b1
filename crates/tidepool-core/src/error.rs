//! Error types for Tidepool

use thiserror::Error;

/// Core error type for Tidepool operations
#[derive(Error, Debug)]
pub enum TidepoolError {
    /// A new backend connection could not be opened or initialised
    #[error("Connection error: {0}")]
    Connection(String),

    /// A statement failed on a leased connection
    #[error("Query error: {0}")]
    Query(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    /// No connection could be obtained before the deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Pool is shut down")]
    PoolClosed,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TidepoolError {
    /// Whether this error is an acquire timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, TidepoolError::Timeout(_))
    }

    /// Whether this error came from opening a connection
    pub fn is_connection_error(&self) -> bool {
        matches!(self, TidepoolError::Connection(_))
    }
}

impl From<toml::de::Error> for TidepoolError {
    fn from(err: toml::de::Error) -> Self {
        TidepoolError::Configuration(err.to_string())
    }
}

/// Result type alias for Tidepool operations
pub type Result<T> = std::result::Result<T, TidepoolError>;
