//! Error types for the Paylock security core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// No security method is set up; needs out-of-band setup before retrying
    #[error("Security configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// User-directed; callers treat this as an outcome rather than a fault
    #[error("Cancelled by user")]
    Cancelled,

    #[error("Storage failure: {0}")]
    StorageFailure(String),

    #[error("Timer fault: {0}")]
    TimerFault(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("PIN must be exactly {0} digits")]
    InvalidPin(usize),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the failed operation may simply be retried
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::AuthenticationFailed(_) | Error::Cancelled | Error::InvalidPin(_)
        )
    }
}
