//! BNC Errors
//!
//! Failures talking to the bank or to the rate sources.

use super::crypto::CryptoError;

/// Errors from the bank integration
#[derive(Debug, thiserror::Error)]
pub enum BncError {
    /// No working key could be found or issued
    #[error("No working key available")]
    MissingWorkingKey,

    /// Transport failure (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("Unexpected HTTP status: {0}")]
    UnexpectedStatus(u16),

    /// Reply had no encrypted `value`
    #[error("Bank reply is missing the value field")]
    MissingValue,

    /// Bank answered with a non-OK application status
    #[error("Bank rejected the request: {status} {message}")]
    Rejected { status: String, message: String },

    /// Body could not be understood
    #[error("Malformed bank payload: {0}")]
    Malformed(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BncError {
    /// Missing credentials; the caller should retry later
    pub fn is_missing_key(&self) -> bool {
        matches!(self, BncError::MissingWorkingKey)
    }
}

impl From<serde_json::Error> for BncError {
    fn from(err: serde_json::Error) -> Self {
        BncError::Malformed(err.to_string())
    }
}
