//! Error types for the policy confirmation gate.
//!
//! Lookup misses are never errors here: a missing confirmation is an
//! `Option::None` and drives a redirect. Everything below is a genuine
//! failure that the caller has to surface.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    /// Malformed configuration: unknown hook name, unparsable env value.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("authentication required")]
    Unauthenticated,

    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid or expired token")]
    InvalidToken,

    /// Storage could not be reached or returned an unexpected failure.
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(#[from] anyhow::Error),
}

impl GateError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Config(_) => 500,
            Self::NotFound(_) => 404,
            Self::Forbidden(_) => 403,
            Self::Unauthenticated => 401,
            Self::Conflict(_) => 409,
            Self::InvalidToken => 400,
            Self::LedgerUnavailable(_) => 503,
        }
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for GateError {
    fn from(e: sqlx::Error) -> Self {
        Self::LedgerUnavailable(anyhow::Error::new(e))
    }
}

pub type Result<T> = std::result::Result<T, GateError>;
