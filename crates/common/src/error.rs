//! Error types for Peergate

use serde::Serialize;
use thiserror::Error;

/// Result type alias using Peergate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Why a credential was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnauthorizedReason {
    /// No bearer token in the request
    Missing,
    /// Token is neither the master secret nor a redeemable enrollment token
    InvalidOrExpired,
    /// Operation is restricted to the master secret
    MasterRequired,
}

impl std::fmt::Display for UnauthorizedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::InvalidOrExpired => write!(f, "invalid_or_expired"),
            Self::MasterRequired => write!(f, "master_required"),
        }
    }
}

/// Non-success result of the privileged network helper.
///
/// Carries the exit status (None when the helper never exited normally:
/// spawn failure, signal, timeout) and the captured output verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalFailure {
    pub exit_status: Option<i32>,
    pub output: String,
}

impl std::fmt::Display for ExternalFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.exit_status {
            Some(code) => write!(f, "helper exited with status {}", code)?,
            None => write!(f, "helper did not complete")?,
        }
        if !self.output.is_empty() {
            write!(f, ": {}", self.output.trim_end())?;
        }
        Ok(())
    }
}

/// Peergate error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: UnauthorizedReason },

    #[error("Resource not found: {kind} {id}")]
    NotFound { kind: String, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Address pool exhausted (max id {max_id})")]
    PoolExhausted { max_id: u32 },

    #[error("Address allocation failed: {0}")]
    AllocationFailed(String),

    #[error("External failure: {0}")]
    ExternalFailure(ExternalFailure),

    #[error("Inconsistent state: {0}")]
    Inconsistent(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn unauthorized(reason: UnauthorizedReason) -> Self {
        Error::Unauthorized { reason }
    }

    pub fn peer_not_found(name: &str) -> Self {
        Error::NotFound {
            kind: "peer".to_string(),
            id: name.to_string(),
        }
    }

    /// Stable machine-readable identifier for API responses
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) | Error::Database(_) | Error::Serialization(_) | Error::Internal(_) => {
                "internal"
            }
            Error::InvalidInput(_) => "invalid_input",
            Error::Unauthorized { .. } => "unauthorized",
            Error::NotFound { .. } => "not_found",
            Error::Conflict(_) => "conflict",
            Error::PoolExhausted { .. } => "pool_exhausted",
            Error::AllocationFailed(_) => "allocation_failed",
            Error::ExternalFailure(_) => "external_failure",
            Error::Inconsistent(_) => "inconsistent",
            Error::InvalidConfig(_) => "invalid_config",
        }
    }
}

/// True when a rusqlite error is a UNIQUE / PRIMARY KEY violation
pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => matches!(
            err.extended_code,
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_failure_display() {
        let failure = ExternalFailure {
            exit_status: Some(2),
            output: "wg: no such device\n".to_string(),
        };
        assert_eq!(
            failure.to_string(),
            "helper exited with status 2: wg: no such device"
        );

        let timed_out = ExternalFailure {
            exit_status: None,
            output: String::new(),
        };
        assert_eq!(timed_out.to_string(), "helper did not complete");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::PoolExhausted { max_id: 15 }.kind(), "pool_exhausted");
        assert_eq!(
            Error::unauthorized(UnauthorizedReason::Missing).to_string(),
            "Unauthorized: missing"
        );
        assert_eq!(Error::peer_not_found("laptop").kind(), "not_found");
    }
}
