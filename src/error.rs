//! Error taxonomy for the sync pipeline.
//!
//! Errors split into two families:
//!
//! | Kind | Scope | Effect |
//! |------|-------|--------|
//! | [`ErrorKind::AuthFailed`] | run | aborts before any item is processed |
//! | [`ErrorKind::ProtocolViolation`] | run | aborts paging; admitted items finish |
//! | [`ErrorKind::FetchFailed`] | page or item | recorded, siblings continue |
//! | [`ErrorKind::DataIntegrity`] | item | recorded in that item's outcome |
//! | [`ErrorKind::Rpc`] | item | recorded in that item's outcome |
//! | [`ErrorKind::Cancelled`] | page | in-flight page fetch abandoned, run ends cancelled |
//!
//! Mapping never fails: missing source fields are default-filled by
//! [`crate::mapping`] instead of raising.

use serde::Serialize;
use thiserror::Error;

/// Errors raised by the source, asset, RPC, and gateway layers.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// Transient network or HTTP failure, after any bounded retries.
    #[error("fetch failed for {url}: {message}")]
    FetchFailed { url: String, message: String },

    /// The remote API broke its own contract (cycling page token, bad shape).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The CMS rejected the credentials or could not be reached.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// More than one target record carries the same external key.
    #[error("{count} records in {model} share external key {external_key}")]
    DataIntegrity {
        model: String,
        external_key: String,
        count: usize,
    },

    /// The CMS returned an error (or an unusable reply) for a call.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// The run was cancelled or hit its deadline while a page was in flight.
    #[error("run cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn fetch(url: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::FetchFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::FetchFailed { .. } => ErrorKind::FetchFailed,
            SyncError::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            SyncError::AuthFailed(_) => ErrorKind::AuthFailed,
            SyncError::DataIntegrity { .. } => ErrorKind::DataIntegrity,
            SyncError::Rpc(_) => ErrorKind::Rpc,
            SyncError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether this error ends the whole run rather than a single item or page.
    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }
}

/// Flat error classification carried in outcomes and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FetchFailed,
    ProtocolViolation,
    AuthFailed,
    DataIntegrity,
    Rpc,
    Cancelled,
}

impl ErrorKind {
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::AuthFailed | ErrorKind::ProtocolViolation)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::FetchFailed => "fetch_failed",
            ErrorKind::ProtocolViolation => "protocol_violation",
            ErrorKind::AuthFailed => "auth_failed",
            ErrorKind::DataIntegrity => "data_integrity",
            ErrorKind::Rpc => "rpc",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_auth_and_protocol_are_fatal() {
        assert!(SyncError::AuthFailed("bad password".into()).is_fatal());
        assert!(SyncError::ProtocolViolation("cycle".into()).is_fatal());
        assert!(!SyncError::fetch("http://x", "timeout").is_fatal());
        assert!(!SyncError::Rpc("boom".into()).is_fatal());
        assert!(!SyncError::Cancelled.is_fatal());
        assert_eq!(SyncError::Cancelled.kind(), ErrorKind::Cancelled);
        assert!(!SyncError::DataIntegrity {
            model: "res.partner".into(),
            external_key: "swapi:people:1".into(),
            count: 2,
        }
        .is_fatal());
    }

    #[test]
    fn data_integrity_message_names_the_key() {
        let err = SyncError::DataIntegrity {
            model: "res.planet".into(),
            external_key: "swapi:planets:3".into(),
            count: 2,
        };
        assert_eq!(
            err.to_string(),
            "2 records in res.planet share external key swapi:planets:3"
        );
        assert_eq!(err.kind().as_str(), "data_integrity");
    }
}
