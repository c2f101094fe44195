//! Structured error types for probe-scope
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Each enum belongs to one pipeline stage; [`ProbeError`] tags which stage
//! failed so consumers never have to guess from a bare message.

use super::types::SessionState;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Symbol '{0}' not found in map artifact")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Malformed map artifact {path}: {reason}")]
    MalformedArtifact { path: PathBuf, reason: String },

    #[error("Failed to read map artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Debug engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("Target rejected connection: {0}")]
    TargetRejected(String),

    #[error("Cannot connect while session is {0}")]
    InvalidState(SessionState),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Session busy: another transaction is in flight")]
    SessionBusy,

    #[error("Session faulted: {0}")]
    SessionFaulted(String),

    #[error("Session not connected")]
    NotConnected,

    #[error("Engine round trip timed out after {0:?}")]
    Timeout(Duration),

    #[error("{} of {total} items failed: {}", failed.len(), failed.join(", "))]
    PartialFailure { failed: Vec<String>, total: usize },
}

impl TransactionError {
    /// True when the session itself is unusable and needs a reconnect
    #[must_use]
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            TransactionError::SessionFaulted(_)
                | TransactionError::NotConnected
                | TransactionError::Timeout(_)
        )
    }
}

/// Failure of a single item inside an otherwise successful transaction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    #[error("not found in map artifact")]
    NotFound,

    #[error("no response from engine")]
    NoResponse,

    #[error("engine reported: {0}")]
    Engine(String),

    #[error("invalid variable expression")]
    InvalidName,

    #[error("invalid write: {0}")]
    InvalidWrite(String),

    #[error("address {0} is outside every writable memory region")]
    UnsafeAddress(super::types::Address),
}

impl ItemError {
    /// Pipeline stage the failure belongs to
    #[must_use]
    pub fn stage(&self) -> &'static str {
        match self {
            ItemError::NotFound | ItemError::InvalidName => "resolve",
            ItemError::NoResponse | ItemError::Engine(_) => "transaction",
            ItemError::InvalidWrite(_) | ItemError::UnsafeAddress(_) => "write",
        }
    }
}

/// Consumer-facing error naming the stage that failed
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("connect error: {0}")]
    Connect(#[from] ConnectError),

    #[error("timeout: {0}")]
    Timeout(TransactionError),

    #[error("transaction error: {0}")]
    Transaction(TransactionError),

    #[error("range error: {name} = {value} outside [{min}, {max}]")]
    OutOfRange { name: String, value: String, min: f64, max: f64 },

    #[error("config error: {0}")]
    Config(String),

    #[error("{stage} error: {name}: {error}", stage = .error.stage())]
    Item { name: String, error: ItemError },

    #[error("monitor error: not started for {watched} variable(s) at {rate_hz} Hz")]
    MonitorRefused { watched: usize, rate_hz: f64 },
}

impl From<TransactionError> for ProbeError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Timeout(_) => ProbeError::Timeout(err),
            other => ProbeError::Transaction(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_error_display() {
        let err = ResolveError::NotFound("motorVars_M1".to_string());
        assert_eq!(err.to_string(), "Symbol 'motorVars_M1' not found in map artifact");
    }

    #[test]
    fn test_partial_failure_lists_items() {
        let err = TransactionError::PartialFailure {
            failed: vec!["a".to_string(), "b".to_string()],
            total: 5,
        };
        assert_eq!(err.to_string(), "2 of 5 items failed: a, b");
    }

    #[test]
    fn test_probe_error_names_stage() {
        let err: ProbeError = TransactionError::Timeout(Duration::from_secs(20)).into();
        assert!(err.to_string().starts_with("timeout:"));

        let err: ProbeError = TransactionError::SessionBusy.into();
        assert!(err.to_string().starts_with("transaction error:"));

        let err: ProbeError = ConnectError::TargetRejected("no target".to_string()).into();
        assert!(err.to_string().contains("connect error"));

        let err = ProbeError::Item {
            name: "0x00090000".to_string(),
            error: ItemError::UnsafeAddress(crate::domain::Address(0x90000)),
        };
        assert!(err.to_string().starts_with("write error: 0x00090000:"));
    }

    #[test]
    fn test_needs_reconnect() {
        assert!(TransactionError::NotConnected.needs_reconnect());
        assert!(TransactionError::Timeout(Duration::from_secs(1)).needs_reconnect());
        assert!(!TransactionError::SessionBusy.needs_reconnect());
    }
}
