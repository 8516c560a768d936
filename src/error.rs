//! # Error Types
//!
//! Error handling for the action protocol core.
//!
//! Every fallible operation in the crate returns [`Result`], whose error side is
//! [`ProtocolError`]. Variants are grouped by how the caller is expected to react.
//!
//! ## Error Categories
//! - **Configuration Errors**: duplicate action ids, unknown rule tokens, invalid
//!   schemas and bad config files. Fatal at startup.
//! - **Validation Errors**: a field failed a rule or could not be coerced. Recovered
//!   per message by routing to the action's failure branch.
//! - **Dispatch Errors**: unregistered actions, missing or insufficient authorization,
//!   malformed documents. Surfaced to the caller, never retried.
//! - **Transfer Errors**: hash mismatch, peer-reported error, aborted stream. They
//!   terminate one stream only, never the session.
//!
//! ## Example Usage
//! ```rust
//! use action_protocol::error::{ProtocolError, Result};
//!
//! fn require_action(id: Option<&str>) -> Result<&str> {
//!     id.ok_or_else(|| ProtocolError::MalformedMessage("missing action".to_string()))
//! }
//!
//! assert!(require_action(None).is_err());
//! ```

use crate::protocol::access::AccessLevel;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Registry errors
    pub const ERR_REGISTRY_WRITE_LOCK: &str = "Failed to acquire write lock on action registry";
    pub const ERR_REGISTRY_READ_LOCK: &str = "Failed to acquire read lock on action registry";

    /// Envelope errors
    pub const ERR_NOT_AN_OBJECT: &str = "Document is not an object";
    pub const ERR_MISSING_ACTION: &str = "Document has no action";
    pub const ERR_EMPTY_DOCUMENT: &str = "Empty document";
    pub const UNRECOGNIZED_PACKET: &str = "<unrecognized>";

    /// Session errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";

    /// Transfer errors
    pub const ERR_HASH_MISMATCH: &str = "Hash mismatched!";
    pub const ERR_INVALID_FILE: &str = "Invalid file specified!";
    pub const ERR_MISSING_CHUNK_DATA: &str = "Chunk data missing";
    pub const ERR_INVALID_CHUNK_DATA: &str = "Chunk data is not valid base64";

    /// Logging errors
    pub const ERR_LOGGING_INITIALIZED: &str = "Logging is already initialized";
}

/// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Action {0} is already registered")]
    DuplicateAction(String),

    #[error("Unsupported rule {rule} on field {field}")]
    UnknownRule { field: String, rule: String },

    #[error("Invalid schema for field {field}: {reason}")]
    InvalidSchema { field: String, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid field {0}!")]
    UnknownField(String),

    #[error("Rule {rule} validation failed on field {field}")]
    Validation { field: String, rule: String },

    #[error("Non-registered packet action received: {0}")]
    UnregisteredAction(String),

    #[error("This action requires authorization")]
    AuthorizationRequired,

    #[error("This action requires at least {0} authorization level!")]
    AuthorizationInsufficient(AccessLevel),

    #[error("Hash mismatched for transfer {uuid}")]
    TransferHashMismatch { uuid: String },

    #[error("Transmit error on transfer {uuid}: {reason}")]
    TransferPeer { uuid: String, reason: String },

    #[error("Transfer {uuid} aborted: session disconnected")]
    TransferAborted { uuid: String },

    #[error("No open transfer stream {0}")]
    UnknownStream(String),

    #[error("Invalid transfer event: {0}")]
    InvalidTransferEvent(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Can't send remote packet {0} without cloning it")]
    RemotePacket(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Multiple errors: {}", format_causes(.0))]
    Multiple(Vec<ProtocolError>),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this error is a startup-fatal configuration problem.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProtocolError::DuplicateAction(_)
                | ProtocolError::UnknownRule { .. }
                | ProtocolError::InvalidSchema { .. }
                | ProtocolError::ConfigError(_)
        )
    }

    /// Whether this error terminates a single transfer stream.
    pub fn is_transfer(&self) -> bool {
        matches!(
            self,
            ProtocolError::TransferHashMismatch { .. }
                | ProtocolError::TransferPeer { .. }
                | ProtocolError::TransferAborted { .. }
        )
    }

    /// Collapse an ordered list of causes: none, the single cause, or `Multiple`.
    pub fn aggregate(mut causes: Vec<ProtocolError>) -> Option<ProtocolError> {
        match causes.len() {
            0 => None,
            1 => causes.pop(),
            _ => Some(ProtocolError::Multiple(causes)),
        }
    }
}

fn format_causes(causes: &[ProtocolError]) -> String {
    causes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_keeps_order() {
        assert!(ProtocolError::aggregate(Vec::new()).is_none());

        let single = ProtocolError::aggregate(vec![ProtocolError::Timeout]);
        assert!(matches!(single, Some(ProtocolError::Timeout)));

        let many = ProtocolError::aggregate(vec![
            ProtocolError::Timeout,
            ProtocolError::ConnectionClosed,
        ]);
        match many {
            Some(ProtocolError::Multiple(causes)) => {
                assert!(matches!(causes[0], ProtocolError::Timeout));
                assert!(matches!(causes[1], ProtocolError::ConnectionClosed));
            }
            other => panic!("unexpected aggregate: {other:?}"),
        }
    }

    #[test]
    fn test_configuration_grouping() {
        assert!(ProtocolError::DuplicateAction("ping".into()).is_configuration());
        assert!(ProtocolError::UnknownRule {
            field: "time".into(),
            rule: "bogus".into()
        }
        .is_configuration());
        assert!(!ProtocolError::AuthorizationRequired.is_configuration());
    }

    #[test]
    fn test_insufficient_level_message() {
        let err = ProtocolError::AuthorizationInsufficient(AccessLevel::AuthorizedSystem);
        assert_eq!(
            err.to_string(),
            "This action requires at least authorized_system authorization level!"
        );
    }
}
