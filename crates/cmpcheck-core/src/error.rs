//! Error types for the conformance engine.
//!
//! Peer misbehaviour is never an error here: it is reported as a
//! [`crate::validator::Defect`] inside the verdict. These types cover the
//! driver's own mistakes and failures of the external collaborators.

use std::time::Duration;

use cmpcheck_proto::{FailureInfo, ProtocolError, TransactionId};

use crate::machine::MachineState;

/// Transaction registry invariant violations.
///
/// These are programming errors in the driver, surfaced distinctly so tests
/// can assert the driver itself behaved correctly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The identifier is already bound to a live operation.
    #[error("transaction {0} is already live")]
    DuplicateTransaction(TransactionId),

    /// The identifier was never begun.
    #[error("transaction {0} is unknown")]
    UnknownTransaction(TransactionId),
}

impl RegistryError {
    /// Failure info a conforming peer reports for the same mistake.
    pub fn failure_info(&self) -> FailureInfo {
        match self {
            Self::DuplicateTransaction(_) => FailureInfo::TRANSACTION_ID_IN_USE,
            Self::UnknownTransaction(_) => FailureInfo::BAD_REQUEST,
        }
    }
}

/// Encoding adapter could not serialize a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("encode failed: {reason}")]
pub struct EncodeError {
    /// Adapter-specific reason
    pub reason: String,
}

/// Encoding adapter could not parse inbound bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed message: {reason}")]
pub struct DecodeError {
    /// Adapter-specific reason
    pub reason: String,
}

/// Crypto adapter could not protect an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// The credential cannot produce the requested protection.
    #[error("credential unusable: {0}")]
    Credential(String),

    /// The message cannot be canonicalized for protection.
    #[error("protected part unavailable: {0}")]
    ProtectedPart(String),
}

/// Transport failed to deliver a request or return a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Peer could not be reached.
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// Connection closed before a response arrived.
    #[error("connection closed before response")]
    Closed,

    /// Underlying I/O failure.
    #[error("transport I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::Closed,
            std::io::ErrorKind::ConnectionRefused => Self::Unreachable(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Machine configuration outside the supported range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A wait is longer than the engine schedules.
    #[error("{setting} of {value:?} exceeds the {max:?} limit")]
    WaitTooLong {
        /// Offending setting
        setting: &'static str,
        /// Configured value
        value: Duration,
        /// Longest supported wait
        max: Duration,
    },
}

/// Errors raised by the operation state machine and exchange runner.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MachineError {
    /// Operation called in a state that does not permit it.
    #[error("invalid state {state} for operation {operation}")]
    InvalidState {
        /// State the machine was in
        state: MachineState,
        /// Operation attempted
        operation: String,
    },

    /// Registry refused the transaction.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Request violates message structure rules.
    #[error("invalid request: {0}")]
    Request(#[from] ProtocolError),

    /// Outbound message could not be encoded.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// Outbound message could not be protected.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Machine stopped issuing actions without reaching a terminal state.
    #[error("operation ended without a verdict")]
    NoVerdict,
}

impl MachineError {
    /// Failure info matching the error, when one applies.
    pub fn failure_info(&self) -> Option<FailureInfo> {
        match self {
            Self::Registry(err) => Some(err.failure_info()),
            Self::Request(_) => Some(FailureInfo::BAD_REQUEST),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_maps_to_transaction_id_in_use() {
        let err = MachineError::from(RegistryError::DuplicateTransaction(TransactionId::new(
            [1; 16],
        )));
        assert_eq!(err.failure_info(), Some(FailureInfo::TRANSACTION_ID_IN_USE));
        assert_eq!(err.to_string(), "transaction 01010101010101010101010101010101 is already live");
    }

    #[test]
    fn io_errors_classify_by_kind() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(TransportError::from(eof), TransportError::Closed);

        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(TransportError::from(refused), TransportError::Unreachable(_)));
    }
}
