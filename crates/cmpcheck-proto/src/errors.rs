//! Errors raised while constructing protocol messages.

use crate::body::BodyKind;

/// Result alias for message-model construction.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// A message could not be built because it would violate RFC 4210
/// structure rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Certificate request lists must carry at least one entry.
    #[error("certificate request list is empty")]
    EmptyCertRequests,

    /// An initialization request may only carry a single certificate
    /// request; further certificates need separate operations.
    #[error("initialization request carries {count} entries, exactly one is allowed")]
    MultipleInitializationRequests {
        /// Number of entries found
        count: usize,
    },

    /// Transaction identifiers have a fixed length.
    #[error("transaction identifier must be {expected} bytes, got {actual}")]
    InvalidTransactionIdLength {
        /// Required length in bytes
        expected: usize,
        /// Length supplied
        actual: usize,
    },

    /// A status integer outside the PKIStatus enumeration.
    #[error("unknown PKI status value {0}")]
    UnknownStatus(u8),

    /// A failure-info name outside the RFC taxonomy.
    #[error("unknown failure info name {0:?}")]
    UnknownFailureInfo(String),

    /// The body does not start an operation.
    #[error("body {kind} is not a request")]
    NotARequest {
        /// Kind of the offending body
        kind: BodyKind,
    },
}
