//! Message model for the Certificate Management Protocol (RFC 4210).
//!
//! A [`PkiMessage`] is a header, a body and an optional protection value.
//! The header carries the correlation fields the conformance engine grades
//! a peer on (transaction identifier, sender and recipient nonces, sender
//! and recipient names, general info). The body is a sum type with one arm
//! per message kind, so a message can only carry the fields its kind
//! defines: a `certConf` cannot carry a certificate template and an `ip`
//! cannot carry a revocation list.
//!
//! Encoding is deliberately absent. The model derives `serde` traits so an
//! encoding adapter (DER in production, CBOR in the test harness) can map
//! it to bytes, but nothing in this crate knows about ASN.1.
//!
//! # Failure information
//!
//! [`FailureInfo`] is a bit set over the fixed RFC 4210/9480 taxonomy. A
//! rejection may carry several bits at once, so the set is never collapsed
//! to a single code.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod body;
pub mod errors;
pub mod header;
pub mod ids;
pub mod message;
pub mod status;

pub use body::{
    BodyKind, CertConfirmContent, CertRepMessage, CertReqMsg, CertRequests, CertResponse,
    CertStatus, CertTemplate, CertifiedKeyPair, CrlReason, ErrorMsgContent, OperationKind,
    PkiBody, ProofOfPossession, RevDetails, RevRepContent,
};
pub use errors::{ProtocolError, Result};
pub use header::{
    GeneralInfo, GeneralName, InfoValue, ObjectIdentifier, PkiHeader, ProtectionAlg,
    ProtectionKind, ProtocolVersion,
};
pub use ids::{Nonce, TransactionId};
pub use message::{PkiMessage, ProtectionValue};
pub use status::{FailureInfo, PkiStatus, PkiStatusInfo};
