//! Capabilities the engine consumes but never implements.
//!
//! ASN.1 encoding, cryptographic protection and transport are external
//! collaborators. The engine reaches them only through these traits, so a
//! DER/PKIX stack and an HTTP client plug in for live testing while the
//! harness plugs in CBOR, HMAC and an in-process responder.

use async_trait::async_trait;
use bytes::Bytes;
use cmpcheck_proto::{PkiMessage, ProtectionValue};
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, DecodeError, EncodeError, TransportError};

/// Message encoding (DER in production).
pub trait EncodingAdapter: Send + Sync {
    /// Serialize a complete message, protection included.
    fn encode(&self, message: &PkiMessage) -> Result<Bytes, EncodeError>;

    /// Parse a complete message.
    fn decode(&self, bytes: &[u8]) -> Result<PkiMessage, DecodeError>;

    /// True if an issued certificate is syntactically well formed.
    fn certificate_well_formed(&self, certificate: &[u8]) -> bool;
}

/// Outcome of checking the protection of an inbound message.
///
/// Integrity failure and trust failure stay distinct because they map to
/// different failure info (`badMessageCheck` and `signerNotTrusted`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectionCheck {
    /// Protection present and verified.
    Valid,
    /// Message carries no protection.
    Absent,
    /// MAC or signature does not verify.
    BadMessageCheck,
    /// Protection is correct but the signer is not trusted.
    SignerNotTrusted,
}

/// Message protection (MAC, signature, KEM-based MAC).
pub trait CryptoAdapter: Send + Sync {
    /// Secret material used to protect outbound messages.
    type Credential: Send + Sync;

    /// Material used to verify inbound messages.
    type TrustAnchor: Send + Sync;

    /// Compute protection over the header and body of `message`.
    fn protect(
        &self,
        message: &PkiMessage,
        credential: &Self::Credential,
    ) -> Result<ProtectionValue, CryptoError>;

    /// Verify the protection carried by `message`.
    fn verify(&self, message: &PkiMessage, trust: &Self::TrustAnchor) -> ProtectionCheck;

    /// Hash of a certificate, as carried in `certConf`.
    fn cert_hash(&self, certificate: &[u8]) -> Vec<u8>;
}

/// Request/response delivery.
///
/// HTTP, CoAP and file-based delivery are interchangeable implementations.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a request and return the raw response.
    async fn send(&self, request: Bytes) -> Result<Bytes, TransportError>;
}

/// Decoded response plus the capability checks the validator needs.
///
/// The driver fills this in through the adapters so the state machine and
/// validator remain pure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Decoded message
    pub message: PkiMessage,
    /// Result of protection verification
    pub protection: ProtectionCheck,
    /// `certReqId`s of granted certificates that failed the syntax check
    pub malformed_certificates: Vec<i64>,
}

impl Inbound {
    /// Run the encoding adapter's certificate syntax check over every
    /// issued certificate.
    pub fn inspect<C: EncodingAdapter + ?Sized>(
        message: PkiMessage,
        protection: ProtectionCheck,
        codec: &C,
    ) -> Self {
        let malformed_certificates = message
            .body
            .cert_responses()
            .unwrap_or_default()
            .iter()
            .filter_map(|response| {
                let pair = response.certified_key_pair.as_ref()?;
                (!codec.certificate_well_formed(&pair.certificate)).then_some(response.cert_req_id)
            })
            .collect();
        Self { message, protection, malformed_certificates }
    }

    /// Inbound message with valid protection and no malformed certificates.
    pub fn trusted(message: PkiMessage) -> Self {
        Self { message, protection: ProtectionCheck::Valid, malformed_certificates: Vec::new() }
    }
}
