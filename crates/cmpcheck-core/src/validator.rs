//! Response validator.
//!
//! [`validate_response`] grades one inbound message against the message it
//! answers. It is pure and reports every defect it finds, in a fixed check
//! order, so a response failing on several axes yields several defects.
//!
//! Check order:
//!
//! 1. Identity copy-through (recipient, transactionID, recipNonce)
//! 2. Sender nonce freshness
//! 3. Protocol version
//! 4. Protection (presence, family, integrity, trust)
//! 5. Message time
//! 6. Body type
//! 7. Status consistency of issued certificates and certReqIds
//! 8. implicitConfirm negotiation
//! 9. Failure info correctness

use std::{fmt, time::Duration};

use cmpcheck_proto::{
    BodyKind, FailureInfo, GeneralName, Nonce, PkiBody, PkiHeader, PkiMessage, PkiStatus,
    ProtectionKind, ProtocolVersion, TransactionId,
};
use serde::{Deserialize, Serialize};

use crate::adapter::{Inbound, ProtectionCheck};

/// Minimum Hamming distance between nonces used by the diversity check.
pub const DEFAULT_NONCE_DISTANCE: u32 = 10;

/// Tunable validation rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    /// Unprotected responses are defects
    pub require_protection: bool,
    /// Minimum sender nonce length in bytes
    pub min_nonce_len: usize,
    /// Allowed distance between request and response `messageTime`
    pub max_time_skew: Duration,
    /// Protocol versions a response may carry
    pub accepted_versions: Vec<ProtocolVersion>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            require_protection: true,
            min_nonce_len: 16,
            max_time_skew: Duration::from_secs(300),
            accepted_versions: vec![ProtocolVersion::Cmp2000, ProtocolVersion::Cmp2021],
        }
    }
}

impl ValidationPolicy {
    /// Set whether unprotected responses are defects.
    #[must_use]
    pub fn with_require_protection(mut self, require: bool) -> Self {
        self.require_protection = require;
        self
    }

    /// Set the minimum sender nonce length.
    #[must_use]
    pub fn with_min_nonce_len(mut self, len: usize) -> Self {
        self.min_nonce_len = len;
        self
    }

    /// Set the allowed `messageTime` skew.
    #[must_use]
    pub fn with_max_time_skew(mut self, skew: Duration) -> Self {
        self.max_time_skew = skew;
        self
    }

    /// Set the accepted protocol versions.
    #[must_use]
    pub fn with_accepted_versions(mut self, versions: Vec<ProtocolVersion>) -> Self {
        self.accepted_versions = versions;
        self
    }
}

/// One way a peer deviated from the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Defect {
    /// Response recipient is not the request sender.
    RecipientMismatch {
        /// Request sender
        expected: GeneralName,
        /// Response recipient
        actual: GeneralName,
    },
    /// Response transactionID differs from the request.
    TransactionIdMismatch {
        /// Request transactionID
        expected: TransactionId,
        /// Response transactionID
        actual: TransactionId,
    },
    /// Response recipNonce does not echo the request senderNonce.
    BadRecipientNonce {
        /// Request senderNonce
        expected: Nonce,
        /// Response recipNonce, if any
        actual: Option<Nonce>,
    },
    /// Response carries no senderNonce.
    MissingSenderNonce,
    /// Response senderNonce is shorter than policy allows.
    ShortSenderNonce {
        /// Length found
        len: usize,
        /// Policy minimum
        min: usize,
    },
    /// Response senderNonce was already seen in this transaction.
    ReplayedSenderNonce {
        /// The reused nonce
        nonce: Nonce,
    },
    /// Response protocol version is not accepted.
    UnsupportedVersion {
        /// Version found
        version: ProtocolVersion,
    },
    /// Response is unprotected.
    MissingProtection,
    /// Response protection family differs from the request's.
    WrongIntegrity {
        /// Family used by the request
        expected: ProtectionKind,
        /// Family used by the response
        actual: ProtectionKind,
    },
    /// Response MAC or signature does not verify.
    BadMessageCheck,
    /// Response signer is not trusted.
    SignerNotTrusted,
    /// Response messageTime too far from the request's.
    BadMessageTime {
        /// Distance between the two timestamps
        skew: Duration,
    },
    /// Response body is not the kind the request calls for.
    UnexpectedBodyType {
        /// Kind the request calls for
        expected: BodyKind,
        /// Kind received
        actual: BodyKind,
    },
    /// Response certReqIds do not match the request.
    CertReqIdMismatch {
        /// Identifiers in the request
        expected: Vec<i64>,
        /// Identifiers in the response
        actual: Vec<i64>,
    },
    /// A rejected entry carries a certificate.
    CertificateWithRejection {
        /// Offending entry
        cert_req_id: i64,
    },
    /// A granted entry carries no certificate.
    MissingCertificate {
        /// Offending entry
        cert_req_id: i64,
    },
    /// A granted certificate is not well formed.
    MalformedCertificate {
        /// Offending entry
        cert_req_id: i64,
    },
    /// implicitConfirm granted without being requested.
    UnsolicitedImplicitConfirm,
    /// implicitConfirm present on a rejection.
    ImplicitConfirmOnRejection,
    /// failInfo present on a non-rejection status.
    FailureInfoWithoutRejection {
        /// Status that carried failInfo
        status: PkiStatus,
        /// The failInfo carried
        fail_info: FailureInfo,
    },
    /// failInfo carries bits outside the taxonomy.
    UnknownFailureInfo {
        /// Unknown bits
        bits: u32,
    },
    /// Rejection does not report the provoked failure.
    WrongFailureInfo {
        /// Bit the request provoked
        expected: FailureInfo,
        /// failInfo reported
        actual: FailureInfo,
    },
    /// A deliberately faulty request was granted.
    ExpectedRejection {
        /// Bit the request provoked
        expected: FailureInfo,
    },
    /// An error message whose status is not `rejection`.
    ErrorWithoutRejection {
        /// Status found
        status: PkiStatus,
    },
    /// Peer answered a confirmation with an error message.
    PeerError {
        /// failInfo the peer reported
        fail_info: FailureInfo,
    },
    /// Peer answered `waiting`; polling is not driven by the engine.
    PollingNotSupported,
    /// No response before the response deadline.
    ResponseTimeout,
    /// Transport failed.
    TransportUnavailable {
        /// Transport error text
        reason: String,
    },
    /// Response bytes could not be decoded.
    MalformedMessage {
        /// Decoder error text
        reason: String,
    },
}

impl Defect {
    /// Stable name, used in reports and oracle assertions.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RecipientMismatch { .. } => "recipient_mismatch",
            Self::TransactionIdMismatch { .. } => "transaction_id_mismatch",
            Self::BadRecipientNonce { .. } => "bad_recipient_nonce",
            Self::MissingSenderNonce => "missing_sender_nonce",
            Self::ShortSenderNonce { .. } => "short_sender_nonce",
            Self::ReplayedSenderNonce { .. } => "replayed_sender_nonce",
            Self::UnsupportedVersion { .. } => "unsupported_version",
            Self::MissingProtection => "missing_protection",
            Self::WrongIntegrity { .. } => "wrong_integrity",
            Self::BadMessageCheck => "bad_message_check",
            Self::SignerNotTrusted => "signer_not_trusted",
            Self::BadMessageTime { .. } => "bad_message_time",
            Self::UnexpectedBodyType { .. } => "unexpected_body_type",
            Self::CertReqIdMismatch { .. } => "cert_req_id_mismatch",
            Self::CertificateWithRejection { .. } => "certificate_with_rejection",
            Self::MissingCertificate { .. } => "missing_certificate",
            Self::MalformedCertificate { .. } => "malformed_certificate",
            Self::UnsolicitedImplicitConfirm => "unsolicited_implicit_confirm",
            Self::ImplicitConfirmOnRejection => "implicit_confirm_on_rejection",
            Self::FailureInfoWithoutRejection { .. } => "failure_info_without_rejection",
            Self::UnknownFailureInfo { .. } => "unknown_failure_info",
            Self::WrongFailureInfo { .. } => "wrong_failure_info",
            Self::ExpectedRejection { .. } => "expected_rejection",
            Self::ErrorWithoutRejection { .. } => "error_without_rejection",
            Self::PeerError { .. } => "peer_error",
            Self::PollingNotSupported => "polling_not_supported",
            Self::ResponseTimeout => "response_timeout",
            Self::TransportUnavailable { .. } => "transport_unavailable",
            Self::MalformedMessage { .. } => "malformed_message",
        }
    }

    /// Failure info category the defect falls under.
    pub fn failure_info(&self) -> FailureInfo {
        match self {
            Self::BadRecipientNonce { .. } => FailureInfo::BAD_RECIPIENT_NONCE,
            Self::MissingSenderNonce
            | Self::ShortSenderNonce { .. }
            | Self::ReplayedSenderNonce { .. } => FailureInfo::BAD_SENDER_NONCE,
            Self::UnsupportedVersion { .. } => FailureInfo::UNSUPPORTED_VERSION,
            Self::MissingProtection | Self::BadMessageCheck => FailureInfo::BAD_MESSAGE_CHECK,
            Self::WrongIntegrity { .. } => FailureInfo::WRONG_INTEGRITY,
            Self::SignerNotTrusted => FailureInfo::SIGNER_NOT_TRUSTED,
            Self::BadMessageTime { .. } => FailureInfo::BAD_TIME,
            Self::MalformedCertificate { .. }
            | Self::MalformedMessage { .. }
            | Self::UnknownFailureInfo { .. } => FailureInfo::BAD_DATA_FORMAT,
            Self::PeerError { fail_info } => *fail_info,
            Self::WrongFailureInfo { expected, .. } | Self::ExpectedRejection { expected } => {
                *expected
            },
            Self::ResponseTimeout | Self::TransportUnavailable { .. } => {
                FailureInfo::SYSTEM_UNAVAIL
            },
            Self::RecipientMismatch { .. }
            | Self::TransactionIdMismatch { .. }
            | Self::UnexpectedBodyType { .. }
            | Self::CertReqIdMismatch { .. }
            | Self::CertificateWithRejection { .. }
            | Self::MissingCertificate { .. }
            | Self::UnsolicitedImplicitConfirm
            | Self::ImplicitConfirmOnRejection
            | Self::FailureInfoWithoutRejection { .. }
            | Self::ErrorWithoutRejection { .. }
            | Self::PollingNotSupported => FailureInfo::BAD_REQUEST,
        }
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.name())?;
        match self {
            Self::RecipientMismatch { expected, actual } => {
                write!(f, "recipient {actual} is not request sender {expected}")
            },
            Self::TransactionIdMismatch { expected, actual } => {
                write!(f, "transactionID {actual} differs from {expected}")
            },
            Self::BadRecipientNonce { expected, actual: Some(actual) } => {
                write!(f, "recipNonce {actual} does not echo senderNonce {expected}")
            },
            Self::BadRecipientNonce { expected, actual: None } => {
                write!(f, "recipNonce missing, expected {expected}")
            },
            Self::MissingSenderNonce => f.write_str("senderNonce missing"),
            Self::ShortSenderNonce { len, min } => {
                write!(f, "senderNonce is {len} bytes, at least {min} required")
            },
            Self::ReplayedSenderNonce { nonce } => {
                write!(f, "senderNonce {nonce} already seen in this transaction")
            },
            Self::UnsupportedVersion { version } => write!(f, "{version} not accepted"),
            Self::MissingProtection => f.write_str("response is unprotected"),
            Self::WrongIntegrity { expected, actual } => {
                write!(f, "{actual} protection answers {expected} protection")
            },
            Self::BadMessageCheck => f.write_str("protection does not verify"),
            Self::SignerNotTrusted => f.write_str("signer not trusted"),
            Self::BadMessageTime { skew } => write!(f, "messageTime off by {}s", skew.as_secs()),
            Self::UnexpectedBodyType { expected, actual } => {
                write!(f, "expected {expected}, got {actual}")
            },
            Self::CertReqIdMismatch { expected, actual } => {
                write!(f, "certReqIds {actual:?} do not match {expected:?}")
            },
            Self::CertificateWithRejection { cert_req_id } => {
                write!(f, "certReqId {cert_req_id} rejected but carries a certificate")
            },
            Self::MissingCertificate { cert_req_id } => {
                write!(f, "certReqId {cert_req_id} granted without a certificate")
            },
            Self::MalformedCertificate { cert_req_id } => {
                write!(f, "certReqId {cert_req_id} certificate is malformed")
            },
            Self::UnsolicitedImplicitConfirm => {
                f.write_str("implicitConfirm granted but not requested")
            },
            Self::ImplicitConfirmOnRejection => f.write_str("implicitConfirm on a rejection"),
            Self::FailureInfoWithoutRejection { status, fail_info } => {
                write!(f, "failInfo {fail_info} on status {status}")
            },
            Self::UnknownFailureInfo { bits } => write!(f, "failInfo bits {bits:#x} unknown"),
            Self::WrongFailureInfo { expected, actual } => {
                write!(f, "rejected with {actual}, expected {expected}")
            },
            Self::ExpectedRejection { expected } => {
                write!(f, "request provoking {expected} was granted")
            },
            Self::ErrorWithoutRejection { status } => {
                write!(f, "error message with status {status}")
            },
            Self::PeerError { fail_info } => write!(f, "peer returned error ({fail_info})"),
            Self::PollingNotSupported => f.write_str("peer answered waiting"),
            Self::ResponseTimeout => f.write_str("no response before deadline"),
            Self::TransportUnavailable { reason } | Self::MalformedMessage { reason } => {
                f.write_str(reason)
            },
        }
    }
}

/// Ordered set of defects. Empty means compliant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Defects(Vec<Defect>);

impl Defects {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a defect.
    pub fn push(&mut self, defect: Defect) {
        self.0.push(defect);
    }

    /// Append every defect from another set.
    pub fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// True if nothing was found.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of defects.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Defects in detection order.
    pub fn iter(&self) -> impl Iterator<Item = &Defect> {
        self.0.iter()
    }

    /// Stable names in detection order.
    pub fn names(&self) -> Vec<&'static str> {
        self.0.iter().map(Defect::name).collect()
    }

    /// True if a defect with the given name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|defect| defect.name() == name)
    }

    /// Union of every defect's failure info.
    pub fn failure_info(&self) -> FailureInfo {
        self.0.iter().fold(FailureInfo::empty(), |acc, defect| acc | defect.failure_info())
    }
}

impl fmt::Display for Defects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no defects");
        }
        for (i, defect) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{defect}")?;
        }
        Ok(())
    }
}

/// What the validator grades a response against.
#[derive(Debug, Clone, Copy)]
pub struct Expectation<'a> {
    /// Message the response answers
    pub request: &'a PkiMessage,
    /// Nonces already issued or observed in the transaction
    pub seen_nonces: &'a [Nonce],
    /// Failure the request deliberately provokes, if any
    pub provoked: Option<FailureInfo>,
}

/// Grade `inbound` against `expectation`.
pub fn validate_response(
    expectation: &Expectation<'_>,
    inbound: &Inbound,
    policy: &ValidationPolicy,
) -> Defects {
    let mut defects = Defects::new();
    let request = expectation.request;
    let response = &inbound.message;

    check_identity(&request.header, &response.header, &mut defects);
    check_freshness(expectation.seen_nonces, response, policy, &mut defects);

    if !policy.accepted_versions.contains(&response.header.pvno) {
        defects.push(Defect::UnsupportedVersion { version: response.header.pvno });
    }

    check_protection(request, inbound, policy, &mut defects);

    if let (Some(sent), Some(received)) = (request.header.message_time, response.header.message_time)
    {
        let skew = received
            .duration_since(sent)
            .or_else(|_| sent.duration_since(received))
            .unwrap_or_default();
        if skew > policy.max_time_skew {
            defects.push(Defect::BadMessageTime { skew });
        }
    }

    let expected_kind = request.kind().expected_response();
    let actual_kind = response.kind();
    if let Some(expected) = expected_kind
        && actual_kind != expected
        && actual_kind != BodyKind::Error
    {
        defects.push(Defect::UnexpectedBodyType { expected, actual: actual_kind });
        return defects;
    }

    check_certificates(request, inbound, &mut defects);
    check_implicit_confirm(request, response, &mut defects);
    check_failure_info(response, expectation.provoked, &mut defects);

    defects
}

/// Identity copy-through checks alone: recipient, transaction identifier
/// and recipient nonce of `response` against the `request` it answers.
pub fn validate_identity(request: &PkiHeader, response: &PkiHeader) -> Defects {
    let mut defects = Defects::new();
    check_identity(request, response, &mut defects);
    defects
}

fn check_identity(request: &PkiHeader, response: &PkiHeader, defects: &mut Defects) {
    if response.recipient != request.sender {
        defects.push(Defect::RecipientMismatch {
            expected: request.sender.clone(),
            actual: response.recipient.clone(),
        });
    }
    if response.transaction_id != request.transaction_id {
        defects.push(Defect::TransactionIdMismatch {
            expected: request.transaction_id,
            actual: response.transaction_id,
        });
    }
    if response.recip_nonce.as_ref() != Some(&request.sender_nonce) {
        defects.push(Defect::BadRecipientNonce {
            expected: request.sender_nonce.clone(),
            actual: response.recip_nonce.clone(),
        });
    }
}

fn check_freshness(
    seen: &[Nonce],
    response: &PkiMessage,
    policy: &ValidationPolicy,
    defects: &mut Defects,
) {
    let nonce = &response.header.sender_nonce;
    if nonce.is_empty() {
        defects.push(Defect::MissingSenderNonce);
        return;
    }
    if nonce.len() < policy.min_nonce_len {
        defects.push(Defect::ShortSenderNonce { len: nonce.len(), min: policy.min_nonce_len });
    }
    if seen.contains(nonce) {
        defects.push(Defect::ReplayedSenderNonce { nonce: nonce.clone() });
    }
}

fn check_protection(
    request: &PkiMessage,
    inbound: &Inbound,
    policy: &ValidationPolicy,
    defects: &mut Defects,
) {
    let response_kind = inbound.message.header.protection_kind();
    let unprotected = response_kind.is_none() || inbound.protection == ProtectionCheck::Absent;
    if unprotected {
        if policy.require_protection {
            defects.push(Defect::MissingProtection);
        }
        return;
    }
    if let (Some(expected), Some(actual)) = (request.header.protection_kind(), response_kind)
        && expected != actual
    {
        defects.push(Defect::WrongIntegrity { expected, actual });
    }
    match inbound.protection {
        ProtectionCheck::BadMessageCheck => defects.push(Defect::BadMessageCheck),
        ProtectionCheck::SignerNotTrusted => defects.push(Defect::SignerNotTrusted),
        ProtectionCheck::Valid | ProtectionCheck::Absent => {},
    }
}

fn check_certificates(request: &PkiMessage, inbound: &Inbound, defects: &mut Defects) {
    let Some(responses) = inbound.message.body.cert_responses() else {
        return;
    };

    let mut expected = request.body.cert_req_ids();
    let mut actual = inbound.message.body.cert_req_ids();
    expected.sort_unstable();
    actual.sort_unstable();
    if expected != actual {
        defects.push(Defect::CertReqIdMismatch { expected, actual });
    }

    for response in responses {
        let cert_req_id = response.cert_req_id;
        let status = response.status.status;
        let has_certificate = response.certified_key_pair.is_some();
        if status.is_rejection() && has_certificate {
            defects.push(Defect::CertificateWithRejection { cert_req_id });
        } else if status.grants() && !has_certificate {
            defects.push(Defect::MissingCertificate { cert_req_id });
        } else if status.grants() && inbound.malformed_certificates.contains(&cert_req_id) {
            defects.push(Defect::MalformedCertificate { cert_req_id });
        }
    }
}

fn check_implicit_confirm(request: &PkiMessage, response: &PkiMessage, defects: &mut Defects) {
    if !response.implicit_confirm() {
        return;
    }
    if !request.implicit_confirm() {
        defects.push(Defect::UnsolicitedImplicitConfirm);
    }
    let rejected = response.kind() == BodyKind::Error
        || response.body.overall_status().is_some_and(|info| info.status.is_rejection());
    if rejected {
        defects.push(Defect::ImplicitConfirmOnRejection);
    }
}

fn check_failure_info(response: &PkiMessage, provoked: Option<FailureInfo>, defects: &mut Defects) {
    if let PkiBody::Error(content) = &response.body
        && !content.status_info.status.is_rejection()
    {
        defects.push(Defect::ErrorWithoutRejection { status: content.status_info.status });
    }

    for info in response.body.status_infos() {
        if !info.status.is_rejection() && !info.fail_info.is_empty() {
            defects.push(Defect::FailureInfoWithoutRejection {
                status: info.status,
                fail_info: info.fail_info,
            });
        }
        let unknown = info.fail_info.unknown_bits();
        if unknown != 0 {
            defects.push(Defect::UnknownFailureInfo { bits: unknown });
        }
    }

    let Some(expected) = provoked else {
        return;
    };
    match response.body.overall_status() {
        Some(info) if info.status.is_rejection() => {
            if !info.fail_info.contains(expected) {
                defects.push(Defect::WrongFailureInfo { expected, actual: info.fail_info });
            }
        },
        _ => defects.push(Defect::ExpectedRejection { expected }),
    }
}

/// Every nonce in the list is distinct.
///
/// # Errors
///
/// Returns the repeated nonces with their counts.
pub fn nonces_are_unique(nonces: &[Nonce]) -> Result<(), NonceCheckError> {
    let mut repeated: Vec<(Nonce, usize)> = Vec::new();
    for (i, nonce) in nonces.iter().enumerate() {
        if nonces[..i].contains(nonce) || repeated.iter().any(|(seen, _)| seen == nonce) {
            continue;
        }
        let count = nonces.iter().filter(|other| *other == nonce).count();
        if count > 1 {
            repeated.push((nonce.clone(), count));
        }
    }
    if repeated.is_empty() { Ok(()) } else { Err(NonceCheckError::Repeated(repeated)) }
}

/// Every pair of nonces differs in at least `min_distance` bits.
///
/// Stops at the first pair that is too close.
pub fn nonces_are_diverse(nonces: &[Nonce], min_distance: u32) -> Result<(), NonceCheckError> {
    for (i, first) in nonces.iter().enumerate() {
        for second in &nonces[i + 1..] {
            let distance = first.hamming_distance(second);
            if distance < min_distance {
                return Err(NonceCheckError::TooClose {
                    first: first.clone(),
                    second: second.clone(),
                    distance,
                    min_distance,
                });
            }
        }
    }
    Ok(())
}

/// Nonce list check failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NonceCheckError {
    /// Some nonces occur more than once.
    #[error("nonces repeat: {0:?}")]
    Repeated(Vec<(Nonce, usize)>),

    /// Two nonces are closer than the minimum Hamming distance.
    #[error("nonces {first} and {second} differ in {distance} bits, {min_distance} required")]
    TooClose {
        /// First nonce of the pair
        first: Nonce,
        /// Second nonce of the pair
        second: Nonce,
        /// Hamming distance found
        distance: u32,
        /// Minimum required
        min_distance: u32,
    },
}

#[cfg(test)]
mod tests {
    use cmpcheck_proto::{
        CertRepMessage, CertReqMsg, CertRequests, CertResponse, CertTemplate, CertifiedKeyPair,
        PkiHeader, PkiStatusInfo, ProtectionAlg,
    };

    use super::*;

    fn ee() -> GeneralName {
        GeneralName::directory("CN=ee")
    }

    fn ca() -> GeneralName {
        GeneralName::directory("CN=Mock CA")
    }

    fn request() -> PkiMessage {
        let header =
            PkiHeader::new(ee(), ca(), TransactionId::new([1; 16]), Nonce::new(vec![0xa0; 16]))
                .with_protection(ProtectionAlg::PasswordBasedMac, b"ee".to_vec())
                .with_implicit_confirm();
        PkiMessage::new(
            header,
            PkiBody::Ir(CertRequests::single(CertReqMsg {
                cert_req_id: 0,
                template: CertTemplate { subject: Some(ee()), public_key: Some(vec![1]) },
                popo: None,
            })),
        )
    }

    fn granted(request: &PkiMessage) -> PkiMessage {
        let header = PkiHeader::new(
            ca(),
            request.header.sender.clone(),
            request.header.transaction_id,
            Nonce::new(vec![0xb0; 16]),
        )
        .with_protection(ProtectionAlg::PasswordBasedMac, b"ca".to_vec())
        .with_recip_nonce(request.header.sender_nonce.clone())
        .with_implicit_confirm();
        PkiMessage::new(
            header,
            PkiBody::Ip(CertRepMessage {
                ca_pubs: Vec::new(),
                responses: vec![CertResponse {
                    cert_req_id: 0,
                    status: PkiStatusInfo::accepted(),
                    certified_key_pair: Some(CertifiedKeyPair {
                        certificate: vec![0x30, 0x00],
                        private_key: None,
                    }),
                }],
            }),
        )
    }

    fn grade(request: &PkiMessage, response: PkiMessage) -> Defects {
        let seen = [request.header.sender_nonce.clone()];
        let expectation = Expectation { request, seen_nonces: &seen, provoked: None };
        validate_response(&expectation, &Inbound::trusted(response), &ValidationPolicy::default())
    }

    #[test]
    fn conforming_response_has_no_defects() {
        let req = request();
        let defects = grade(&req, granted(&req));
        assert!(defects.is_empty(), "{defects}");
    }

    #[test]
    fn identity_defects_are_reported_independently() {
        let req = request();
        let mut resp = granted(&req);
        resp.header.recipient = GeneralName::directory("CN=someone else");
        resp.header.transaction_id = TransactionId::new([2; 16]);
        resp.header.recip_nonce = Some(Nonce::new(vec![0xff; 16]));

        let defects = grade(&req, resp);
        assert_eq!(
            defects.names(),
            vec!["recipient_mismatch", "transaction_id_mismatch", "bad_recipient_nonce"]
        );
        assert_eq!(
            defects.failure_info(),
            FailureInfo::BAD_REQUEST | FailureInfo::BAD_RECIPIENT_NONCE
        );
    }

    #[test]
    fn replayed_nonce_is_detected() {
        let req = request();
        let mut resp = granted(&req);
        resp.header.sender_nonce = req.header.sender_nonce.clone();

        let defects = grade(&req, resp);
        assert_eq!(defects.names(), vec!["replayed_sender_nonce"]);
    }

    #[test]
    fn unsolicited_implicit_confirm_is_a_defect() {
        let mut req = request();
        req.header.general_info.set_implicit_confirm(false);
        let resp = granted(&req);

        let defects = grade(&req, resp);
        assert_eq!(defects.names(), vec!["unsolicited_implicit_confirm"]);
    }

    #[test]
    fn rejection_with_certificate_reports_every_axis() {
        let req = request();
        let mut resp = granted(&req);
        if let PkiBody::Ip(rep) = &mut resp.body {
            rep.responses[0].status = PkiStatusInfo::rejection(FailureInfo::BAD_POP);
        }

        let defects = grade(&req, resp);
        insta::assert_snapshot!(
            defects.to_string(),
            @"certificate_with_rejection: certReqId 0 rejected but carries a certificate; implicit_confirm_on_rejection: implicitConfirm on a rejection"
        );
    }

    #[test]
    fn wrong_body_type_stops_body_checks() {
        let req = request();
        let mut resp = granted(&req);
        resp.body = PkiBody::PkiConf;

        let defects = grade(&req, resp);
        assert_eq!(defects.names(), vec!["unexpected_body_type"]);
    }

    #[test]
    fn protection_failures_stay_distinct() {
        let req = request();
        let policy = ValidationPolicy::default();
        let seen = [req.header.sender_nonce.clone()];
        let expectation = Expectation { request: &req, seen_nonces: &seen, provoked: None };

        let mut inbound = Inbound::trusted(granted(&req));
        inbound.protection = ProtectionCheck::BadMessageCheck;
        assert_eq!(validate_response(&expectation, &inbound, &policy).names(), vec![
            "bad_message_check"
        ]);

        inbound.protection = ProtectionCheck::SignerNotTrusted;
        assert_eq!(validate_response(&expectation, &inbound, &policy).names(), vec![
            "signer_not_trusted"
        ]);

        inbound.message.header.protection_alg = None;
        assert_eq!(validate_response(&expectation, &inbound, &policy).names(), vec![
            "missing_protection"
        ]);
        let relaxed = policy.with_require_protection(false);
        assert!(validate_response(&expectation, &inbound, &relaxed).is_empty());
    }

    #[test]
    fn provoked_failure_must_be_reported() {
        let req = request();
        let seen = [req.header.sender_nonce.clone()];
        let expectation = Expectation {
            request: &req,
            seen_nonces: &seen,
            provoked: Some(FailureInfo::TRANSACTION_ID_IN_USE),
        };
        let mut resp = granted(&req);
        resp.header.general_info.set_implicit_confirm(false);
        if let PkiBody::Ip(rep) = &mut resp.body {
            rep.responses[0].status = PkiStatusInfo::rejection(FailureInfo::BAD_REQUEST);
            rep.responses[0].certified_key_pair = None;
        }

        let defects =
            validate_response(&expectation, &Inbound::trusted(resp), &ValidationPolicy::default());
        assert_eq!(defects.names(), vec!["wrong_failure_info"]);
        assert_eq!(defects.failure_info(), FailureInfo::TRANSACTION_ID_IN_USE);
    }

    #[test]
    fn nonce_helpers_match_diversity_rules() {
        let a = Nonce::new(vec![0x00; 4]);
        let b = Nonce::new(vec![0xff; 4]);
        assert!(nonces_are_unique(&[a.clone(), b.clone()]).is_ok());
        assert_eq!(
            nonces_are_unique(&[a.clone(), b.clone(), a.clone()]),
            Err(NonceCheckError::Repeated(vec![(a.clone(), 2)]))
        );

        assert!(nonces_are_diverse(&[a.clone(), b.clone()], 32).is_ok());
        let close = Nonce::new(vec![0x01, 0, 0, 0]);
        assert!(matches!(
            nonces_are_diverse(&[a, b, close], DEFAULT_NONCE_DISTANCE),
            Err(NonceCheckError::TooClose { distance: 1, .. })
        ));
    }
}
