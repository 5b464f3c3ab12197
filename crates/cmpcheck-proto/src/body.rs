//! PKI message bodies (RFC 4210 section 5.1.2).
//!
//! Each arm of [`PkiBody`] owns exactly the content its message kind defines.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::{
    errors::{ProtocolError, Result},
    header::{GeneralInfo, GeneralName, ObjectIdentifier},
    status::{PkiStatus, PkiStatusInfo},
};

/// Discriminant of a [`PkiBody`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodyKind {
    /// Initialization request
    Ir,
    /// Initialization response
    Ip,
    /// Certification request
    Cr,
    /// Certification response
    Cp,
    /// Key update request
    Kur,
    /// Key update response
    Kup,
    /// Revocation request
    Rr,
    /// Revocation response
    Rp,
    /// Certificate confirmation
    CertConf,
    /// Confirmation acknowledgement
    PkiConf,
    /// General message
    Genm,
    /// General response
    Genp,
    /// Error message
    Error,
}

impl BodyKind {
    /// Body kind a conforming peer answers this request with.
    pub const fn expected_response(self) -> Option<Self> {
        match self {
            Self::Ir => Some(Self::Ip),
            Self::Cr => Some(Self::Cp),
            Self::Kur => Some(Self::Kup),
            Self::Rr => Some(Self::Rp),
            Self::CertConf => Some(Self::PkiConf),
            Self::Genm => Some(Self::Genp),
            _ => None,
        }
    }

    /// True for kinds an end entity sends to open or continue an operation.
    pub const fn is_request(self) -> bool {
        self.expected_response().is_some()
    }
}

impl fmt::Display for BodyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ir => "ir",
            Self::Ip => "ip",
            Self::Cr => "cr",
            Self::Cp => "cp",
            Self::Kur => "kur",
            Self::Kup => "kup",
            Self::Rr => "rr",
            Self::Rp => "rp",
            Self::CertConf => "certConf",
            Self::PkiConf => "pkiConf",
            Self::Genm => "genm",
            Self::Genp => "genp",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// PKI management operation a transaction performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// ir/ip: first certificate from a new PKI
    Enrollment,
    /// cr/cp: additional certificate from a known PKI
    Certification,
    /// kur/kup: certificate update
    KeyUpdate,
    /// rr/rp
    Revocation,
    /// genm/genp
    GeneralMessage,
}

impl OperationKind {
    /// Operation opened by a request body, if any.
    pub const fn from_request(kind: BodyKind) -> Option<Self> {
        match kind {
            BodyKind::Ir => Some(Self::Enrollment),
            BodyKind::Cr => Some(Self::Certification),
            BodyKind::Kur => Some(Self::KeyUpdate),
            BodyKind::Rr => Some(Self::Revocation),
            BodyKind::Genm => Some(Self::GeneralMessage),
            _ => None,
        }
    }

    /// Body kind that opens this operation.
    pub const fn request_kind(self) -> BodyKind {
        match self {
            Self::Enrollment => BodyKind::Ir,
            Self::Certification => BodyKind::Cr,
            Self::KeyUpdate => BodyKind::Kur,
            Self::Revocation => BodyKind::Rr,
            Self::GeneralMessage => BodyKind::Genm,
        }
    }

    /// True if a positive response issues certificates that must be
    /// confirmed (explicitly or implicitly).
    pub const fn requires_confirmation(self) -> bool {
        matches!(self, Self::Enrollment | Self::Certification | Self::KeyUpdate)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Enrollment => "enrollment",
            Self::Certification => "certification",
            Self::KeyUpdate => "key update",
            Self::Revocation => "revocation",
            Self::GeneralMessage => "general message",
        };
        f.write_str(name)
    }
}

/// `CertTemplate`, reduced to the fields the engine inspects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertTemplate {
    /// Requested subject
    pub subject: Option<GeneralName>,
    /// Encoded `SubjectPublicKeyInfo`
    pub public_key: Option<Vec<u8>>,
}

/// `ProofOfPossession`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofOfPossession {
    /// `raVerified`
    RaVerified,
    /// `signature`
    Signature {
        /// Signature algorithm
        algorithm: ObjectIdentifier,
        /// Signature value
        signature: Vec<u8>,
    },
    /// `keyEncipherment`
    KeyEncipherment,
    /// `keyAgreement`
    KeyAgreement,
}

/// `CertReqMsg`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertReqMsg {
    /// `certReqId`, echoed by the matching response
    pub cert_req_id: i64,
    /// `certTemplate`
    pub template: CertTemplate,
    /// `popo`
    pub popo: Option<ProofOfPossession>,
}

/// Non-empty `CertReqMessages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<CertReqMsg>", into = "Vec<CertReqMsg>")]
pub struct CertRequests(Vec<CertReqMsg>);

impl CertRequests {
    /// Build a request list, rejecting an empty one.
    pub fn new(requests: Vec<CertReqMsg>) -> Result<Self> {
        if requests.is_empty() {
            return Err(ProtocolError::EmptyCertRequests);
        }
        Ok(Self(requests))
    }

    /// List with one entry.
    pub fn single(request: CertReqMsg) -> Self {
        Self(vec![request])
    }

    /// Entries in order.
    pub fn as_slice(&self) -> &[CertReqMsg] {
        &self.0
    }

    /// Number of entries (never zero).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `certReqId` of every entry, in order.
    pub fn ids(&self) -> Vec<i64> {
        self.0.iter().map(|req| req.cert_req_id).collect()
    }
}

impl TryFrom<Vec<CertReqMsg>> for CertRequests {
    type Error = ProtocolError;

    fn try_from(value: Vec<CertReqMsg>) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CertRequests> for Vec<CertReqMsg> {
    fn from(value: CertRequests) -> Self {
        value.0
    }
}

/// `CertifiedKeyPair`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertifiedKeyPair {
    /// Encoded certificate
    pub certificate: Vec<u8>,
    /// Encrypted private key, for central key generation
    pub private_key: Option<Vec<u8>>,
}

/// `CertResponse`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertResponse {
    /// `certReqId` of the request entry being answered
    pub cert_req_id: i64,
    /// `status`
    pub status: PkiStatusInfo,
    /// `certifiedKeyPair`
    pub certified_key_pair: Option<CertifiedKeyPair>,
}

/// `CertRepMessage`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertRepMessage {
    /// `caPubs`
    pub ca_pubs: Vec<Vec<u8>>,
    /// `response`
    pub responses: Vec<CertResponse>,
}

/// `CRLReason`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum CrlReason {
    Unspecified = 0,
    KeyCompromise = 1,
    CaCompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    RemoveFromCrl = 8,
}

/// `RevDetails`, reduced to what identifies the certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevDetails {
    /// Serial number of the certificate to revoke
    pub serial_number: Vec<u8>,
    /// Issuer of the certificate to revoke
    pub issuer: GeneralName,
    /// Revocation reason
    pub reason: CrlReason,
}

/// `RevRepContent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevRepContent {
    /// One status per revocation request entry
    pub status: Vec<PkiStatusInfo>,
}

/// `CertStatus`: one entry of a `certConf`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertStatus {
    /// Hash of the certificate being confirmed
    pub cert_hash: Vec<u8>,
    /// `certReqId` the certificate was issued for
    pub cert_req_id: i64,
    /// Absent means acceptance
    pub status_info: Option<PkiStatusInfo>,
}

impl CertStatus {
    /// Accept a certificate.
    pub fn accept(cert_hash: Vec<u8>, cert_req_id: i64) -> Self {
        Self { cert_hash, cert_req_id, status_info: None }
    }

    /// Reject a certificate.
    pub fn reject(cert_hash: Vec<u8>, cert_req_id: i64, info: PkiStatusInfo) -> Self {
        Self { cert_hash, cert_req_id, status_info: Some(info) }
    }

    /// True if the entry accepts the certificate.
    pub fn is_acceptance(&self) -> bool {
        self.status_info.as_ref().is_none_or(|info| info.status.grants())
    }
}

/// `CertConfirmContent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertConfirmContent(pub Vec<CertStatus>);

impl CertConfirmContent {
    /// True if every entry accepts its certificate.
    pub fn accepts_all(&self) -> bool {
        self.0.iter().all(CertStatus::is_acceptance)
    }
}

/// `ErrorMsgContent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMsgContent {
    /// `pKIStatusInfo`
    pub status_info: PkiStatusInfo,
    /// `errorCode`
    pub error_code: Option<i64>,
    /// `errorDetails`
    pub error_details: Vec<String>,
}

/// `PKIBody`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PkiBody {
    /// Initialization request
    Ir(CertRequests),
    /// Initialization response
    Ip(CertRepMessage),
    /// Certification request
    Cr(CertRequests),
    /// Certification response
    Cp(CertRepMessage),
    /// Key update request
    Kur(CertRequests),
    /// Key update response
    Kup(CertRepMessage),
    /// Revocation request
    Rr(Vec<RevDetails>),
    /// Revocation response
    Rp(RevRepContent),
    /// Certificate confirmation
    CertConf(CertConfirmContent),
    /// Confirmation acknowledgement
    PkiConf,
    /// General message
    Genm(GeneralInfo),
    /// General response
    Genp(GeneralInfo),
    /// Error message
    Error(ErrorMsgContent),
}

impl PkiBody {
    /// Discriminant.
    pub const fn kind(&self) -> BodyKind {
        match self {
            Self::Ir(_) => BodyKind::Ir,
            Self::Ip(_) => BodyKind::Ip,
            Self::Cr(_) => BodyKind::Cr,
            Self::Cp(_) => BodyKind::Cp,
            Self::Kur(_) => BodyKind::Kur,
            Self::Kup(_) => BodyKind::Kup,
            Self::Rr(_) => BodyKind::Rr,
            Self::Rp(_) => BodyKind::Rp,
            Self::CertConf(_) => BodyKind::CertConf,
            Self::PkiConf => BodyKind::PkiConf,
            Self::Genm(_) => BodyKind::Genm,
            Self::Genp(_) => BodyKind::Genp,
            Self::Error(_) => BodyKind::Error,
        }
    }

    /// Check that this body may open an operation.
    ///
    /// An `ir` carries exactly one certificate request.
    pub fn check_request(&self) -> Result<OperationKind> {
        let kind = self.kind();
        let operation =
            OperationKind::from_request(kind).ok_or(ProtocolError::NotARequest { kind })?;
        if let Self::Ir(requests) = self
            && requests.len() != 1
        {
            return Err(ProtocolError::MultipleInitializationRequests { count: requests.len() });
        }
        if let Self::Rr(details) = self
            && details.is_empty()
        {
            return Err(ProtocolError::EmptyCertRequests);
        }
        Ok(operation)
    }

    /// Every status carried by a response body, in order.
    pub fn status_infos(&self) -> Vec<&PkiStatusInfo> {
        match self {
            Self::Ip(rep) | Self::Cp(rep) | Self::Kup(rep) => {
                rep.responses.iter().map(|r| &r.status).collect()
            },
            Self::Rp(rep) => rep.status.iter().collect(),
            Self::Error(err) => vec![&err.status_info],
            _ => Vec::new(),
        }
    }

    /// Status summarizing the response: the first rejection if any, else the
    /// first status.
    pub fn overall_status(&self) -> Option<&PkiStatusInfo> {
        let infos = self.status_infos();
        infos
            .iter()
            .find(|info| info.status == PkiStatus::Rejection)
            .or_else(|| infos.first())
            .copied()
    }

    /// `certReqId` values carried by a certificate request or response.
    pub fn cert_req_ids(&self) -> Vec<i64> {
        match self {
            Self::Ir(reqs) | Self::Cr(reqs) | Self::Kur(reqs) => reqs.ids(),
            Self::Ip(rep) | Self::Cp(rep) | Self::Kup(rep) => {
                rep.responses.iter().map(|r| r.cert_req_id).collect()
            },
            _ => Vec::new(),
        }
    }

    /// Certificate responses, for ip/cp/kup.
    pub fn cert_responses(&self) -> Option<&[CertResponse]> {
        match self {
            Self::Ip(rep) | Self::Cp(rep) | Self::Kup(rep) => Some(&rep.responses),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::FailureInfo;

    fn req(id: i64) -> CertReqMsg {
        CertReqMsg {
            cert_req_id: id,
            template: CertTemplate {
                subject: Some(GeneralName::directory("CN=ee")),
                public_key: Some(vec![1, 2, 3]),
            },
            popo: Some(ProofOfPossession::RaVerified),
        }
    }

    #[test]
    fn empty_request_list_is_rejected() {
        assert_eq!(CertRequests::new(Vec::new()), Err(ProtocolError::EmptyCertRequests));
    }

    #[test]
    fn ir_carries_exactly_one_request() {
        let Ok(two) = CertRequests::new(vec![req(0), req(1)]) else {
            unreachable!("two entries is a valid list");
        };
        assert_eq!(
            PkiBody::Ir(two.clone()).check_request(),
            Err(ProtocolError::MultipleInitializationRequests { count: 2 })
        );
        assert_eq!(PkiBody::Cr(two).check_request(), Ok(OperationKind::Certification));
        assert_eq!(
            PkiBody::Ir(CertRequests::single(req(0))).check_request(),
            Ok(OperationKind::Enrollment)
        );
    }

    #[test]
    fn responses_cannot_open_operations() {
        assert_eq!(
            PkiBody::PkiConf.check_request(),
            Err(ProtocolError::NotARequest { kind: BodyKind::PkiConf })
        );
    }

    #[test]
    fn overall_status_prefers_rejection() {
        let rep = CertRepMessage {
            ca_pubs: Vec::new(),
            responses: vec![
                CertResponse {
                    cert_req_id: 0,
                    status: PkiStatusInfo::accepted(),
                    certified_key_pair: None,
                },
                CertResponse {
                    cert_req_id: 1,
                    status: PkiStatusInfo::rejection(FailureInfo::BAD_POP),
                    certified_key_pair: None,
                },
            ],
        };
        let body = PkiBody::Cp(rep);
        assert_eq!(body.overall_status().map(|s| s.status), Some(PkiStatus::Rejection));
        assert_eq!(body.cert_req_ids(), vec![0, 1]);
    }

    #[test]
    fn cert_status_without_info_is_acceptance() {
        let content = CertConfirmContent(vec![
            CertStatus::accept(vec![0xaa], 0),
            CertStatus::reject(vec![0xbb], 1, PkiStatusInfo::rejection(FailureInfo::BAD_CERT_ID)),
        ]);
        assert!(content.0[0].is_acceptance());
        assert!(!content.accepts_all());
    }

    #[test]
    fn every_request_kind_has_a_response_kind() {
        for op in [
            OperationKind::Enrollment,
            OperationKind::Certification,
            OperationKind::KeyUpdate,
            OperationKind::Revocation,
            OperationKind::GeneralMessage,
        ] {
            let kind = op.request_kind();
            assert!(kind.is_request());
            assert_eq!(OperationKind::from_request(kind), Some(op));
        }
    }
}
