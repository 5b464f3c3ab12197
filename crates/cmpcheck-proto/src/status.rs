//! PKI status and failure information (RFC 4210 section 5.2.3, RFC 9480).

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::errors::{ProtocolError, Result};

/// `PKIStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum PkiStatus {
    /// The request was granted as asked.
    Accepted = 0,
    /// The request was granted with modifications.
    GrantedWithMods = 1,
    /// The request was refused.
    Rejection = 2,
    /// The request has not been processed yet; the requester should poll.
    Waiting = 3,
    /// The certificate is about to be revoked.
    RevocationWarning = 4,
    /// The certificate has been revoked.
    RevocationNotification = 5,
    /// Key update already done for the old certificate.
    KeyUpdateWarning = 6,
}

impl PkiStatus {
    /// True for `rejection`.
    pub const fn is_rejection(self) -> bool {
        matches!(self, Self::Rejection)
    }

    /// True for `waiting`.
    pub const fn is_waiting(self) -> bool {
        matches!(self, Self::Waiting)
    }

    /// True if the status grants the request (possibly with a warning).
    pub const fn grants(self) -> bool {
        !matches!(self, Self::Rejection | Self::Waiting)
    }
}

impl TryFrom<u8> for PkiStatus {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Accepted),
            1 => Ok(Self::GrantedWithMods),
            2 => Ok(Self::Rejection),
            3 => Ok(Self::Waiting),
            4 => Ok(Self::RevocationWarning),
            5 => Ok(Self::RevocationNotification),
            6 => Ok(Self::KeyUpdateWarning),
            other => Err(ProtocolError::UnknownStatus(other)),
        }
    }
}

impl fmt::Display for PkiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accepted => "accepted",
            Self::GrantedWithMods => "grantedWithMods",
            Self::Rejection => "rejection",
            Self::Waiting => "waiting",
            Self::RevocationWarning => "revocationWarning",
            Self::RevocationNotification => "revocationNotification",
            Self::KeyUpdateWarning => "keyUpdateWarning",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// `PKIFailureInfo`: a set of failure reasons.
    ///
    /// Bit positions follow the ASN.1 BIT STRING numbering, so bit `n`
    /// here is named bit `n` in RFC 4210/9480.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FailureInfo: u32 {
        /// Unrecognized or unsupported algorithm identifier
        const BAD_ALG = 1 << 0;
        /// Integrity check failed
        const BAD_MESSAGE_CHECK = 1 << 1;
        /// Transaction not permitted or supported
        const BAD_REQUEST = 1 << 2;
        /// `messageTime` not sufficiently close to the system time
        const BAD_TIME = 1 << 3;
        /// No certificate could be found matching the criteria
        const BAD_CERT_ID = 1 << 4;
        /// Data submitted has the wrong format
        const BAD_DATA_FORMAT = 1 << 5;
        /// Authority indicated in the request is different from this one
        const WRONG_AUTHORITY = 1 << 6;
        /// Requested data is incorrect
        const INCORRECT_DATA = 1 << 7;
        /// Timestamp is missing but should be there
        const MISSING_TIME_STAMP = 1 << 8;
        /// Proof-of-possession failed
        const BAD_POP = 1 << 9;
        /// Certificate has already been revoked
        const CERT_REVOKED = 1 << 10;
        /// Certificate has already been confirmed
        const CERT_CONFIRMED = 1 << 11;
        /// Invalid integrity, password-based instead of signature or vice versa
        const WRONG_INTEGRITY = 1 << 12;
        /// Invalid recipient nonce, either missing or wrong value
        const BAD_RECIPIENT_NONCE = 1 << 13;
        /// TSA time source not available
        const TIME_NOT_AVAILABLE = 1 << 14;
        /// Requested TSA policy not supported
        const UNACCEPTED_POLICY = 1 << 15;
        /// Requested extension not supported
        const UNACCEPTED_EXTENSION = 1 << 16;
        /// Additional information requested could not be understood
        const ADD_INFO_NOT_AVAILABLE = 1 << 17;
        /// Invalid sender nonce, either missing or wrong size
        const BAD_SENDER_NONCE = 1 << 18;
        /// Invalid certificate template or missing mandatory information
        const BAD_CERT_TEMPLATE = 1 << 19;
        /// Signer of the message unknown or not trusted
        const SIGNER_NOT_TRUSTED = 1 << 20;
        /// Transaction identifier is already in use
        const TRANSACTION_ID_IN_USE = 1 << 21;
        /// Protocol version not supported
        const UNSUPPORTED_VERSION = 1 << 22;
        /// Sender was not authorized to make the preceding request
        const NOT_AUTHORIZED = 1 << 23;
        /// Request cannot be handled due to system unavailability
        const SYSTEM_UNAVAIL = 1 << 24;
        /// Request cannot be handled due to system failure
        const SYSTEM_FAILURE = 1 << 25;
        /// Certificate cannot be issued because a duplicate exists
        const DUPLICATE_CERT_REQ = 1 << 26;
    }
}

/// RFC spellings indexed by bit position.
const FAILURE_NAMES: [&str; 27] = [
    "badAlg",
    "badMessageCheck",
    "badRequest",
    "badTime",
    "badCertId",
    "badDataFormat",
    "wrongAuthority",
    "incorrectData",
    "missingTimeStamp",
    "badPOP",
    "certRevoked",
    "certConfirmed",
    "wrongIntegrity",
    "badRecipientNonce",
    "timeNotAvailable",
    "unacceptedPolicy",
    "unacceptedExtension",
    "addInfoNotAvailable",
    "badSenderNonce",
    "badCertTemplate",
    "signerNotTrusted",
    "transactionIdInUse",
    "unsupportedVersion",
    "notAuthorized",
    "systemUnavail",
    "systemFailure",
    "duplicateCertReq",
];

impl FailureInfo {
    /// Single-bit set for a named bit position.
    pub fn from_bit(position: u32) -> Option<Self> {
        if (position as usize) < FAILURE_NAMES.len() {
            Some(Self::from_bits_retain(1 << position))
        } else {
            None
        }
    }

    /// Parse an RFC spelling such as `badRecipientNonce`.
    pub fn from_rfc_name(name: &str) -> Result<Self> {
        FAILURE_NAMES
            .iter()
            .position(|candidate| *candidate == name)
            .and_then(|position| u32::try_from(position).ok())
            .and_then(Self::from_bit)
            .ok_or_else(|| ProtocolError::UnknownFailureInfo(name.to_owned()))
    }

    /// RFC spellings of every named bit in the set, in bit order.
    pub fn names(self) -> Vec<&'static str> {
        FAILURE_NAMES
            .iter()
            .enumerate()
            .filter(|(position, _)| self.bits() & (1 << position) != 0)
            .map(|(_, name)| *name)
            .collect()
    }

    /// Bits outside the RFC taxonomy.
    pub fn unknown_bits(self) -> u32 {
        self.bits() & !Self::all().bits()
    }
}

impl fmt::Display for FailureInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.names();
        if names.is_empty() && self.unknown_bits() == 0 {
            return f.write_str("none");
        }
        let mut parts: Vec<String> = names.into_iter().map(str::to_owned).collect();
        if self.unknown_bits() != 0 {
            parts.push(format!("unknown({:#x})", self.unknown_bits()));
        }
        f.write_str(&parts.join("|"))
    }
}

/// `PKIStatusInfo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkiStatusInfo {
    /// `status`
    pub status: PkiStatus,
    /// `failInfo`; empty when absent
    pub fail_info: FailureInfo,
    /// `statusString`
    pub status_string: Vec<String>,
}

impl PkiStatusInfo {
    /// Plain `accepted` with no failure information.
    pub fn accepted() -> Self {
        Self::with_status(PkiStatus::Accepted)
    }

    /// Any status with no failure information.
    pub fn with_status(status: PkiStatus) -> Self {
        Self { status, fail_info: FailureInfo::empty(), status_string: Vec::new() }
    }

    /// `rejection` carrying the given failure information.
    pub fn rejection(fail_info: FailureInfo) -> Self {
        Self { status: PkiStatus::Rejection, fail_info, status_string: Vec::new() }
    }

    /// Attach a human-readable reason.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.status_string.push(text.into());
        self
    }
}

impl fmt::Display for PkiStatusInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if !self.fail_info.is_empty() {
            write!(f, " ({})", self.fail_info)?;
        }
        Ok(())
    }
}
