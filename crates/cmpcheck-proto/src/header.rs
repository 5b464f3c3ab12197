//! PKI message header (RFC 4210 section 5.1.1).

use std::{collections::BTreeMap, fmt, time::SystemTime};

use serde::{Deserialize, Serialize};

use crate::ids::{Nonce, TransactionId};

/// `pvno` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// `cmp2000(2)`, the RFC 4210 baseline.
    Cmp2000,
    /// `cmp2021(3)`, required by RFC 9480 for some features.
    Cmp2021,
    /// Anything else a peer may send.
    Other(u8),
}

impl ProtocolVersion {
    /// Integer carried on the wire.
    pub const fn number(self) -> u8 {
        match self {
            Self::Cmp2000 => 2,
            Self::Cmp2021 => 3,
            Self::Other(n) => n,
        }
    }

    /// Map a wire integer to a version.
    pub const fn from_number(n: u8) -> Self {
        match n {
            2 => Self::Cmp2000,
            3 => Self::Cmp2021,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pvno {}", self.number())
    }
}

/// Dotted-decimal object identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectIdentifier(String);

impl ObjectIdentifier {
    /// `id-it-implicitConfirm`
    pub const IMPLICIT_CONFIRM: &'static str = "1.3.6.1.5.5.7.4.13";
    /// `id-it-confirmWaitTime`
    pub const CONFIRM_WAIT_TIME: &'static str = "1.3.6.1.5.5.7.4.14";
    /// `id-PasswordBasedMac`
    pub const PASSWORD_BASED_MAC: &'static str = "1.2.840.113533.7.66.13";
    /// `id-PBMAC1`
    pub const PBMAC1: &'static str = "1.2.840.113549.1.5.14";
    /// `id-DHBasedMac`
    pub const DH_BASED_MAC: &'static str = "1.2.840.113533.7.66.30";
    /// `id-KemBasedMac`
    pub const KEM_BASED_MAC: &'static str = "1.2.840.113533.7.66.16";

    /// Wrap a dotted-decimal string.
    pub fn new(dotted: impl Into<String>) -> Self {
        Self(dotted.into())
    }

    /// Dotted-decimal form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sender or recipient identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeneralName {
    /// `rfc822Name`
    Rfc822(String),
    /// `directoryName`, rendered as an RFC 4514 string
    Directory(String),
    /// `dNSName`
    Dns(String),
    /// `uniformResourceIdentifier`
    Uri(String),
}

impl GeneralName {
    /// Shorthand for a directory name.
    pub fn directory(dn: impl Into<String>) -> Self {
        Self::Directory(dn.into())
    }
}

impl fmt::Display for GeneralName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rfc822(name) => write!(f, "rfc822:{name}"),
            Self::Directory(name) => write!(f, "dn:{name}"),
            Self::Dns(name) => write!(f, "dns:{name}"),
            Self::Uri(name) => write!(f, "uri:{name}"),
        }
    }
}

/// Family of protection mechanism.
///
/// A response must be protected with the same family as its request; MAC
/// requests get MAC responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtectionKind {
    /// Shared-secret MAC (password-based MAC, PBMAC1)
    Mac,
    /// Signature with a certificate-bound key
    Signature,
    /// MAC keyed from a KEM shared secret
    KemMac,
    /// MAC keyed from a Diffie-Hellman shared secret
    DhMac,
}

impl fmt::Display for ProtectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mac => "MAC",
            Self::Signature => "signature",
            Self::KemMac => "KEM-based MAC",
            Self::DhMac => "DH-based MAC",
        };
        f.write_str(name)
    }
}

/// `protectionAlg`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtectionAlg {
    /// RFC 4210 password-based MAC
    PasswordBasedMac,
    /// RFC 8018 PBMAC1
    Pbmac1,
    /// RFC 9810 KEM-based MAC
    KemBasedMac,
    /// RFC 4210 DH-based MAC
    DhBasedMac,
    /// Any signature algorithm, identified by OID
    Signature(ObjectIdentifier),
}

impl ProtectionAlg {
    /// Family this algorithm belongs to.
    pub const fn kind(&self) -> ProtectionKind {
        match self {
            Self::PasswordBasedMac | Self::Pbmac1 => ProtectionKind::Mac,
            Self::KemBasedMac => ProtectionKind::KemMac,
            Self::DhBasedMac => ProtectionKind::DhMac,
            Self::Signature(_) => ProtectionKind::Signature,
        }
    }

    /// Algorithm identifier.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            Self::PasswordBasedMac => ObjectIdentifier::new(ObjectIdentifier::PASSWORD_BASED_MAC),
            Self::Pbmac1 => ObjectIdentifier::new(ObjectIdentifier::PBMAC1),
            Self::KemBasedMac => ObjectIdentifier::new(ObjectIdentifier::KEM_BASED_MAC),
            Self::DhBasedMac => ObjectIdentifier::new(ObjectIdentifier::DH_BASED_MAC),
            Self::Signature(oid) => oid.clone(),
        }
    }
}

/// Value of an `InfoTypeAndValue` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfoValue {
    /// ASN.1 NULL (used by `implicitConfirm`)
    Null,
    /// Integer value (used by `confirmWaitTime`, in seconds)
    Integer(i64),
    /// Opaque encoded value
    Bytes(Vec<u8>),
    /// UTF-8 text
    Text(String),
}

/// `generalInfo`: ordered OID-to-value mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneralInfo(BTreeMap<ObjectIdentifier, InfoValue>);

impl GeneralInfo {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, oid: ObjectIdentifier, value: InfoValue) {
        self.0.insert(oid, value);
    }

    /// Look up an entry.
    pub fn get(&self, oid: &str) -> Option<&InfoValue> {
        self.0.get(&ObjectIdentifier::new(oid))
    }

    /// Remove an entry, returning its value.
    pub fn remove(&mut self, oid: &str) -> Option<InfoValue> {
        self.0.remove(&ObjectIdentifier::new(oid))
    }

    /// True if the `implicitConfirm` indicator is present.
    pub fn implicit_confirm(&self) -> bool {
        self.get(ObjectIdentifier::IMPLICIT_CONFIRM).is_some()
    }

    /// Set or clear the `implicitConfirm` indicator.
    pub fn set_implicit_confirm(&mut self, present: bool) {
        if present {
            self.insert(ObjectIdentifier::new(ObjectIdentifier::IMPLICIT_CONFIRM), InfoValue::Null);
        } else {
            self.remove(ObjectIdentifier::IMPLICIT_CONFIRM);
        }
    }

    /// `confirmWaitTime` in seconds, if present and well-formed.
    pub fn confirm_wait_secs(&self) -> Option<u64> {
        match self.get(ObjectIdentifier::CONFIRM_WAIT_TIME) {
            Some(InfoValue::Integer(secs)) => u64::try_from(*secs).ok(),
            _ => None,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate entries in OID order.
    pub fn iter(&self) -> impl Iterator<Item = (&ObjectIdentifier, &InfoValue)> {
        self.0.iter()
    }
}

/// PKI message header.
///
/// `transactionID` and `senderNonce` are optional in the ASN.1 module but
/// mandatory for every message the engine sends or grades, so they are
/// plain fields here. An absent nonce on the wire decodes to an empty
/// [`Nonce`] and is reported by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkiHeader {
    /// `pvno`
    pub pvno: ProtocolVersion,
    /// `sender`
    pub sender: GeneralName,
    /// `recipient`
    pub recipient: GeneralName,
    /// `messageTime`
    pub message_time: Option<SystemTime>,
    /// `protectionAlg`; absent means the message is unprotected
    pub protection_alg: Option<ProtectionAlg>,
    /// `senderKID`
    pub sender_kid: Option<Vec<u8>>,
    /// `recipKID`
    pub recip_kid: Option<Vec<u8>>,
    /// `transactionID`
    pub transaction_id: TransactionId,
    /// `senderNonce`
    pub sender_nonce: Nonce,
    /// `recipNonce`
    pub recip_nonce: Option<Nonce>,
    /// `freeText`
    pub free_text: Vec<String>,
    /// `generalInfo`
    pub general_info: GeneralInfo,
}

impl PkiHeader {
    /// Header with the mandatory correlation fields set and everything else
    /// empty.
    pub fn new(
        sender: GeneralName,
        recipient: GeneralName,
        transaction_id: TransactionId,
        sender_nonce: Nonce,
    ) -> Self {
        Self {
            pvno: ProtocolVersion::Cmp2000,
            sender,
            recipient,
            message_time: None,
            protection_alg: None,
            sender_kid: None,
            recip_kid: None,
            transaction_id,
            sender_nonce,
            recip_nonce: None,
            free_text: Vec::new(),
            general_info: GeneralInfo::new(),
        }
    }

    /// Set the protocol version.
    #[must_use]
    pub fn with_pvno(mut self, pvno: ProtocolVersion) -> Self {
        self.pvno = pvno;
        self
    }

    /// Set the protection algorithm and sender key identifier.
    #[must_use]
    pub fn with_protection(mut self, alg: ProtectionAlg, sender_kid: impl Into<Vec<u8>>) -> Self {
        self.protection_alg = Some(alg);
        self.sender_kid = Some(sender_kid.into());
        self
    }

    /// Set the message time.
    #[must_use]
    pub fn with_message_time(mut self, time: SystemTime) -> Self {
        self.message_time = Some(time);
        self
    }

    /// Set the recipient nonce.
    #[must_use]
    pub fn with_recip_nonce(mut self, nonce: Nonce) -> Self {
        self.recip_nonce = Some(nonce);
        self
    }

    /// Request (or grant) implicit confirmation.
    #[must_use]
    pub fn with_implicit_confirm(mut self) -> Self {
        self.general_info.set_implicit_confirm(true);
        self
    }

    /// Protection family, if the message is protected.
    pub fn protection_kind(&self) -> Option<ProtectionKind> {
        self.protection_alg.as_ref().map(ProtectionAlg::kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implicit_confirm_round_trips_through_general_info() {
        let mut info = GeneralInfo::new();
        assert!(!info.implicit_confirm());

        info.set_implicit_confirm(true);
        assert!(info.implicit_confirm());
        assert_eq!(info.len(), 1);

        info.set_implicit_confirm(false);
        assert!(!info.implicit_confirm());
        assert!(info.is_empty());
    }

    #[test]
    fn confirm_wait_time_rejects_negative_values() {
        let mut info = GeneralInfo::new();
        info.insert(
            ObjectIdentifier::new(ObjectIdentifier::CONFIRM_WAIT_TIME),
            InfoValue::Integer(-5),
        );
        assert_eq!(info.confirm_wait_secs(), None);

        info.insert(
            ObjectIdentifier::new(ObjectIdentifier::CONFIRM_WAIT_TIME),
            InfoValue::Integer(45),
        );
        assert_eq!(info.confirm_wait_secs(), Some(45));
    }

    #[test]
    fn mac_algorithms_share_a_kind() {
        assert_eq!(ProtectionAlg::PasswordBasedMac.kind(), ProtectionAlg::Pbmac1.kind());
        assert_ne!(
            ProtectionAlg::Pbmac1.kind(),
            ProtectionAlg::Signature(ObjectIdentifier::new("1.2.840.10045.4.3.2")).kind()
        );
    }

    #[test]
    fn protocol_version_maps_wire_numbers() {
        assert_eq!(ProtocolVersion::from_number(2), ProtocolVersion::Cmp2000);
        assert_eq!(ProtocolVersion::from_number(3), ProtocolVersion::Cmp2021);
        assert_eq!(ProtocolVersion::from_number(1).number(), 1);
    }
}
