//! HMAC-SHA256 crypto adapter.
//!
//! Protection is a MAC over the CBOR encoding of header and body, keyed by
//! a shared secret looked up through the header's sender KID. This models
//! password-based MAC protection closely enough to exercise both failure
//! paths: an unknown KID is a trust failure, a MAC mismatch an integrity
//! failure.

use std::collections::HashMap;

use cmpcheck_core::{CryptoAdapter, CryptoError, ProtectionCheck};
use cmpcheck_proto::{PkiBody, PkiHeader, PkiMessage, ProtectionValue};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Protected part of a message, as `(header, body)`.
#[derive(Serialize)]
struct ProtectedPart<'a> {
    header: &'a PkiHeader,
    body: &'a PkiBody,
}

/// Shared secret identified by a key identifier.
#[derive(Clone)]
pub struct MacCredential {
    kid: Vec<u8>,
    secret: Vec<u8>,
}

impl MacCredential {
    /// Credential for `kid`.
    pub fn new(kid: impl Into<Vec<u8>>, secret: impl Into<Vec<u8>>) -> Self {
        Self { kid: kid.into(), secret: secret.into() }
    }

    /// Key identifier placed in `senderKID`.
    pub fn kid(&self) -> &[u8] {
        &self.kid
    }
}

impl std::fmt::Debug for MacCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacCredential")
            .field("kid", &String::from_utf8_lossy(&self.kid))
            .finish_non_exhaustive()
    }
}

/// Secrets of the peers whose messages are trusted, by KID.
#[derive(Debug, Clone, Default)]
pub struct TrustedKeys(HashMap<Vec<u8>, MacCredential>);

impl TrustedKeys {
    /// No trusted peers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust messages protected with `credential`.
    #[must_use]
    pub fn with(mut self, credential: &MacCredential) -> Self {
        self.0.insert(credential.kid.clone(), credential.clone());
        self
    }

    fn get(&self, kid: &[u8]) -> Option<&MacCredential> {
        self.0.get(kid)
    }
}

/// HMAC-SHA256 implementation of [`CryptoAdapter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SimCrypto;

impl SimCrypto {
    fn mac(message: &PkiMessage, secret: &[u8]) -> Result<HmacSha256, CryptoError> {
        let part = ProtectedPart { header: &message.header, body: &message.body };
        let mut encoded = Vec::new();
        ciborium::into_writer(&part, &mut encoded)
            .map_err(|e| CryptoError::ProtectedPart(e.to_string()))?;
        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| CryptoError::Credential(e.to_string()))?;
        mac.update(&encoded);
        Ok(mac)
    }
}

impl CryptoAdapter for SimCrypto {
    type Credential = MacCredential;
    type TrustAnchor = TrustedKeys;

    fn protect(
        &self,
        message: &PkiMessage,
        credential: &MacCredential,
    ) -> Result<ProtectionValue, CryptoError> {
        if message.header.sender_kid.as_deref() != Some(credential.kid()) {
            return Err(CryptoError::Credential("senderKID does not name the credential".into()));
        }
        let mac = Self::mac(message, &credential.secret)?;
        Ok(ProtectionValue(mac.finalize().into_bytes().to_vec()))
    }

    fn verify(&self, message: &PkiMessage, trust: &TrustedKeys) -> ProtectionCheck {
        let Some(protection) = &message.protection else {
            return ProtectionCheck::Absent;
        };
        let Some(credential) = message.header.sender_kid.as_deref().and_then(|kid| trust.get(kid))
        else {
            return ProtectionCheck::SignerNotTrusted;
        };
        match Self::mac(message, &credential.secret) {
            Ok(mac) => mac
                .verify_slice(protection.as_bytes())
                .map_or(ProtectionCheck::BadMessageCheck, |()| ProtectionCheck::Valid),
            Err(_) => ProtectionCheck::BadMessageCheck,
        }
    }

    fn cert_hash(&self, certificate: &[u8]) -> Vec<u8> {
        Sha256::digest(certificate).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use cmpcheck_proto::{GeneralInfo, GeneralName, Nonce, ProtectionAlg, TransactionId};

    use super::*;

    fn message(kid: &[u8]) -> PkiMessage {
        let header = PkiHeader::new(
            GeneralName::directory("CN=ee"),
            GeneralName::directory("CN=ca"),
            TransactionId::new([1; 16]),
            Nonce::new(vec![2; 16]),
        )
        .with_protection(ProtectionAlg::PasswordBasedMac, kid.to_vec());
        PkiMessage::new(header, PkiBody::Genm(GeneralInfo::new()))
    }

    #[test]
    fn protected_message_verifies() {
        let credential = MacCredential::new(b"ee".to_vec(), b"secret".to_vec());
        let trust = TrustedKeys::new().with(&credential);
        let mut msg = message(b"ee");
        msg.protection = Some(SimCrypto.protect(&msg, &credential).unwrap());

        assert_eq!(SimCrypto.verify(&msg, &trust), ProtectionCheck::Valid);
    }

    #[test]
    fn integrity_and_trust_failures_stay_distinct() {
        let credential = MacCredential::new(b"ee".to_vec(), b"secret".to_vec());
        let mut msg = message(b"ee");
        msg.protection = Some(SimCrypto.protect(&msg, &credential).unwrap());

        assert_eq!(SimCrypto.verify(&msg, &TrustedKeys::new()), ProtectionCheck::SignerNotTrusted);

        let trust = TrustedKeys::new().with(&credential);
        let mut tampered = msg.clone();
        tampered.header.free_text.push("tampered".into());
        assert_eq!(SimCrypto.verify(&tampered, &trust), ProtectionCheck::BadMessageCheck);

        let impostor = MacCredential::new(b"ee".to_vec(), b"other".to_vec());
        assert_eq!(
            SimCrypto.verify(&msg, &TrustedKeys::new().with(&impostor)),
            ProtectionCheck::BadMessageCheck
        );

        msg.protection = None;
        assert_eq!(SimCrypto.verify(&msg, &trust), ProtectionCheck::Absent);
    }

    #[test]
    fn protect_requires_matching_kid() {
        let credential = MacCredential::new(b"ee".to_vec(), b"secret".to_vec());
        let result = SimCrypto.protect(&message(b"someone"), &credential);
        assert!(matches!(result, Err(CryptoError::Credential(_))));
    }

    #[test]
    fn cert_hash_is_sha256() {
        let hash = SimCrypto.cert_hash(b"abc");
        assert_eq!(hash.len(), 32);
        assert_eq!(hash[..4], [0xba, 0x78, 0x16, 0xbf]);
    }
}
