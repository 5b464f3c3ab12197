//! Request fixtures for the simulated end entity.

use cmpcheck_core::Environment;
use cmpcheck_proto::{
    BodyKind, CertReqMsg, CertRequests, CertTemplate, CrlReason, GeneralInfo, GeneralName,
    ObjectIdentifier, PkiBody, PkiHeader, PkiMessage, ProofOfPossession, ProtectionAlg,
    RevDetails, TransactionId,
};

use crate::{crypto::MacCredential, env::SimEnv};

/// Key identifier of the simulated end entity.
pub const END_ENTITY_KID: &[u8] = b"end-entity";
/// Shared secret of the simulated end entity.
pub const END_ENTITY_SECRET: &[u8] = b"cmpcheck end entity secret";
/// Key identifier of the mock CA.
pub const CA_KID: &[u8] = b"mock-ca";
/// Shared secret of the mock CA.
pub const CA_SECRET: &[u8] = b"cmpcheck mock ca secret";

/// Directory name of the simulated end entity.
pub fn end_entity_name() -> GeneralName {
    GeneralName::directory("CN=End Entity,O=cmpcheck")
}

/// Directory name of the mock CA.
pub fn ca_name() -> GeneralName {
    GeneralName::directory("CN=Mock CA,O=cmpcheck")
}

/// Credential protecting end entity requests.
pub fn end_entity_credential() -> MacCredential {
    MacCredential::new(END_ENTITY_KID, END_ENTITY_SECRET)
}

/// Credential protecting mock CA responses.
pub fn ca_credential() -> MacCredential {
    MacCredential::new(CA_KID, CA_SECRET)
}

/// What a request looks like beyond its kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestShape {
    /// Ask for implicit confirmation
    pub implicit_confirm: bool,
    /// Carry a signature proof of possession with an empty signature
    pub bad_pop: bool,
}

/// Builds the requests an end entity sends.
#[derive(Debug, Clone)]
pub struct Initiator {
    env: SimEnv,
    name: GeneralName,
    recipient: GeneralName,
    credential: MacCredential,
}

impl Initiator {
    /// End entity addressing the mock CA.
    pub fn new(env: SimEnv) -> Self {
        Self {
            env,
            name: end_entity_name(),
            recipient: ca_name(),
            credential: end_entity_credential(),
        }
    }

    /// Credential protecting this initiator's requests.
    pub fn credential(&self) -> &MacCredential {
        &self.credential
    }

    /// Fresh request of `kind` bound to `transaction_id`.
    ///
    /// Kinds that cannot open an operation get a certificate request body;
    /// the state machine rejects them on submit.
    pub fn request(
        &self,
        kind: BodyKind,
        transaction_id: TransactionId,
        shape: RequestShape,
    ) -> PkiMessage {
        let mut header = PkiHeader::new(
            self.name.clone(),
            self.recipient.clone(),
            transaction_id,
            self.env.fresh_nonce(),
        )
        .with_message_time(self.env.wall_clock())
        .with_protection(ProtectionAlg::PasswordBasedMac, self.credential.kid().to_vec());
        header.general_info.set_implicit_confirm(shape.implicit_confirm);

        let body = match kind {
            BodyKind::Ir => PkiBody::Ir(self.cert_requests(shape)),
            BodyKind::Kur => PkiBody::Kur(self.cert_requests(shape)),
            BodyKind::Rr => PkiBody::Rr(vec![RevDetails {
                serial_number: self.random(8),
                issuer: self.recipient.clone(),
                reason: CrlReason::Superseded,
            }]),
            BodyKind::Genm => PkiBody::Genm(GeneralInfo::new()),
            _ => PkiBody::Cr(self.cert_requests(shape)),
        };
        PkiMessage::new(header, body)
    }

    fn cert_requests(&self, shape: RequestShape) -> CertRequests {
        let signature = if shape.bad_pop { Vec::new() } else { self.random(64) };
        CertRequests::single(CertReqMsg {
            cert_req_id: 0,
            template: CertTemplate {
                subject: Some(self.name.clone()),
                public_key: Some(self.random(32)),
            },
            popo: Some(ProofOfPossession::Signature {
                algorithm: ObjectIdentifier::new("1.3.101.112"),
                signature,
            }),
        })
    }

    fn random(&self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        self.env.random_bytes(&mut bytes);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_open_the_right_operation() {
        let initiator = Initiator::new(SimEnv::with_seed(1));
        let tid = TransactionId::new([7; 16]);

        for (kind, expected) in [
            (BodyKind::Ir, BodyKind::Ir),
            (BodyKind::Cr, BodyKind::Cr),
            (BodyKind::Kur, BodyKind::Kur),
            (BodyKind::Rr, BodyKind::Rr),
            (BodyKind::Genm, BodyKind::Genm),
        ] {
            let request = initiator.request(kind, tid, RequestShape::default());
            assert_eq!(request.kind(), expected);
            assert!(request.body.check_request().is_ok());
            assert_eq!(request.header.transaction_id, tid);
            assert_eq!(request.header.sender_kid.as_deref(), Some(END_ENTITY_KID));
        }
    }

    #[test]
    fn every_request_gets_a_fresh_nonce() {
        let initiator = Initiator::new(SimEnv::with_seed(2));
        let tid = TransactionId::new([7; 16]);
        let shape = RequestShape { implicit_confirm: true, bad_pop: false };

        let a = initiator.request(BodyKind::Ir, tid, shape);
        let b = initiator.request(BodyKind::Ir, tid, shape);
        assert_ne!(a.header.sender_nonce, b.header.sender_nonce);
        assert!(a.implicit_confirm());
    }
}
