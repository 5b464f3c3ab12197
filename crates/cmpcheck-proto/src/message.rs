//! Complete PKI message.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    body::{BodyKind, PkiBody},
    header::PkiHeader,
    ids::TransactionId,
};

/// `PKIProtection` bit string.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtectionValue(pub Vec<u8>);

impl ProtectionValue {
    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ProtectionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProtectionValue({})", hex::encode(&self.0))
    }
}

/// `PKIMessage`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkiMessage {
    /// Header
    pub header: PkiHeader,
    /// Body
    pub body: PkiBody,
    /// Protection over header and body; absent for unprotected messages
    pub protection: Option<ProtectionValue>,
    /// `extraCerts`, encoded certificates
    pub extra_certs: Vec<Vec<u8>>,
}

impl PkiMessage {
    /// Unprotected message.
    pub fn new(header: PkiHeader, body: PkiBody) -> Self {
        Self { header, body, protection: None, extra_certs: Vec::new() }
    }

    /// Body discriminant.
    pub const fn kind(&self) -> BodyKind {
        self.body.kind()
    }

    /// Transaction the message belongs to.
    pub const fn transaction_id(&self) -> &TransactionId {
        &self.header.transaction_id
    }

    /// True if the header grants or requests implicit confirmation.
    pub fn implicit_confirm(&self) -> bool {
        self.header.general_info.implicit_confirm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        body::{CertReqMsg, CertRequests, CertTemplate},
        header::GeneralName,
        ids::Nonce,
    };

    fn ir() -> PkiMessage {
        let header = PkiHeader::new(
            GeneralName::directory("CN=ee"),
            GeneralName::directory("CN=Mock CA"),
            TransactionId::new([7; 16]),
            Nonce::new(vec![1; 16]),
        )
        .with_implicit_confirm();
        let body = PkiBody::Ir(CertRequests::single(CertReqMsg {
            cert_req_id: 0,
            template: CertTemplate { subject: None, public_key: Some(vec![4, 5, 6]) },
            popo: None,
        }));
        PkiMessage::new(header, body)
    }

    #[test]
    fn message_round_trips_through_cbor() {
        let msg = ir();
        let mut buf = Vec::new();
        ciborium::into_writer(&msg, &mut buf).unwrap();
        let decoded: PkiMessage = ciborium::from_reader(buf.as_slice()).unwrap();
        assert_eq!(decoded, msg);
        assert!(decoded.implicit_confirm());
        assert_eq!(decoded.kind(), BodyKind::Ir);
    }

    #[test]
    fn empty_request_list_does_not_decode() {
        let mut msg = ir();
        msg.body = PkiBody::Cr(CertRequests::single(CertReqMsg {
            cert_req_id: 0,
            template: CertTemplate { subject: None, public_key: None },
            popo: None,
        }));
        let mut value = ciborium::Value::serialized(&msg).unwrap();
        // Replace the request list with an empty array.
        if let ciborium::Value::Map(fields) = &mut value {
            for (key, field) in fields.iter_mut() {
                if key.as_text() == Some("body") {
                    *field = ciborium::Value::Map(vec![(
                        ciborium::Value::Text("Cr".into()),
                        ciborium::Value::Array(Vec::new()),
                    )]);
                }
            }
        }
        let result: Result<PkiMessage, _> = value.deserialized();
        assert!(result.is_err());
    }
}
