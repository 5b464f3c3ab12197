//! Mock PKI management entity.
//!
//! [`MockResponder`] plays the CA side of every operation the engine
//! drives. Out of the box it is conforming: it tracks its own live
//! transactions, answers a reused identifier with `transactionIdInUse`,
//! grants implicit confirmation when asked, issues well-formed
//! certificates and answers `certConf` with `pkiConf`. A pending
//! confirmation that is not sent in time is treated like a rejection and
//! the transaction is released.
//!
//! [`Fault`]s turn it into a misbehaving peer so each defect the
//! validator knows about can be provoked on purpose.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use bytes::Bytes;
use cmpcheck_core::{CryptoAdapter, EncodingAdapter, Environment, ProtectionCheck, deadline_after};
use cmpcheck_proto::{
    BodyKind, CertConfirmContent, CertRepMessage, CertRequests, CertResponse, CertifiedKeyPair,
    ErrorMsgContent, FailureInfo, GeneralInfo, GeneralName, InfoValue, ObjectIdentifier,
    PkiBody, PkiHeader, PkiMessage, PkiStatusInfo, ProofOfPossession, ProtectionAlg,
    RevRepContent, TransactionId,
};

use crate::{
    codec::{CborCodec, der_sequence},
    crypto::{MacCredential, SimCrypto, TrustedKeys},
    env::SimEnv,
    fixtures,
};

/// Responder shared between a transport and the scenario that inspects it.
pub type SharedResponder = Arc<Mutex<MockResponder>>;

/// Deliberate protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Address responses to someone other than the requester
    WrongRecipient,
    /// Answer under a different transaction identifier
    WrongTransactionId,
    /// Echo a nonce the requester never sent
    WrongRecipNonce,
    /// Omit `recipNonce`
    MissingRecipNonce,
    /// Reuse the requester's nonce as the response's `senderNonce`
    ReplayedNonce,
    /// Grant implicit confirmation even when it was not requested
    UnsolicitedImplicitConfirm,
    /// Reject certificate requests with the given failure info
    Reject(FailureInfo),
    /// Reject certificate requests but still include a certificate
    RejectWithCertificate(FailureInfo),
    /// Accept certificate requests without including a certificate
    MissingCertificate,
    /// Issue certificates that are not valid DER
    MalformedCertificate,
    /// Answer with a `genp` whatever the request
    WrongBodyType,
    /// Answer `certConf` with an error instead of `pkiConf`
    ErrorInsteadOfPkiConf,
    /// Report this failure info instead of the correct one in every rejection
    WrongFailureInfo(FailureInfo),
    /// Flip a byte of the protection value
    CorruptProtection,
    /// Send responses without protection
    Unprotected,
    /// Never answer
    Silent,
    /// Let this much virtual time pass before answering
    Delay(Duration),
}

/// Responder configuration.
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    /// Name placed in `sender`
    pub name: GeneralName,
    /// Grant implicit confirmation when requested
    pub grant_implicit_confirm: bool,
    /// How long an issued certificate waits for `certConf`
    pub confirm_wait: Duration,
    /// `confirmWaitTime` announced in positive responses, in seconds
    pub announce_confirm_wait: Option<u64>,
    /// Injected faults
    pub faults: Vec<Fault>,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            name: fixtures::ca_name(),
            grant_implicit_confirm: true,
            confirm_wait: Duration::from_secs(60),
            announce_confirm_wait: None,
            faults: Vec::new(),
        }
    }
}

impl ResponderConfig {
    /// Refuse every implicit confirmation request.
    #[must_use]
    pub fn without_implicit_confirm(mut self) -> Self {
        self.grant_implicit_confirm = false;
        self
    }

    /// Set how long issued certificates wait for `certConf`.
    #[must_use]
    pub fn with_confirm_wait(mut self, wait: Duration) -> Self {
        self.confirm_wait = wait;
        self
    }

    /// Announce `confirmWaitTime` in positive responses.
    #[must_use]
    pub fn announcing_confirm_wait(mut self, secs: u64) -> Self {
        self.announce_confirm_wait = Some(secs);
        self
    }

    /// Add a fault.
    #[must_use]
    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }
}

/// Certificates issued under one transaction, waiting for `certConf`.
#[derive(Debug, Clone)]
struct PendingConfirmation {
    certificates: Vec<(i64, Vec<u8>)>,
    deadline: Instant,
}

/// Simulated CA.
#[derive(Debug)]
pub struct MockResponder {
    config: ResponderConfig,
    env: SimEnv,
    codec: CborCodec,
    crypto: SimCrypto,
    credential: MacCredential,
    trust: TrustedKeys,
    pending: HashMap<TransactionId, PendingConfirmation>,
    released: Vec<TransactionId>,
    received: Vec<BodyKind>,
    next_serial: u64,
}

impl MockResponder {
    /// Responder trusting the fixture end entity.
    pub fn new(config: ResponderConfig, env: SimEnv) -> Self {
        Self {
            config,
            env,
            codec: CborCodec,
            crypto: SimCrypto,
            credential: fixtures::ca_credential(),
            trust: TrustedKeys::new().with(&fixtures::end_entity_credential()),
            pending: HashMap::new(),
            released: Vec::new(),
            received: Vec::new(),
            next_serial: 1,
        }
    }

    /// Wrap for sharing with a transport.
    pub fn shared(self) -> SharedResponder {
        Arc::new(Mutex::new(self))
    }

    /// Answer encoded request bytes.
    ///
    /// Returns `None` when the responder stays silent, either because of
    /// [`Fault::Silent`] or because the request does not decode.
    pub fn handle(&mut self, request: &[u8]) -> Option<Bytes> {
        let message = match self.codec.decode(request) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(%err, "responder dropped undecodable request");
                return None;
            },
        };
        let check = self.crypto.verify(&message, &self.trust);
        let response = self.answer(&message, check)?;
        match self.codec.encode(&response) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                tracing::warn!(%err, "responder could not encode response");
                None
            },
        }
    }

    /// Answer a decoded request whose protection was checked as `check`.
    pub fn answer(&mut self, request: &PkiMessage, check: ProtectionCheck) -> Option<PkiMessage> {
        self.received.push(request.kind());
        self.expire_pending(self.env.now());

        if self.has(Fault::Silent) {
            tracing::debug!(tid = %request.header.transaction_id, "responder stays silent");
            return None;
        }
        if let Some(delay) = self.delay() {
            self.env.advance(delay);
        }

        let body = match check {
            ProtectionCheck::Valid => self.respond(request),
            ProtectionCheck::Absent | ProtectionCheck::BadMessageCheck => {
                self.error(FailureInfo::BAD_MESSAGE_CHECK, "request protection invalid")
            },
            ProtectionCheck::SignerNotTrusted => {
                self.error(FailureInfo::SIGNER_NOT_TRUSTED, "request signer unknown")
            },
        };
        let body = if self.has(Fault::WrongBodyType) && !matches!(body, PkiBody::Error(_)) {
            PkiBody::Genp(GeneralInfo::new())
        } else {
            body
        };

        let mut header = self.response_header(request, &body);
        let answers_certconf = request.kind() == BodyKind::CertConf;
        if !answers_certconf {
            self.apply_header_faults(request, &mut header);
        }
        let mut response = PkiMessage::new(header, body);
        self.protect(&mut response);
        tracing::debug!(
            tid = %request.header.transaction_id,
            request = %request.kind(),
            response = %response.kind(),
            "responder answered"
        );
        Some(response)
    }

    /// Release every pending confirmation whose deadline has passed.
    ///
    /// A missed `certConf` is handled like a rejection: the issued
    /// certificates are discarded and the identifier becomes free.
    pub fn expire_pending(&mut self, now: Instant) -> Vec<TransactionId> {
        let expired: Vec<TransactionId> = self
            .pending
            .iter()
            .filter(|(_, pending)| now >= pending.deadline)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.pending.remove(id);
            tracing::debug!(tid = %id, "responder released unconfirmed transaction");
        }
        self.released.extend(expired.iter().copied());
        expired
    }

    /// Transactions waiting for `certConf`.
    pub fn pending_transactions(&self) -> Vec<TransactionId> {
        let mut ids: Vec<TransactionId> = self.pending.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Transactions released because no `certConf` arrived in time.
    pub fn released_transactions(&self) -> &[TransactionId] {
        &self.released
    }

    /// Number of requests of `kind` received.
    pub fn received(&self, kind: BodyKind) -> usize {
        self.received.iter().filter(|k| **k == kind).count()
    }

    fn has(&self, fault: Fault) -> bool {
        self.config.faults.contains(&fault)
    }

    fn delay(&self) -> Option<Duration> {
        self.config.faults.iter().find_map(|fault| match fault {
            Fault::Delay(delay) => Some(*delay),
            _ => None,
        })
    }

    fn respond(&mut self, request: &PkiMessage) -> PkiBody {
        let id = request.header.transaction_id;
        match &request.body {
            PkiBody::Ir(reqs) | PkiBody::Cr(reqs) | PkiBody::Kur(reqs) => {
                if self.pending.contains_key(&id) {
                    return self.error(FailureInfo::TRANSACTION_ID_IN_USE, "transaction live");
                }
                let rep = self.issue(request, reqs);
                match request.kind() {
                    BodyKind::Ir => PkiBody::Ip(rep),
                    BodyKind::Kur => PkiBody::Kup(rep),
                    _ => PkiBody::Cp(rep),
                }
            },
            PkiBody::CertConf(content) => self.confirm(id, content),
            PkiBody::Rr(details) => {
                let status = if let Some(info) = self.forced_rejection() {
                    PkiStatusInfo::rejection(self.reported(info))
                } else {
                    PkiStatusInfo::accepted()
                };
                PkiBody::Rp(RevRepContent { status: vec![status; details.len()] })
            },
            PkiBody::Genm(_) => PkiBody::Genp(GeneralInfo::new()),
            other => {
                tracing::warn!(kind = %other.kind(), "responder got a non-request");
                self.error(FailureInfo::BAD_REQUEST, "not a request")
            },
        }
    }

    fn issue(&mut self, request: &PkiMessage, reqs: &CertRequests) -> CertRepMessage {
        let bad_pop = reqs.as_slice().iter().any(|req| {
            matches!(&req.popo, Some(ProofOfPossession::Signature { signature, .. }) if signature.is_empty())
        });
        let rejection = if bad_pop { Some(FailureInfo::BAD_POP) } else { self.forced_rejection() };

        let mut issued = Vec::new();
        let responses = reqs
            .as_slice()
            .iter()
            .map(|req| {
                let status = match rejection {
                    Some(info) => PkiStatusInfo::rejection(self.reported(info)),
                    None => PkiStatusInfo::accepted(),
                };
                let with_certificate = match rejection {
                    Some(_) => self.carries_certificate_on_rejection(),
                    None => !self.has(Fault::MissingCertificate),
                };
                let certified_key_pair = with_certificate.then(|| {
                    let certificate = self.certificate(req.template.public_key.as_deref());
                    issued.push((req.cert_req_id, certificate.clone()));
                    CertifiedKeyPair { certificate, private_key: None }
                });
                CertResponse { cert_req_id: req.cert_req_id, status, certified_key_pair }
            })
            .collect();

        if rejection.is_none() && !self.grants_implicit_confirm(request) {
            let deadline = deadline_after(self.env.now(), self.config.confirm_wait);
            self.pending.insert(
                request.header.transaction_id,
                PendingConfirmation { certificates: issued, deadline },
            );
        }
        CertRepMessage { ca_pubs: Vec::new(), responses }
    }

    fn confirm(&mut self, id: TransactionId, content: &CertConfirmContent) -> PkiBody {
        let Some(pending) = self.pending.remove(&id) else {
            return self.error(FailureInfo::BAD_REQUEST, "no certificate awaits confirmation");
        };
        let hashes_match = content.0.iter().all(|status| {
            pending.certificates.iter().any(|(cert_req_id, certificate)| {
                *cert_req_id == status.cert_req_id
                    && self.crypto.cert_hash(certificate) == status.cert_hash
            })
        });
        if !hashes_match {
            return self.error(FailureInfo::BAD_CERT_ID, "certificate hash mismatch");
        }
        if self.has(Fault::ErrorInsteadOfPkiConf) {
            return self.error(FailureInfo::SYSTEM_FAILURE, "confirmation not processed");
        }
        PkiBody::PkiConf
    }

    fn grants_implicit_confirm(&self, request: &PkiMessage) -> bool {
        (request.implicit_confirm() && self.config.grant_implicit_confirm)
            || self.has(Fault::UnsolicitedImplicitConfirm)
    }

    fn forced_rejection(&self) -> Option<FailureInfo> {
        self.config.faults.iter().find_map(|fault| match fault {
            Fault::Reject(info) | Fault::RejectWithCertificate(info) => Some(*info),
            _ => None,
        })
    }

    fn carries_certificate_on_rejection(&self) -> bool {
        self.config.faults.iter().any(|fault| matches!(fault, Fault::RejectWithCertificate(_)))
    }

    /// Failure info actually reported for a rejection caused by `info`.
    fn reported(&self, info: FailureInfo) -> FailureInfo {
        self.config
            .faults
            .iter()
            .find_map(|fault| match fault {
                Fault::WrongFailureInfo(wrong) => Some(*wrong),
                _ => None,
            })
            .unwrap_or(info)
    }

    fn error(&self, info: FailureInfo, reason: &str) -> PkiBody {
        PkiBody::Error(ErrorMsgContent {
            status_info: PkiStatusInfo::rejection(self.reported(info)).with_text(reason),
            error_code: None,
            error_details: Vec::new(),
        })
    }

    fn certificate(&mut self, public_key: Option<&[u8]>) -> Vec<u8> {
        let serial = self.next_serial;
        self.next_serial += 1;

        let mut content = vec![0x02, 0x08];
        content.extend_from_slice(&serial.to_be_bytes());
        let key = public_key.unwrap_or_default();
        content.push(0x04);
        content.push(key.len().min(0x7f) as u8);
        content.extend_from_slice(&key[..key.len().min(0x7f)]);

        let mut certificate = der_sequence(&content);
        if self.has(Fault::MalformedCertificate) {
            certificate.pop();
        }
        certificate
    }

    fn response_header(&self, request: &PkiMessage, body: &PkiBody) -> PkiHeader {
        let mut header = PkiHeader::new(
            self.config.name.clone(),
            request.header.sender.clone(),
            request.header.transaction_id,
            self.env.fresh_nonce(),
        )
        .with_pvno(request.header.pvno)
        .with_message_time(self.env.wall_clock())
        .with_recip_nonce(request.header.sender_nonce.clone())
        .with_protection(ProtectionAlg::PasswordBasedMac, self.credential.kid().to_vec());
        header.recip_kid.clone_from(&request.header.sender_kid);

        let positive = body.overall_status().is_some_and(|info| info.status.grants());
        if positive && body.cert_responses().is_some() {
            let implicit = self.grants_implicit_confirm(request);
            header.general_info.set_implicit_confirm(implicit);
            if let Some(secs) = self.config.announce_confirm_wait.filter(|_| !implicit) {
                header.general_info.insert(
                    ObjectIdentifier::new(ObjectIdentifier::CONFIRM_WAIT_TIME),
                    InfoValue::Integer(secs as i64),
                );
            }
        }
        header
    }

    fn apply_header_faults(&self, request: &PkiMessage, header: &mut PkiHeader) {
        for fault in &self.config.faults {
            match fault {
                Fault::WrongRecipient => {
                    header.recipient = GeneralName::directory("CN=Somebody Else");
                },
                Fault::WrongTransactionId => {
                    let mut bytes = *header.transaction_id.as_bytes();
                    bytes[0] ^= 0xff;
                    header.transaction_id = TransactionId::new(bytes);
                },
                Fault::WrongRecipNonce => header.recip_nonce = Some(self.env.fresh_nonce()),
                Fault::MissingRecipNonce => header.recip_nonce = None,
                Fault::ReplayedNonce => {
                    header.sender_nonce = request.header.sender_nonce.clone();
                },
                _ => {},
            }
        }
    }

    fn protect(&self, response: &mut PkiMessage) {
        if self.has(Fault::Unprotected) {
            response.header.protection_alg = None;
            response.header.sender_kid = None;
            return;
        }
        match self.crypto.protect(response, &self.credential) {
            Ok(mut protection) => {
                if self.has(Fault::CorruptProtection)
                    && let Some(byte) = protection.0.first_mut()
                {
                    *byte ^= 0x01;
                }
                response.protection = Some(protection);
            },
            Err(err) => tracing::warn!(%err, "responder could not protect response"),
        }
    }
}
