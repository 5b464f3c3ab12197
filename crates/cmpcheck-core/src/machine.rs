//! Operation state machine.
//!
//! Drives one PKI management operation from the initial request to a
//! terminal verdict.
//!
//! # Architecture: Action-Based State Machine
//!
//! - Methods accept time as a parameter (no stored Environment)
//! - Methods return `Result<Vec<MachineAction>, MachineError>`
//! - The driver executes actions (send, wait, record the verdict)
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ submit ┌──────────────────┐ positive + implicitConfirm ┌─────────────────────┐
//! │ Idle │───────>│ AwaitingResponse │───────────────────────────>│ ImplicitlyConfirmed │──┐
//! └──────┘        └──────────────────┘                            └─────────────────────┘  │
//!                   │            │ positive                                                │
//!                   │            ↓                                                         │
//!                   │   ┌──────────────────────────────┐   ┌──────────────────┐            │
//!                   │   │ AwaitingConfirmationDecision │──>│ AwaitingCertConf │            │
//!                   │   └──────────────────────────────┘   └──────────────────┘            │
//!                   │                                        │ confirm    │ deadline       │
//!                   │                                        ↓            ↓                │
//!                   │                            ┌─────────────────┐  ┌──────────┐         │
//!                   │ rejection / defects        │ AwaitingPkiConf │  │ TimedOut │         │
//!                   ↓                            └─────────────────┘  └──────────┘         │
//!             ┌────────────┐                             │ pkiConf / error                 │
//!             │ Terminated │<────────────────────────────┴─────────────────────────────────┘
//!             └────────────┘
//! ```
//!
//! Rejection is terminal: once a rejection is observed the machine never
//! emits a `certConf` for that transaction. Defects found in any inbound
//! message end the operation as `Errored`; nothing is retried.
//!
//! # Timeouts
//!
//! - **Response timeout**: 30 seconds for each response
//! - **Confirmation wait**: 60 seconds to send `certConf`, shortened by a
//!   `confirmWaitTime` the peer announces
//!
//! No wait is scheduled further out than [`MAX_WAIT`].

use std::{
    fmt,
    time::{Duration, Instant},
};

use cmpcheck_proto::{
    CertConfirmContent, CertStatus, FailureInfo, Nonce, OperationKind, PkiBody, PkiHeader,
    PkiMessage, TransactionId,
};
use serde::{Deserialize, Serialize};

use crate::{
    adapter::Inbound,
    audit::{AuditEntry, AuditTrail, DeadlinePurpose, Verdict},
    error::{ConfigError, DecodeError, MachineError, TransportError},
    registry::{EndStatus, Outcome, TransactionRegistry},
    validator::{
        Defect, Defects, Expectation, ValidationPolicy, validate_identity, validate_response,
    },
};

/// Longest wait the machine arms; longer configured waits are clamped.
pub const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Instant `wait` after `now`, with `wait` clamped to [`MAX_WAIT`].
///
/// Saturates at `now` if the clock cannot represent the sum.
pub fn deadline_after(now: Instant, wait: Duration) -> Instant {
    now.checked_add(wait.min(MAX_WAIT)).unwrap_or(now)
}

/// Actions returned by the operation state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineAction {
    /// Protect, encode and send this message
    Send(PkiMessage),

    /// Wait for the peer's response until the deadline
    AwaitResponse {
        /// Latest acceptable arrival
        deadline: Instant,
    },

    /// Decide whether to confirm the issued certificates before the deadline
    AwaitConfirmation {
        /// Confirmation deadline
        deadline: Instant,
    },

    /// The operation reached a terminal state
    Finished {
        /// Terminal outcome
        outcome: Outcome,
    },
}

/// Operation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineState {
    /// Nothing submitted yet
    Idle,
    /// Request sent, waiting for the peer's response
    AwaitingResponse,
    /// Peer granted implicit confirmation
    ImplicitlyConfirmed,
    /// Positive response without implicit confirmation
    AwaitingConfirmationDecision,
    /// Waiting for the initiator to send `certConf`
    AwaitingCertConf,
    /// `certConf` sent, waiting for `pkiConf`
    AwaitingPkiConf,
    /// Operation over
    Terminated(Outcome),
}

impl MachineState {
    /// True for [`MachineState::Terminated`].
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated(_))
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::AwaitingResponse => f.write_str("AwaitingResponse"),
            Self::ImplicitlyConfirmed => f.write_str("ImplicitlyConfirmed"),
            Self::AwaitingConfirmationDecision => f.write_str("AwaitingConfirmationDecision"),
            Self::AwaitingCertConf => f.write_str("AwaitingCertConf"),
            Self::AwaitingPkiConf => f.write_str("AwaitingPkiConf"),
            Self::Terminated(outcome) => write!(f, "Terminated({outcome})"),
        }
    }
}

/// Machine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Time allowed for each peer response
    pub response_timeout: Duration,
    /// Time allowed for sending `certConf`
    pub confirm_wait: Duration,
    /// Rules applied to every inbound message
    pub policy: ValidationPolicy,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(30),
            confirm_wait: Duration::from_secs(60),
            policy: ValidationPolicy::default(),
        }
    }
}

impl MachineConfig {
    /// Set the response timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the confirmation wait.
    #[must_use]
    pub fn with_confirm_wait(mut self, wait: Duration) -> Self {
        self.confirm_wait = wait;
        self
    }

    /// Set the validation policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Check that every wait fits within [`MAX_WAIT`].
    ///
    /// # Errors
    /// `WaitTooLong` naming the first offending setting
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (setting, value) in
            [("response_timeout", self.response_timeout), ("confirm_wait", self.confirm_wait)]
        {
            if value > MAX_WAIT {
                return Err(ConfigError::WaitTooLong { setting, value, max: MAX_WAIT });
            }
        }
        Ok(())
    }
}

/// State machine for one PKI management operation.
///
/// Holds the transaction only while the operation is live. A machine that
/// is dropped or abandoned before reaching a terminal state ends its
/// transaction as `Errored`, so identifiers never leak.
#[derive(Debug)]
pub struct OperationMachine {
    registry: TransactionRegistry,
    config: MachineConfig,
    state: MachineState,
    operation: Option<OperationKind>,
    transaction_id: Option<TransactionId>,
    /// Header of the initial request
    initiator: Option<PkiHeader>,
    /// Message the next response must answer
    outstanding: Option<PkiMessage>,
    /// Positive certificate response awaiting confirmation
    issued: Option<PkiMessage>,
    confirmation_rejected: bool,
    response_deadline: Option<Instant>,
    confirmation_deadline: Option<Instant>,
    provoked: Option<FailureInfo>,
    defects: Defects,
    audit: AuditTrail,
    verdict: Option<Verdict>,
}

impl OperationMachine {
    /// Create an idle machine bound to a registry.
    pub fn new(registry: TransactionRegistry, config: MachineConfig) -> Self {
        Self {
            registry,
            config,
            state: MachineState::Idle,
            operation: None,
            transaction_id: None,
            initiator: None,
            outstanding: None,
            issued: None,
            confirmation_rejected: false,
            response_deadline: None,
            confirmation_deadline: None,
            provoked: None,
            defects: Defects::new(),
            audit: AuditTrail::new(),
            verdict: None,
        }
    }

    /// Get current state
    #[must_use]
    pub fn state(&self) -> MachineState {
        self.state
    }

    /// Operation being performed, once submitted
    pub fn operation(&self) -> Option<OperationKind> {
        self.operation
    }

    /// Bound transaction identifier, once submitted
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction_id
    }

    /// Defects found so far
    pub fn defects(&self) -> &Defects {
        &self.defects
    }

    /// Exchange record so far
    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Armed confirmation deadline
    pub fn confirmation_deadline(&self) -> Option<Instant> {
        self.confirmation_deadline
    }

    /// Armed response deadline
    pub fn response_deadline(&self) -> Option<Instant> {
        self.response_deadline
    }

    /// Terminal verdict, once reached
    pub fn verdict(&self) -> Option<&Verdict> {
        self.verdict.as_ref()
    }

    /// Consume the machine, returning its verdict.
    ///
    /// A machine that has not terminated is abandoned first.
    pub fn into_verdict(mut self) -> Option<Verdict> {
        self.abandon();
        self.verdict.take()
    }

    /// Declare that the next request deliberately provokes `fail_info`.
    ///
    /// The peer must then reject with a failure info set containing it.
    ///
    /// # Errors
    /// Returns `InvalidState` unless Idle
    pub fn expect_failure(&mut self, fail_info: FailureInfo) -> Result<(), MachineError> {
        self.require(MachineState::Idle, "expect_failure")?;
        self.provoked = Some(fail_info);
        Ok(())
    }

    /// Start the operation with its initial request.
    ///
    /// Binds the request's transaction identifier in the registry. A
    /// duplicate leaves the machine Idle.
    ///
    /// # Errors
    /// - `InvalidState` unless Idle
    /// - `Request` if the body cannot open an operation
    /// - `Registry(DuplicateTransaction)` if the identifier is live
    pub fn submit(
        &mut self,
        request: PkiMessage,
        now: Instant,
    ) -> Result<Vec<MachineAction>, MachineError> {
        self.require(MachineState::Idle, "submit")?;
        let operation = request.body.check_request()?;
        let id = request.header.transaction_id;
        self.registry.begin(id, operation)?;
        self.operation = Some(operation);
        self.transaction_id = Some(id);
        self.initiator = Some(request.header.clone());
        self.registry.record_nonce(&id, request.header.sender_nonce.clone())?;
        tracing::debug!(tid = %id, %operation, kind = %request.kind(), "submitting request");

        Ok(self.send(request, MachineState::AwaitingResponse, now))
    }

    /// Handle a message from the peer.
    ///
    /// While the initiator owes `certConf`, no peer message is expected: one
    /// that breaks the transaction's identity ends the operation `Errored`,
    /// anything else is recorded and ignored.
    ///
    /// # Errors
    /// Returns `InvalidState` when Idle or terminated
    pub fn receive(
        &mut self,
        inbound: Inbound,
        now: Instant,
    ) -> Result<Vec<MachineAction>, MachineError> {
        match self.state {
            MachineState::AwaitingResponse | MachineState::AwaitingPkiConf => {},
            MachineState::AwaitingConfirmationDecision | MachineState::AwaitingCertConf => {
                return Ok(self.receive_unsolicited(&inbound.message, now));
            },
            _ => return Err(self.invalid("receive")),
        }
        let (id, outstanding) = match (self.transaction_id, self.outstanding.take()) {
            (Some(id), Some(outstanding)) => (id, outstanding),
            _ => return Err(self.invalid("receive")),
        };

        let expired = self.tick(now);
        if !expired.is_empty() {
            return Ok(expired);
        }

        let response = &inbound.message;
        self.audit.record(AuditEntry::Received {
            kind: response.kind(),
            header: response.header.clone(),
        });

        let seen = self.registry.seen_nonces(&id);
        let provoked =
            if self.state == MachineState::AwaitingResponse { self.provoked } else { None };
        let expectation = Expectation { request: &outstanding, seen_nonces: &seen, provoked };
        let found = validate_response(&expectation, &inbound, &self.config.policy);
        if !response.header.sender_nonce.is_empty() {
            // Transaction is live; the only failure is a concurrent end.
            let _ = self.registry.observe_peer_nonce(&id, response.header.sender_nonce.clone());
        }

        if !found.is_empty() {
            tracing::warn!(tid = %id, defects = %found, "response has defects");
            self.defects.extend(found);
            return Ok(self.finish(Outcome::Errored));
        }

        match self.state {
            MachineState::AwaitingResponse => Ok(self.handle_response(inbound.message, now)),
            _ => Ok(self.handle_pki_conf(&inbound.message)),
        }
    }

    fn receive_unsolicited(&mut self, message: &PkiMessage, now: Instant) -> Vec<MachineAction> {
        let expired = self.tick(now);
        if !expired.is_empty() {
            return expired;
        }
        self.audit.record(AuditEntry::Received {
            kind: message.kind(),
            header: message.header.clone(),
        });
        let Some(initiator) = &self.initiator else {
            return Vec::new();
        };

        let found = validate_identity(initiator, &message.header);
        if found.is_empty() {
            tracing::warn!(kind = %message.kind(), "ignoring message while certConf is owed");
            return Vec::new();
        }
        let tid = initiator.transaction_id;
        tracing::warn!(%tid, defects = %found, "message breaks transaction identity");
        self.defects.extend(found);
        self.finish(Outcome::Errored)
    }

    fn handle_response(&mut self, response: PkiMessage, now: Instant) -> Vec<MachineAction> {
        if matches!(response.body, PkiBody::Error(_)) {
            return self.finish(Outcome::Rejected);
        }
        let status = response.body.overall_status().map(|info| info.status);
        if status.is_some_and(|status| status.is_rejection()) {
            return self.finish(Outcome::Rejected);
        }
        if status.is_some_and(|status| status.is_waiting()) {
            self.defects.push(Defect::PollingNotSupported);
            return self.finish(Outcome::Errored);
        }

        let needs_confirmation =
            self.operation.is_some_and(OperationKind::requires_confirmation);
        if !needs_confirmation {
            return self.finish(Outcome::AcceptedExplicit);
        }

        if response.implicit_confirm() {
            self.transition(MachineState::ImplicitlyConfirmed);
            return self.finish(Outcome::AcceptedImplicit);
        }

        self.transition(MachineState::AwaitingConfirmationDecision);
        let mut wait = self.config.confirm_wait;
        if let Some(secs) = response.header.general_info.confirm_wait_secs() {
            wait = wait.min(Duration::from_secs(secs));
        }
        let wait = wait.min(MAX_WAIT);
        let deadline = deadline_after(now, wait);
        if let Some(id) = self.transaction_id {
            let _ = self.registry.arm_confirmation_deadline(&id, deadline);
        }
        self.confirmation_deadline = Some(deadline);
        self.response_deadline = None;
        self.issued = Some(response);
        self.audit.record(AuditEntry::DeadlineArmed {
            purpose: DeadlinePurpose::Confirmation,
            after: wait,
        });
        self.transition(MachineState::AwaitingCertConf);

        vec![MachineAction::AwaitConfirmation { deadline }]
    }

    fn handle_pki_conf(&mut self, response: &PkiMessage) -> Vec<MachineAction> {
        match &response.body {
            PkiBody::PkiConf if self.confirmation_rejected => self.finish(Outcome::Rejected),
            PkiBody::PkiConf => self.finish(Outcome::AcceptedExplicit),
            PkiBody::Error(content) => {
                self.defects.push(Defect::PeerError { fail_info: content.status_info.fail_info });
                self.finish(Outcome::Errored)
            },
            other => {
                // Body kind is already graded by the validator.
                tracing::warn!(kind = %other.kind(), "unexpected confirmation answer");
                self.finish(Outcome::Errored)
            },
        }
    }

    /// Certificates issued by the positive response awaiting confirmation,
    /// as `(certReqId, certificate)` pairs.
    pub fn issued_certificates(&self) -> Vec<(i64, &[u8])> {
        self.issued
            .as_ref()
            .and_then(|message| message.body.cert_responses())
            .unwrap_or_default()
            .iter()
            .filter_map(|response| {
                let pair = response.certified_key_pair.as_ref()?;
                Some((response.cert_req_id, pair.certificate.as_slice()))
            })
            .collect()
    }

    /// Send `certConf` for the issued certificates.
    ///
    /// A status carrying a rejection refuses the certificate; the peer must
    /// still answer `pkiConf` and the operation then ends `Rejected`. If the
    /// confirmation deadline has passed, nothing is sent and the operation
    /// ends `TimedOut`.
    ///
    /// # Errors
    /// Returns `InvalidState` unless AwaitingCertConf
    pub fn confirm(
        &mut self,
        statuses: Vec<CertStatus>,
        sender_nonce: Nonce,
        now: Instant,
    ) -> Result<Vec<MachineAction>, MachineError> {
        self.require(MachineState::AwaitingCertConf, "confirm")?;
        let expired = self.tick(now);
        if !expired.is_empty() {
            return Ok(expired);
        }
        let (Some(id), Some(initiator), Some(issued)) =
            (self.transaction_id, self.initiator.as_ref(), self.issued.as_ref())
        else {
            return Err(self.invalid("confirm"));
        };

        let content = CertConfirmContent(statuses);
        let header = certconf_header(initiator, &issued.header, sender_nonce);
        self.confirmation_rejected = !content.accepts_all();
        self.registry.record_nonce(&id, header.sender_nonce.clone())?;
        self.confirmation_deadline = None;

        let certconf = PkiMessage::new(header, PkiBody::CertConf(content));
        Ok(self.send(certconf, MachineState::AwaitingPkiConf, now))
    }

    /// Check deadlines.
    ///
    /// A missed confirmation deadline ends the operation `TimedOut`; a
    /// missed response deadline ends it `Errored`.
    pub fn tick(&mut self, now: Instant) -> Vec<MachineAction> {
        match self.state {
            MachineState::AwaitingCertConf => {
                let expired = self.confirmation_deadline.is_some_and(|deadline| now >= deadline);
                if expired {
                    return self.finish(Outcome::TimedOut);
                }
            },
            MachineState::AwaitingResponse | MachineState::AwaitingPkiConf => {
                let expired = self.response_deadline.is_some_and(|deadline| now >= deadline);
                if expired {
                    self.defects.push(Defect::ResponseTimeout);
                    return self.finish(Outcome::Errored);
                }
            },
            _ => {},
        }
        Vec::new()
    }

    /// The transport failed while a response was awaited.
    ///
    /// # Errors
    /// Returns `InvalidState` unless a response is awaited
    pub fn fail_transport(
        &mut self,
        error: &TransportError,
    ) -> Result<Vec<MachineAction>, MachineError> {
        self.fail(Defect::TransportUnavailable { reason: error.to_string() }, "fail_transport")
    }

    /// The response could not be decoded.
    ///
    /// # Errors
    /// Returns `InvalidState` unless a response is awaited
    pub fn fail_decode(&mut self, error: &DecodeError) -> Result<Vec<MachineAction>, MachineError> {
        self.fail(Defect::MalformedMessage { reason: error.to_string() }, "fail_decode")
    }

    fn fail(
        &mut self,
        defect: Defect,
        operation: &str,
    ) -> Result<Vec<MachineAction>, MachineError> {
        if !matches!(self.state, MachineState::AwaitingResponse | MachineState::AwaitingPkiConf) {
            return Err(self.invalid(operation));
        }
        self.defects.push(defect);
        Ok(self.finish(Outcome::Errored))
    }

    /// Give up on the operation.
    ///
    /// Ends a live transaction as `Errored`. Does nothing when Idle or
    /// already terminated.
    pub fn abandon(&mut self) -> Vec<MachineAction> {
        if self.state.is_terminal() || self.transaction_id.is_none() {
            return Vec::new();
        }
        self.audit.record(AuditEntry::Abandoned);
        self.finish(Outcome::Errored)
    }

    fn send(&mut self, message: PkiMessage, next: MachineState, now: Instant) -> Vec<MachineAction> {
        let after = self.config.response_timeout.min(MAX_WAIT);
        let deadline = deadline_after(now, after);
        self.audit.record(AuditEntry::Sent { kind: message.kind(), header: message.header.clone() });
        self.audit.record(AuditEntry::DeadlineArmed { purpose: DeadlinePurpose::Response, after });
        self.response_deadline = Some(deadline);
        self.outstanding = Some(message.clone());
        self.transition(next);

        vec![MachineAction::Send(message), MachineAction::AwaitResponse { deadline }]
    }

    fn transition(&mut self, to: MachineState) {
        let from = self.state;
        tracing::debug!(%from, %to, "transition");
        self.audit.record(AuditEntry::Transition { from, to });
        self.state = to;
        if let Some(id) = self.transaction_id {
            // Ignored once the transaction has ended.
            let _ = self.registry.set_state(&id, to);
        }
    }

    fn finish(&mut self, outcome: Outcome) -> Vec<MachineAction> {
        let (Some(id), Some(operation)) = (self.transaction_id, self.operation) else {
            return Vec::new();
        };
        self.transition(MachineState::Terminated(outcome));
        self.outstanding = None;
        self.response_deadline = None;
        self.confirmation_deadline = None;
        if outcome.closes_without_issuance() {
            self.issued = None;
        }

        match self.registry.end(&id, outcome) {
            Ok(EndStatus::Ended) => {},
            Ok(EndStatus::AlreadyEnded) => {
                tracing::warn!(tid = %id, "transaction ended outside its machine");
            },
            Err(err) => tracing::warn!(tid = %id, %err, "registry lost transaction"),
        }

        let verdict = Verdict {
            transaction_id: id,
            operation,
            outcome,
            defects: self.defects.clone(),
            audit: self.audit.clone(),
        };
        tracing::info!(tid = %id, %verdict, "operation finished");
        self.verdict = Some(verdict);

        vec![MachineAction::Finished { outcome }]
    }

    fn require(&self, state: MachineState, operation: &str) -> Result<(), MachineError> {
        if self.state == state { Ok(()) } else { Err(self.invalid(operation)) }
    }

    fn invalid(&self, operation: &str) -> MachineError {
        MachineError::InvalidState { state: self.state, operation: operation.to_string() }
    }
}

impl Drop for OperationMachine {
    fn drop(&mut self) {
        self.abandon();
    }
}

/// Header for a `certConf` answering `response` within the transaction
/// opened by `initiator`.
fn certconf_header(initiator: &PkiHeader, response: &PkiHeader, sender_nonce: Nonce) -> PkiHeader {
    let mut header = PkiHeader::new(
        initiator.sender.clone(),
        initiator.recipient.clone(),
        initiator.transaction_id,
        sender_nonce,
    )
    .with_pvno(initiator.pvno)
    .with_recip_nonce(response.sender_nonce.clone());
    header.protection_alg = initiator.protection_alg.clone();
    header.sender_kid = initiator.sender_kid.clone();
    header.recip_kid = response.sender_kid.clone();
    header
}
