//! Async exchange runner.
//!
//! [`Exchange`] executes the actions of one [`OperationMachine`] against
//! real collaborators: it protects and encodes outbound messages, sends
//! them with a bounded wait, decodes and verifies responses, and makes the
//! confirmation decision the caller chose up front. It never retries.

use std::{collections::VecDeque, time::Instant};

use bytes::Bytes;
use cmpcheck_proto::{CertStatus, FailureInfo, PkiMessage, PkiStatusInfo};
use tracing::Instrument;

use crate::{
    adapter::{CryptoAdapter, EncodingAdapter, Inbound, Transport},
    audit::Verdict,
    env::Environment,
    error::MachineError,
    machine::{MachineAction, OperationMachine},
};

/// What to do once certificates are issued without implicit confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmPolicy {
    /// Accept every issued certificate.
    Accept,
    /// Refuse every issued certificate with the given failure info.
    Reject(FailureInfo),
    /// Send nothing and let the confirmation deadline pass.
    Withhold,
}

/// Collaborators for running operations.
pub struct Exchange<'a, T, E, C, V: CryptoAdapter> {
    /// Delivers requests
    pub transport: &'a T,
    /// Time and randomness
    pub env: &'a E,
    /// Message encoding
    pub codec: &'a C,
    /// Message protection
    pub crypto: &'a V,
    /// Credential protecting outbound messages
    pub credential: &'a V::Credential,
    /// Trust anchor verifying inbound messages
    pub trust: &'a V::TrustAnchor,
}

impl<T, E, C, V> Exchange<'_, T, E, C, V>
where
    T: Transport,
    E: Environment,
    C: EncodingAdapter,
    V: CryptoAdapter,
{
    /// Run one operation to its terminal verdict.
    ///
    /// # Errors
    ///
    /// Errors are the driver's own mistakes: an invalid or duplicate
    /// request, or a message the adapters cannot encode or protect. Peer
    /// misbehaviour is reported in the verdict instead.
    pub async fn run(
        &self,
        machine: &mut OperationMachine,
        request: PkiMessage,
        policy: ConfirmPolicy,
    ) -> Result<Verdict, MachineError> {
        let span = tracing::info_span!(
            "exchange",
            tid = %request.header.transaction_id,
            kind = %request.kind(),
        );
        self.drive(machine, request, policy).instrument(span).await
    }

    async fn drive(
        &self,
        machine: &mut OperationMachine,
        request: PkiMessage,
        policy: ConfirmPolicy,
    ) -> Result<Verdict, MachineError> {
        let mut actions: VecDeque<MachineAction> =
            machine.submit(request, self.env.now())?.into();
        let mut outbound: Option<Bytes> = None;

        while let Some(action) = actions.pop_front() {
            match action {
                MachineAction::Send(message) => match self.seal(message) {
                    Ok(bytes) => outbound = Some(bytes),
                    Err(err) => {
                        machine.abandon();
                        return Err(err);
                    },
                },
                MachineAction::AwaitResponse { deadline } => {
                    let Some(bytes) = outbound.take() else {
                        return Err(MachineError::NoVerdict);
                    };
                    actions.extend(self.round_trip(machine, bytes, deadline).await?);
                },
                MachineAction::AwaitConfirmation { deadline } => {
                    actions.extend(self.decide(machine, policy, deadline).await?);
                },
                MachineAction::Finished { outcome } => {
                    tracing::debug!(%outcome, "exchange finished");
                },
            }
        }

        machine.verdict().cloned().ok_or(MachineError::NoVerdict)
    }

    fn seal(&self, mut message: PkiMessage) -> Result<Bytes, MachineError> {
        message.protection = Some(self.crypto.protect(&message, self.credential)?);
        Ok(self.codec.encode(&message)?)
    }

    async fn round_trip(
        &self,
        machine: &mut OperationMachine,
        request: Bytes,
        deadline: Instant,
    ) -> Result<Vec<MachineAction>, MachineError> {
        let budget = deadline.saturating_duration_since(self.env.now());
        match tokio::time::timeout(budget, self.transport.send(request)).await {
            Err(_) => {
                tracing::warn!(?budget, "no response before deadline");
                Ok(machine.tick(deadline))
            },
            Ok(Err(err)) => {
                tracing::warn!(%err, "transport failed");
                machine.fail_transport(&err)
            },
            Ok(Ok(reply)) => match self.codec.decode(&reply) {
                Err(err) => {
                    tracing::warn!(%err, "response does not decode");
                    machine.fail_decode(&err)
                },
                Ok(message) => {
                    let protection = self.crypto.verify(&message, self.trust);
                    let inbound = Inbound::inspect(message, protection, self.codec);
                    machine.receive(inbound, self.env.now())
                },
            },
        }
    }

    async fn decide(
        &self,
        machine: &mut OperationMachine,
        policy: ConfirmPolicy,
        deadline: Instant,
    ) -> Result<Vec<MachineAction>, MachineError> {
        let status_for = |fail_info: Option<FailureInfo>| {
            machine
                .issued_certificates()
                .into_iter()
                .map(|(cert_req_id, certificate)| {
                    let hash = self.crypto.cert_hash(certificate);
                    match fail_info {
                        None => CertStatus::accept(hash, cert_req_id),
                        Some(info) => {
                            CertStatus::reject(hash, cert_req_id, PkiStatusInfo::rejection(info))
                        },
                    }
                })
                .collect::<Vec<_>>()
        };

        match policy {
            ConfirmPolicy::Accept => {
                let statuses = status_for(None);
                machine.confirm(statuses, self.env.fresh_nonce(), self.env.now())
            },
            ConfirmPolicy::Reject(fail_info) => {
                let statuses = status_for(Some(fail_info));
                machine.confirm(statuses, self.env.fresh_nonce(), self.env.now())
            },
            ConfirmPolicy::Withhold => {
                self.env.sleep(deadline.saturating_duration_since(self.env.now())).await;
                Ok(machine.tick(self.env.now().max(deadline)))
            },
        }
    }
}
