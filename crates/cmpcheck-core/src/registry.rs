//! Transaction registry.
//!
//! Owns the set of live transactions keyed by transaction identifier. The
//! registry is an explicit handle, not global state: every test run builds
//! its own, and clones share the same underlying set so concurrent
//! operations synchronize through it.
//!
//! Invariant: no two operations occupy the registry under the same
//! identifier at the same time. `begin` checks and inserts under one lock,
//! so concurrent `begin` calls for one identifier resolve to exactly one
//! success.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use cmpcheck_proto::{Nonce, OperationKind, TransactionId};
use serde::{Deserialize, Serialize};

use crate::{error::RegistryError, machine::MachineState};

/// How an operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// Still running.
    Pending,
    /// Accepted without a confirmation round-trip.
    AcceptedImplicit,
    /// Accepted after the peer acknowledged the confirmation, or on the
    /// first response for operations without confirmation.
    AcceptedExplicit,
    /// Peer refused the request, or the initiator refused the certificate.
    Rejected,
    /// Peer misbehaved, or the exchange failed.
    Errored,
    /// No confirmation arrived before the deadline.
    TimedOut,
}

impl Outcome {
    /// True for every outcome except [`Outcome::Pending`].
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// True for both acceptance outcomes.
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::AcceptedImplicit | Self::AcceptedExplicit)
    }

    /// True if the operation closed leaving no usable issued certificate.
    ///
    /// A missed confirmation closes exactly like a rejection.
    pub const fn closes_without_issuance(self) -> bool {
        matches!(self, Self::Rejected | Self::TimedOut)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::AcceptedImplicit => "accepted (implicit)",
            Self::AcceptedExplicit => "accepted (explicit)",
            Self::Rejected => "rejected",
            Self::Errored => "errored",
            Self::TimedOut => "timed out",
        };
        f.write_str(name)
    }
}

/// Record of one live transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Transaction identifier
    pub id: TransactionId,
    /// Operation the transaction performs
    pub operation: OperationKind,
    /// Current state of the owning state machine
    pub state: MachineState,
    /// Most recent sender nonce the engine issued
    pub last_nonce: Option<Nonce>,
    /// Every nonce issued or observed in this transaction
    pub seen_nonces: Vec<Nonce>,
    /// Deadline for a pending certificate confirmation
    pub confirmation_deadline: Option<Instant>,
    /// Outcome, `Pending` while live
    pub outcome: Outcome,
}

impl Transaction {
    fn new(id: TransactionId, operation: OperationKind) -> Self {
        Self {
            id,
            operation,
            state: MachineState::Idle,
            last_nonce: None,
            seen_nonces: Vec::new(),
            confirmation_deadline: None,
            outcome: Outcome::Pending,
        }
    }
}

/// Result of [`TransactionRegistry::end`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndStatus {
    /// The transaction was live and is now ended.
    Ended,
    /// The transaction had already ended; nothing changed.
    AlreadyEnded,
}

/// Ended outcomes kept for lookup; the oldest are forgotten first.
pub const ENDED_RETENTION: usize = 1024;

#[derive(Debug, Default)]
struct RegistryState {
    live: HashMap<TransactionId, Transaction>,
    ended: HashMap<TransactionId, Outcome>,
    ended_order: VecDeque<TransactionId>,
}

impl RegistryState {
    fn retire(&mut self, id: TransactionId, outcome: Outcome) {
        self.ended.insert(id, outcome);
        self.ended_order.push_back(id);
        while self.ended_order.len() > ENDED_RETENTION {
            if let Some(oldest) = self.ended_order.pop_front() {
                self.ended.remove(&oldest);
            }
        }
    }

    fn forget(&mut self, id: &TransactionId) {
        if self.ended.remove(id).is_some() {
            self.ended_order.retain(|ended| ended != id);
        }
    }
}

/// Shared handle to the set of live transactions.
#[derive(Debug, Clone, Default)]
pub struct TransactionRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

impl TransactionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // State stays consistent across a panicking holder: every mutation
        // is a single map operation.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind a new live transaction.
    ///
    /// # Errors
    ///
    /// `DuplicateTransaction` if the identifier is already live.
    pub fn begin(
        &self,
        id: TransactionId,
        operation: OperationKind,
    ) -> Result<Transaction, RegistryError> {
        let mut state = self.lock();
        if state.live.contains_key(&id) {
            tracing::debug!(tid = %id, "begin refused, transaction live");
            return Err(RegistryError::DuplicateTransaction(id));
        }
        state.forget(&id);
        let transaction = Transaction::new(id, operation);
        state.live.insert(id, transaction.clone());
        tracing::debug!(tid = %id, %operation, "transaction begun");
        Ok(transaction)
    }

    fn with_live<T>(
        &self,
        id: &TransactionId,
        f: impl FnOnce(&mut Transaction) -> T,
    ) -> Result<T, RegistryError> {
        let mut state = self.lock();
        state.live.get_mut(id).map(f).ok_or(RegistryError::UnknownTransaction(*id))
    }

    /// Store the most recent sender nonce issued for a transaction.
    pub fn record_nonce(&self, id: &TransactionId, nonce: Nonce) -> Result<(), RegistryError> {
        self.with_live(id, |tx| {
            tx.seen_nonces.push(nonce.clone());
            tx.last_nonce = Some(nonce);
        })
    }

    /// Remember a nonce the peer sent, for replay detection.
    pub fn observe_peer_nonce(&self, id: &TransactionId, nonce: Nonce) -> Result<(), RegistryError> {
        self.with_live(id, |tx| tx.seen_nonces.push(nonce))
    }

    /// Every nonce issued or observed in a live transaction.
    pub fn seen_nonces(&self, id: &TransactionId) -> Vec<Nonce> {
        self.with_live(id, |tx| tx.seen_nonces.clone()).unwrap_or_default()
    }

    /// Most recent sender nonce issued for a live transaction.
    pub fn last_nonce(&self, id: &TransactionId) -> Option<Nonce> {
        self.with_live(id, |tx| tx.last_nonce.clone()).ok().flatten()
    }

    /// Mirror the owning state machine's state.
    pub fn set_state(&self, id: &TransactionId, machine_state: MachineState) -> Result<(), RegistryError> {
        self.with_live(id, |tx| tx.state = machine_state)
    }

    /// Arm the confirmation deadline for a live transaction.
    pub fn arm_confirmation_deadline(
        &self,
        id: &TransactionId,
        deadline: Instant,
    ) -> Result<(), RegistryError> {
        self.with_live(id, |tx| tx.confirmation_deadline = Some(deadline))
    }

    /// True if a live transaction has an armed deadline at or before `now`.
    pub fn deadline_expired(&self, id: &TransactionId, now: Instant) -> bool {
        self.with_live(id, |tx| tx.confirmation_deadline.is_some_and(|deadline| now >= deadline))
            .unwrap_or(false)
    }

    /// Remove a transaction from the live set and record its outcome.
    ///
    /// Ending an already-ended transaction changes nothing and is reported
    /// as [`EndStatus::AlreadyEnded`] with a warning. Only the last
    /// [`ENDED_RETENTION`] outcomes are remembered.
    ///
    /// # Errors
    ///
    /// `UnknownTransaction` if the identifier was never begun.
    pub fn end(&self, id: &TransactionId, outcome: Outcome) -> Result<EndStatus, RegistryError> {
        let mut state = self.lock();
        if state.live.remove(id).is_some() {
            state.retire(*id, outcome);
            tracing::debug!(tid = %id, %outcome, "transaction ended");
            return Ok(EndStatus::Ended);
        }
        if let Some(recorded) = state.ended.get(id) {
            tracing::warn!(tid = %id, %recorded, requested = %outcome, "transaction already ended");
            return Ok(EndStatus::AlreadyEnded);
        }
        Err(RegistryError::UnknownTransaction(*id))
    }

    /// True if the identifier is bound to a live transaction.
    pub fn is_live(&self, id: &TransactionId) -> bool {
        self.lock().live.contains_key(id)
    }

    /// Number of live transactions.
    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// Outcome of a live or ended transaction.
    pub fn outcome(&self, id: &TransactionId) -> Option<Outcome> {
        let state = self.lock();
        state.live.get(id).map(|tx| tx.outcome).or_else(|| state.ended.get(id).copied())
    }

    /// Copy of a live transaction record.
    pub fn snapshot(&self, id: &TransactionId) -> Option<Transaction> {
        self.lock().live.get(id).cloned()
    }
}
