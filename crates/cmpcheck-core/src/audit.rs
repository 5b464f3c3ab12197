//! Audit trail and verdicts.
//!
//! Every operation ends in one [`Verdict`]: the outcome, the defects found
//! and a copy of every header sent and received, enough to reproduce the
//! judgment.

use std::{fmt, time::Duration};

use cmpcheck_proto::{BodyKind, OperationKind, PkiHeader, TransactionId};
use serde::{Deserialize, Serialize};

use crate::{machine::MachineState, registry::Outcome, validator::Defects};

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEntry {
    /// Message handed to the driver for sending.
    Sent {
        /// Body kind
        kind: BodyKind,
        /// Header copy
        header: PkiHeader,
    },
    /// Message received from the peer.
    Received {
        /// Body kind
        kind: BodyKind,
        /// Header copy
        header: PkiHeader,
    },
    /// State transition.
    Transition {
        /// State left
        from: MachineState,
        /// State entered
        to: MachineState,
    },
    /// Deadline armed relative to the current time.
    DeadlineArmed {
        /// What the deadline guards
        purpose: DeadlinePurpose,
        /// Time until expiry
        after: Duration,
    },
    /// Caller abandoned the operation.
    Abandoned,
}

/// What an armed deadline guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeadlinePurpose {
    /// Waiting for the peer's response
    Response,
    /// Waiting for the initiator's confirmation
    Confirmation,
}

/// Ordered record of an operation's exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditTrail(Vec<AuditEntry>);

impl AuditTrail {
    /// Empty trail.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn record(&mut self, entry: AuditEntry) {
        self.0.push(entry);
    }

    /// Entries in order.
    pub fn entries(&self) -> &[AuditEntry] {
        &self.0
    }

    /// Number of messages of `kind` handed out for sending.
    pub fn sent_count(&self, kind: BodyKind) -> usize {
        self.0
            .iter()
            .filter(|entry| matches!(entry, AuditEntry::Sent { kind: k, .. } if *k == kind))
            .count()
    }

    /// Number of messages of `kind` received.
    pub fn received_count(&self, kind: BodyKind) -> usize {
        self.0
            .iter()
            .filter(|entry| matches!(entry, AuditEntry::Received { kind: k, .. } if *k == kind))
            .count()
    }

    /// True if the machine ever entered `state`.
    pub fn visited(&self, state: MachineState) -> bool {
        self.0.iter().any(|entry| matches!(entry, AuditEntry::Transition { to, .. } if *to == state))
    }

    /// Headers of every received message, in order.
    pub fn received_headers(&self) -> impl Iterator<Item = &PkiHeader> {
        self.0.iter().filter_map(|entry| match entry {
            AuditEntry::Received { header, .. } => Some(header),
            _ => None,
        })
    }
}

/// Terminal judgment of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Transaction the operation ran under
    pub transaction_id: TransactionId,
    /// Operation performed
    pub operation: OperationKind,
    /// How it ended
    pub outcome: Outcome,
    /// Defects found, in detection order
    pub defects: Defects,
    /// Exchange record
    pub audit: AuditTrail,
}

impl Verdict {
    /// True if the peer showed no defects.
    pub fn is_compliant(&self) -> bool {
        self.defects.is_empty()
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let judgment = if self.is_compliant() { "compliant" } else { "non-compliant" };
        write!(
            f,
            "{} {}: {} ({judgment}, {})",
            self.operation, self.transaction_id, self.outcome, self.defects
        )
    }
}
