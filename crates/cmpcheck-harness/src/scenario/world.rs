//! World state after scenario execution.
//!
//! The World keeps the record of every step, the end entity's transaction
//! registry and the responder, so oracles can check both sides of each
//! exchange.

use std::sync::{MutexGuard, PoisonError};

use cmpcheck_core::{MachineError, TransactionRegistry, Verdict};
use cmpcheck_proto::TransactionId;

use crate::responder::{MockResponder, SharedResponder};

/// What one step produced.
#[derive(Debug, Clone)]
pub struct StepRecord {
    /// Transaction the step ran under
    pub transaction_id: TransactionId,
    /// Terminal verdict, or the error the engine refused the step with
    pub result: Result<Verdict, MachineError>,
}

/// World state containing the exchange records and both peers.
pub struct World {
    steps: Vec<StepRecord>,
    registry: TransactionRegistry,
    responder: SharedResponder,
}

impl World {
    /// Create a world around a registry and a responder.
    pub fn new(registry: TransactionRegistry, responder: SharedResponder) -> Self {
        Self { steps: Vec::new(), registry, responder }
    }

    /// Record the result of the next step.
    pub fn record(&mut self, record: StepRecord) {
        self.steps.push(record);
    }

    /// Every step record, in order.
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// Get a step record by index.
    pub fn step(&self, index: usize) -> Option<&StepRecord> {
        self.steps.get(index)
    }

    /// Verdict of a step that ran to completion.
    pub fn verdict(&self, index: usize) -> Option<&Verdict> {
        self.step(index).and_then(|record| record.result.as_ref().ok())
    }

    /// Error of a step the engine refused.
    pub fn refusal(&self, index: usize) -> Option<&MachineError> {
        self.step(index).and_then(|record| record.result.as_ref().err())
    }

    /// End entity transaction registry.
    pub fn registry(&self) -> &TransactionRegistry {
        &self.registry
    }

    /// Lock the responder for inspection.
    pub fn responder(&self) -> MutexGuard<'_, MockResponder> {
        self.responder.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("steps", &self.steps)
            .field("live_transactions", &self.registry.live_count())
            .finish_non_exhaustive()
    }
}
