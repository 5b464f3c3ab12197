//! Harness error types.

/// Failures of the harness itself, as opposed to verdicts about the peer.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The async runtime could not be started.
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),

    /// A step refers to a step that has not run yet.
    #[error("step {step} reuses the transaction of step {target}, which has not run")]
    UnknownStep {
        /// Step making the reference
        step: usize,
        /// Step referred to
        target: usize,
    },

    /// The simulated network run failed.
    #[error("simulation failed: {0}")]
    Simulation(String),

    /// No conformance case has this name.
    #[error("unknown conformance case {0:?}")]
    UnknownCase(String),
}
