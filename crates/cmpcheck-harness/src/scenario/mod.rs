//! Scenario-based testing with mandatory oracles.
//!
//! A scenario lists the operations an end entity performs against the
//! mock responder, runs them on a paused-clock runtime, and hands the
//! resulting [`World`] to an oracle. A scenario without an oracle cannot
//! be run.
//!
//! ```text
//! Scenario::new(..).responder(..).step(..)
//!          │
//!          ▼ .oracle(..)
//! RunnableScenario ── run ──> World ──> oracle(&World) -> Result<(), String>
//! ```

mod builder;
pub mod oracle;
mod world;

pub use builder::{Execution, OperationStep, RunnableScenario, Scenario, Step};
pub use world::{StepRecord, World};

/// Verification run against the final world state.
pub type OracleFn = Box<dyn Fn(&World) -> Result<(), String>>;
