//! CMP conformance engine core.
//!
//! Pure protocol logic for grading a PKI management entity, decoupled from
//! I/O, time and randomness so it runs identically against a live peer and
//! inside a deterministic simulation.
//!
//! # Architecture
//!
//! The [`machine::OperationMachine`] drives one PKI management operation
//! (enrollment, certification, key update, revocation or general message).
//! Its methods take the current time as a parameter and return
//! [`machine::MachineAction`]s describing what the driver must do next:
//! send a message, wait for a response, wait for a confirmation decision,
//! or record the terminal verdict.
//!
//! Every inbound message passes through the [`validator`], a pure function
//! that returns every defect it finds rather than stopping at the first.
//! Live transactions are tracked in a [`registry::TransactionRegistry`],
//! the only state shared between concurrent operations.
//!
//! Encoding, cryptography and transport are capabilities supplied by the
//! caller through the traits in [`adapter`]. The [`runner::Exchange`]
//! wires them to a machine and executes its actions with bounded waits.
//!
//! # Components
//!
//! - [`machine`]: Operation state machine
//! - [`validator`]: Response validator and validation policy
//! - [`registry`]: Transaction registry
//! - [`audit`]: Audit trail and verdicts
//! - [`adapter`]: Encoding, crypto and transport seams
//! - [`mod@env`]: Environment abstraction (time, RNG)
//! - [`runner`]: Async exchange runner
//! - [`error`]: Error types

pub mod adapter;
pub mod audit;
pub mod env;
pub mod error;
pub mod machine;
pub mod registry;
pub mod runner;
pub mod validator;

pub use adapter::{CryptoAdapter, EncodingAdapter, Inbound, ProtectionCheck, Transport};
pub use audit::{AuditEntry, AuditTrail, DeadlinePurpose, Verdict};
pub use env::{Environment, NONCE_LEN, SystemEnv};
pub use error::{
    ConfigError, CryptoError, DecodeError, EncodeError, MachineError, RegistryError, TransportError,
};
pub use machine::{
    MAX_WAIT, MachineAction, MachineConfig, MachineState, OperationMachine, deadline_after,
};
pub use registry::{ENDED_RETENTION, EndStatus, Outcome, Transaction, TransactionRegistry};
pub use runner::{ConfirmPolicy, Exchange};
pub use validator::{
    DEFAULT_NONCE_DISTANCE, Defect, Defects, Expectation, NonceCheckError, ValidationPolicy,
    nonces_are_diverse, nonces_are_unique, validate_identity, validate_response,
};
