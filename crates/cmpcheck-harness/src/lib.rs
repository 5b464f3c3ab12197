//! Deterministic test harness for the cmpcheck conformance engine.
//!
//! Everything the engine treats as an external collaborator has a
//! simulated stand-in here, so complete operations run reproducibly from a
//! single seed:
//!
//! - [`SimEnv`]: seeded RNG and a virtual clock that `sleep` advances
//! - [`CborCodec`]: encoding adapter (CBOR in place of DER)
//! - [`SimCrypto`]: HMAC-SHA256 protection keyed per sender KID
//! - [`MockResponder`]: a PKI management entity with injectable faults
//! - [`LoopbackTransport`] and [`SimTransport`]: in-process and turmoil
//!   network delivery
//! - [`scenario`]: declarative scenarios that must carry an oracle
//! - [`suite`]: the built-in conformance cases

pub mod codec;
pub mod crypto;
pub mod env;
pub mod error;
pub mod fixtures;
pub mod responder;
pub mod scenario;
pub mod suite;
pub mod transport;

pub use codec::CborCodec;
pub use crypto::{MacCredential, SimCrypto, TrustedKeys};
pub use env::SimEnv;
pub use error::HarnessError;
pub use fixtures::{Initiator, RequestShape};
pub use responder::{Fault, MockResponder, ResponderConfig, SharedResponder};
pub use suite::{ConformanceCase, suite};
pub use transport::{LoopbackTransport, SimTransport, serve};
