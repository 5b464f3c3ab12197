//! Environment abstraction for time and randomness.
//!
//! The engine never reads the clock or an RNG directly. Production drivers
//! use [`SystemEnv`]; the simulation harness supplies a seeded environment
//! with a virtual clock so every run is reproducible.

use std::{
    future::Future,
    time::{Duration, Instant, SystemTime},
};

use cmpcheck_proto::{Nonce, TransactionId};
use rand::RngCore;

/// Length of nonces the engine issues, in bytes.
pub const NONCE_LEN: usize = 16;

/// Source of time and randomness.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Monotonic time used for deadlines.
    fn now(&self) -> Instant;

    /// Wall-clock time used for `messageTime`.
    fn wall_clock(&self) -> SystemTime;

    /// Wait for the given duration.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fill the buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Fresh sender nonce of [`NONCE_LEN`] bytes.
    fn fresh_nonce(&self) -> Nonce {
        let mut bytes = vec![0u8; NONCE_LEN];
        self.random_bytes(&mut bytes);
        Nonce::from(bytes)
    }

    /// Fresh random transaction identifier.
    fn fresh_transaction_id(&self) -> TransactionId {
        let mut bytes = [0u8; TransactionId::LEN];
        self.random_bytes(&mut bytes);
        TransactionId::new(bytes)
    }
}

/// Real clock, thread-local CSPRNG and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

// The one place the real clock and OS randomness are read.
#[allow(clippy::disallowed_methods)]
impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_clock(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        rand::thread_rng().fill_bytes(buffer);
    }
}
