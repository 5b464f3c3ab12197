//! Simulated environment.
//!
//! Time is virtual: it starts at a fixed origin and only moves when
//! something sleeps or calls [`SimEnv::advance`]. Randomness comes from a
//! ChaCha RNG seeded once, so two environments built from the same seed
//! produce identical nonces and transaction identifiers.

use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant, SystemTime},
};

use cmpcheck_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seconds after the Unix epoch the virtual wall clock starts at.
const WALL_CLOCK_ORIGIN_SECS: u64 = 1_700_000_000;

/// Seed used by [`SimEnv::new`].
pub const DEFAULT_SEED: u64 = 0x00c0_ffee;

struct SimState {
    rng: ChaCha8Rng,
    elapsed: Duration,
}

/// Seeded RNG plus virtual clock, shared between clones.
#[derive(Clone)]
pub struct SimEnv {
    origin: Instant,
    state: Arc<Mutex<SimState>>,
}

impl SimEnv {
    /// Environment seeded with [`DEFAULT_SEED`].
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Environment with an explicit seed.
    #[allow(clippy::disallowed_methods)]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            origin: Instant::now(),
            state: Arc::new(Mutex::new(SimState {
                rng: ChaCha8Rng::seed_from_u64(seed),
                elapsed: Duration::ZERO,
            })),
        }
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, duration: Duration) {
        self.lock().elapsed += duration;
    }

    /// Virtual time since the environment was created.
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    /// Random `u64` from the seeded RNG.
    pub fn random_u64(&self) -> u64 {
        self.lock().rng.next_u64()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("elapsed", &self.elapsed()).finish_non_exhaustive()
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn wall_clock(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(WALL_CLOCK_ORIGIN_SECS) + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.lock().rng.fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_identifiers() {
        let a = SimEnv::with_seed(42);
        let b = SimEnv::with_seed(42);
        assert_eq!(a.fresh_transaction_id(), b.fresh_transaction_id());
        assert_eq!(a.fresh_nonce(), b.fresh_nonce());
        assert_eq!(a.random_u64(), b.random_u64());
    }

    #[test]
    fn clones_share_rng_and_clock() {
        let env = SimEnv::with_seed(7);
        let clone = env.clone();
        let first = env.fresh_nonce();
        assert_ne!(first, clone.fresh_nonce());

        clone.advance(Duration::from_secs(5));
        assert_eq!(env.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn sleep_advances_virtual_time() {
        let env = SimEnv::new();
        let start = env.now();
        let wall = env.wall_clock();

        env.sleep(Duration::from_secs(60)).await;

        assert_eq!(env.now() - start, Duration::from_secs(60));
        assert_eq!(env.wall_clock().duration_since(wall).ok(), Some(Duration::from_secs(60)));
    }
}
