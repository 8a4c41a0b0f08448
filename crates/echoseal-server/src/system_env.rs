//! Production environment backed by the wall clock and the OS RNG.
//!
//! Exchange waits sleep on Tokio's timer and facades draw encryption nonces
//! from getrandom. Nothing here is reproducible; tests use the seeded
//! simulation environment instead.

use std::{future::Future, time::Duration};

use echoseal_core::Environment;

/// Wall-clock environment with OS randomness.
///
/// # Panics
///
/// `random_bytes` panics if the OS RNG fails. A server that cannot draw
/// nonces must not keep encrypting responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// The system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG available, nonces must never repeat");
    }
}
