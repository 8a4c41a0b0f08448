//! Time and randomness seam.
//!
//! The orchestrator bounds every facade wait with [`Environment::sleep`], and
//! facades draw encryption nonces from [`Environment::nonce`]. Production
//! plugs in the wall clock and the OS RNG; simulations plug in virtual time
//! and a seeded RNG so a failing run can be replayed exactly.

use std::{future::Future, ops::Sub, time::Duration};

/// Source of time and randomness for an exchange.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` is monotonic
/// - `random_bytes()` draws from a cryptographically secure RNG in
///   production, since repeated AES-GCM nonces leak plaintext
pub trait Environment: Clone + Send + Sync + 'static {
    /// Instant type of this environment's clock.
    type Instant: Copy + Ord + Send + Sync + Sub<Output = Duration>;

    /// Current time on this environment's clock.
    fn now(&self) -> Self::Instant;

    /// Complete after `duration` has elapsed on this environment's clock.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Draw a fresh `N`-byte nonce.
    fn nonce<const N: usize>(&self) -> [u8; N] {
        let mut nonce = [0u8; N];
        self.random_bytes(&mut nonce);
        nonce
    }
}
