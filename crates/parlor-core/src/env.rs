//! Environment abstraction for deterministic testing.
//!
//! Decouples session logic from system resources (time, randomness).
//! Production uses the real clock and OS entropy; tests use a
//! hand-advanced virtual clock so backoff schedules and typing expiry
//! can be exercised without sleeping.

use std::time::Duration;

/// Abstract environment providing time, randomness, and async sleep.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in
///   production (local message ids must not collide across sessions)
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`; test
    /// environments use the same type driven by a virtual offset.
    type Instant: Copy + Ord + Send + Sync + 'static + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    ///
    /// # Invariants
    ///
    /// - Values never decrease within a single execution context.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait and is used only by
    /// driver code (never by state-machine logic).
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    ///
    /// Convenience for local message ids and similar tokens.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

/// Test environments with controllable time and deterministic entropy.
pub mod test_utils {
    use std::{
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    };

    use super::Environment;

    /// Deterministic environment for tests.
    ///
    /// The clock starts at construction time and only moves when
    /// [`MockEnv::advance`] is called. `sleep` resolves immediately so
    /// async drivers never stall under test.
    #[derive(Clone)]
    pub struct MockEnv {
        base: Instant,
        offset: Arc<Mutex<Duration>>,
        counter: Arc<Mutex<u64>>,
    }

    impl MockEnv {
        /// Create a mock environment with the clock at zero offset.
        #[must_use]
        pub fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Arc::new(Mutex::new(Duration::ZERO)),
                counter: Arc::new(Mutex::new(0)),
            }
        }

        /// Advance the virtual clock.
        pub fn advance(&self, by: Duration) {
            if let Ok(mut offset) = self.offset.lock() {
                *offset += by;
            }
        }
    }

    impl Default for MockEnv {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Environment for MockEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            let offset = self.offset.lock().map(|o| *o).unwrap_or_default();
            self.base + offset
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            // Deterministic sequence, distinct per call
            let mut counter = match self.counter.lock() {
                Ok(c) => c,
                Err(poisoned) => poisoned.into_inner(),
            };
            for byte in buffer.iter_mut() {
                *counter = counter.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                *byte = (*counter >> 33) as u8;
            }
        }
    }

}
