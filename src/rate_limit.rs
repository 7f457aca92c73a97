//! Outbound call pacing and throttle accounting.
//!
//! Every request to the metadata service passes through [`RateLimiter::gate`],
//! which keeps consecutive call starts at least `cooldown` apart. The limiter
//! also counts consecutive rate-limit responses; once the ceiling is reached
//! it reports itself exhausted for the rest of the run.

use governor::clock::{Clock as GovernorClock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use std::num::NonZeroU32;
use std::time::Duration;

/// Minimum gap between outbound call starts.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

/// Consecutive throttle responses tolerated before lookups are disabled.
pub const DEFAULT_MAX_TRIPS: u32 = 3;

/// Wait used when a rate-limit response carries no Retry-After.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

// ============================================================================
// Clock
// ============================================================================

/// A governor clock that can also block the current thread.
pub trait Clock: GovernorClock + Clone {
    fn sleep(&self, duration: Duration);
}

/// Wall clock used in production.
pub type SystemClock = DefaultClock;

impl Clock for DefaultClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

type Pacer<C> = governor::RateLimiter<
    NotKeyed,
    InMemoryState,
    C,
    NoOpMiddleware<<C as GovernorClock>::Instant>,
>;

// ============================================================================
// Rate Limiter
// ============================================================================

pub struct RateLimiter<C: Clock = SystemClock> {
    clock: C,
    /// One cell per cooldown, no burst. `None` when the cooldown is zero.
    pacer: Option<Pacer<C>>,
    cooldown: Duration,
    max_trips: u32,
    trips: u32,
    total_trips: u32,
}

impl RateLimiter<SystemClock> {
    pub fn new(cooldown: Duration, max_trips: u32) -> Self {
        Self::with_clock(SystemClock::default(), cooldown, max_trips)
    }
}

impl Default for RateLimiter<SystemClock> {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN, DEFAULT_MAX_TRIPS)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(clock: C, cooldown: Duration, max_trips: u32) -> Self {
        let pacer = Quota::with_period(cooldown).map(|quota| {
            governor::RateLimiter::direct_with_clock(
                quota.allow_burst(NonZeroU32::MIN),
                clock.clone(),
            )
        });
        Self {
            clock,
            pacer,
            cooldown,
            max_trips,
            trips: 0,
            total_trips: 0,
        }
    }

    /// Block until the cooldown since the previous call start has elapsed,
    /// then count now as the start of the next call.
    pub fn gate(&mut self) {
        let Some(pacer) = &self.pacer else {
            return;
        };
        while let Err(not_until) = pacer.check() {
            let wait = not_until.wait_time_from(self.clock.now());
            log::trace!("Cooling down for {:.2}s", wait.as_secs_f64());
            self.clock.sleep(wait);
        }
    }

    /// Count one rate-limit response. Returns true if the ceiling is now reached.
    pub fn record_throttle(&mut self) -> bool {
        self.trips = self.trips.saturating_add(1);
        self.total_trips = self.total_trips.saturating_add(1);
        self.is_exhausted()
    }

    /// Clear the consecutive-throttle counter after a successful lookup.
    /// Has no effect once the ceiling was reached.
    pub fn reset_throttle(&mut self) {
        if !self.is_exhausted() {
            self.trips = 0;
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.trips >= self.max_trips
    }

    /// Sleep for a server-requested retry interval.
    pub fn backoff(&self, retry_after: Option<Duration>) {
        self.clock.sleep(retry_after.unwrap_or(DEFAULT_RETRY_AFTER));
    }

    pub fn trips(&self) -> u32 {
        self.trips
    }

    /// Throttle responses seen over the whole run.
    pub fn total_trips(&self) -> u32 {
        self.total_trips
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn max_trips(&self) -> u32 {
        self.max_trips
    }
}

// ============================================================================
// Test Clock
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::Clock;
    use governor::clock::{Clock as GovernorClock, FakeRelativeClock};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Manually advanced clock. Sleeping advances it and is recorded. Clones
    /// share the same timeline, so a test can keep one handle while the
    /// limiter owns another.
    #[derive(Clone, Debug, Default)]
    pub struct FakeClock {
        inner: FakeRelativeClock,
        elapsed: Arc<Mutex<Duration>>,
        sleeps: Arc<Mutex<Vec<Duration>>>,
    }

    impl FakeClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn advance(&self, duration: Duration) {
            self.inner.advance(duration);
            *self.elapsed.lock().unwrap() += duration;
        }

        /// Time elapsed on this clock since creation.
        pub fn elapsed(&self) -> Duration {
            *self.elapsed.lock().unwrap()
        }

        pub fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }
    }

    impl GovernorClock for FakeClock {
        type Instant = <FakeRelativeClock as GovernorClock>::Instant;

        fn now(&self) -> Self::Instant {
            self.inner.now()
        }
    }

    impl Clock for FakeClock {
        fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
            self.advance(duration);
        }
    }
}
