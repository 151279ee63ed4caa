//! Renewal interval computation
//!
//! Decides how long to wait before the next fetch from the remaining lifetime
//! of the credential just fetched. The result is always:
//!
//! - at most 80% of the remaining lifetime, so one more agent round trip
//!   still fits before expiry
//! - the operator override when set, otherwise half the remaining lifetime
//! - at least one second, so an expired or nearly expired credential is
//!   retried promptly without spinning

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::credential::Credential;

/// Upper bound on the wait, as a fraction of remaining lifetime.
pub const MAX_LIFETIME_FRACTION: f64 = 0.8;

/// Default wait is the remaining lifetime divided by this (the midpoint).
pub const DEFAULT_LIFETIME_DIVISOR: u32 = 2;

/// Floor on the wait.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Compute the wait before the next fetch.
///
/// `override_interval` of `None` or zero selects the default policy.
pub fn next_interval(
    expiry: DateTime<Utc>,
    now: DateTime<Utc>,
    override_interval: Option<Duration>,
) -> Duration {
    // Negative remaining (expired, or clock skew) fails to_std()
    let remaining = match (expiry - now).to_std() {
        Ok(remaining) if !remaining.is_zero() => remaining,
        _ => return MIN_REFRESH_INTERVAL,
    };

    let cap = remaining.mul_f64(MAX_LIFETIME_FRACTION);
    let proposed = match override_interval {
        Some(interval) if !interval.is_zero() => interval,
        _ => remaining / DEFAULT_LIFETIME_DIVISOR,
    };

    proposed.min(cap).max(MIN_REFRESH_INTERVAL)
}

/// Renewal schedule bound to a clock and an optional fixed interval.
#[derive(Debug, Clone)]
pub struct RenewalScheduler<C: Clock = SystemClock> {
    override_interval: Option<Duration>,
    clock: C,
}

impl RenewalScheduler<SystemClock> {
    pub fn new(override_interval: Option<Duration>) -> Self {
        Self::with_clock(override_interval, SystemClock)
    }
}

impl<C: Clock> RenewalScheduler<C> {
    pub fn with_clock(override_interval: Option<Duration>, clock: C) -> Self {
        Self {
            override_interval: override_interval.filter(|i| !i.is_zero()),
            clock,
        }
    }

    pub fn override_interval(&self) -> Option<Duration> {
        self.override_interval
    }

    /// Wait before refreshing `credential`.
    pub fn next_interval(&self, credential: &Credential) -> Duration {
        next_interval(credential.expiry(), self.clock.now(), self.override_interval)
    }

    /// Time left until `credential` expires; zero if already expired.
    pub fn remaining(&self, credential: &Credential) -> Duration {
        (credential.expiry() - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// A clock frozen at one instant.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
