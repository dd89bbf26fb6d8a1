//! Delay computation for released jobs.
//!
//! - **RetryDirective**: an absolute point in time or a relative number of seconds
//! - **Clock**: the source of "now", swappable for tests
//! - **BackoffStrategy**: worker-side retry delays derived from the attempt count

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Directive
// ═══════════════════════════════════════════════════════════════════════════════

/// When a released job should become available again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryDirective {
    /// Available at a specific point in time.
    At(DateTime<Utc>),
    /// Available after the given number of seconds.
    Seconds(i64),
}

impl Default for RetryDirective {
    fn default() -> Self {
        Self::Seconds(0)
    }
}

impl fmt::Display for RetryDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::At(at) => write!(f, "at {}", at.to_rfc3339()),
            Self::Seconds(secs) => write!(f, "in {}s", secs),
        }
    }
}

impl From<i64> for RetryDirective {
    fn from(secs: i64) -> Self {
        Self::Seconds(secs)
    }
}

impl From<u32> for RetryDirective {
    fn from(secs: u32) -> Self {
        Self::Seconds(i64::from(secs))
    }
}

impl From<Duration> for RetryDirective {
    fn from(duration: Duration) -> Self {
        Self::Seconds(i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
    }
}

impl From<DateTime<Utc>> for RetryDirective {
    fn from(at: DateTime<Utc>) -> Self {
        Self::At(at)
    }
}

/// Resolve a directive into a delay in seconds relative to `now`.
///
/// Absolute times in the past resolve to zero. Relative delays are passed
/// through unchanged.
pub fn resolve_delay_seconds(directive: RetryDirective, now: DateTime<Utc>) -> i64 {
    match directive {
        RetryDirective::At(at) => at.timestamp().saturating_sub(now.timestamp()).max(0),
        RetryDirective::Seconds(secs) => secs,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Clock
// ═══════════════════════════════════════════════════════════════════════════════

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
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

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        let mut now = self.now.write();
        *now += delta;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backoff Strategy
// ═══════════════════════════════════════════════════════════════════════════════

/// Strategy for calculating the delay before a failed job is retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed { delay_secs: u64 },
    /// Linear increase in delay (initial + increment * attempt)
    Linear {
        initial_delay_secs: u64,
        increment_secs: u64,
    },
    /// Exponential increase in delay (initial * multiplier^attempt), capped
    Exponential {
        initial_delay_secs: u64,
        max_delay_secs: u64,
        multiplier: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Fixed { delay_secs: 0 }
    }
}

impl BackoffStrategy {
    /// Calculate the delay for a given attempt number (1-indexed, as reported
    /// by the backend).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let step = attempt.saturating_sub(1);
        let secs = match self {
            Self::Fixed { delay_secs } => *delay_secs,
            Self::Linear {
                initial_delay_secs,
                increment_secs,
            } => initial_delay_secs.saturating_add(increment_secs.saturating_mul(u64::from(step))),
            Self::Exponential {
                initial_delay_secs,
                max_delay_secs,
                multiplier,
            } => {
                let exponent = i32::try_from(step).unwrap_or(i32::MAX);
                let delay = (*initial_delay_secs as f64) * multiplier.powi(exponent);
                delay.min(*max_delay_secs as f64) as u64
            }
        };

        Duration::from_secs(secs)
    }

    /// Create a fixed backoff strategy.
    pub fn fixed(delay_secs: u64) -> Self {
        Self::Fixed { delay_secs }
    }

    /// Exponential backoff starting at 5s, doubling, capped at one hour.
    pub fn exponential() -> Self {
        Self::Exponential {
            initial_delay_secs: 5,
            max_delay_secs: 3600,
            multiplier: 2.0,
        }
    }
}
