//! # Reconnect backoff policy.
//!
//! [`BackoffPolicy`] controls how long the supervisor waits between redial
//! attempts after the device link fails. It is parameterized by:
//! - [`BackoffPolicy::first`] the delay before the first redial;
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::max`] the maximum delay cap;
//! - [`BackoffPolicy::jitter`] randomization applied on top of the base delay;
//! - [`BackoffPolicy::max_attempts`] optional limit on consecutive failed dials.
//!
//! The delay for attempt `n` is `first × factor^n`, clamped to `max`, then jitter
//! is applied. The base is derived purely from the attempt number, so jitter
//! output never feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use dsplink::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_secs(1),
//!     max: Duration::from_secs(30),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//!     max_attempts: None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_secs(1));
//! assert_eq!(backoff.next(2), Duration::from_secs(4));
//! assert_eq!(backoff.next(10), Duration::from_secs(30));
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::policies::jitter::JitterPolicy;

/// Redial backoff policy.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay before the first redial.
    #[serde(rename = "first_ms", with = "crate::core::duration_ms")]
    pub first: Duration,
    /// Maximum delay cap.
    #[serde(rename = "max_ms", with = "crate::core::duration_ms")]
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Jitter policy; spreads redials of several clients hitting one struggling device.
    pub jitter: JitterPolicy,
    /// Maximum consecutive failed attempts (`None` = retry forever).
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    /// Returns a policy with:
    /// - `first = 1s`, `factor = 2.0`, `max = 30s` (1s, 2s, 4s, … 30s);
    /// - `jitter = Equal`;
    /// - `max_attempts = None` (the link is redialed forever).
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
            max_attempts: None,
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay for the given attempt number (0-indexed).
    ///
    /// # Notes
    /// - `factor == 1.0` keeps the delay constant at `first` (up to `max`).
    /// - A non-finite or negative intermediate result clamps to `max`.
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let unclamped_secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base =
            if !unclamped_secs.is_finite() || unclamped_secs < 0.0 || unclamped_secs > max_secs {
                self.max
            } else {
                Duration::from_secs_f64(unclamped_secs)
            };

        match self.jitter {
            JitterPolicy::Decorrelated => {
                self.jitter
                    .apply_decorrelated(self.first.min(self.max), base, self.max)
            }
            _ => self.jitter.apply(base),
        }
    }

    /// Returns `true` if another redial is allowed after `failed` consecutive failures.
    #[inline]
    pub fn allows(&self, failed: u32) -> bool {
        self.max_attempts.is_none_or(|max| failed < max)
    }
}
