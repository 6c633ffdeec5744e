//! Per-application admission control for watch-event publication.

use std::num::NonZeroU32;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tracing::debug;

use crate::metrics;

#[derive(Debug, Clone)]
pub struct RateLimiterOpts {
    pub enabled: bool,
    /// Steady-state events per second per application.
    pub rate: u32,
    /// Token-bucket capacity.
    pub burst: u32,
    /// Observe and report denials without actually dropping anything.
    pub learning_mode: bool,
}

impl Default for RateLimiterOpts {
    fn default() -> Self {
        Self { enabled: false, rate: 50, burst: 100, learning_mode: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied,
}

/// Admission gate keyed by application identity. Either a no-op or a keyed
/// token bucket; never blocks the caller.
pub enum EventRateLimiter {
    Null,
    PerKey {
        limiter: DefaultKeyedRateLimiter<String>,
        learning_mode: bool,
    },
}

impl EventRateLimiter {
    pub fn from_opts(opts: &RateLimiterOpts) -> Self {
        if !opts.enabled {
            return Self::Null;
        }
        let rate = NonZeroU32::new(opts.rate).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(opts.burst).unwrap_or(rate);
        Self::PerKey {
            limiter: RateLimiter::keyed(Quota::per_second(rate).allow_burst(burst)),
            learning_mode: opts.learning_mode,
        }
    }

    pub fn admit(&self, key: &str) -> Admission {
        match self {
            Self::Null => Admission::Allowed,
            Self::PerKey { limiter, learning_mode } => {
                if limiter.check_key(&key.to_string()).is_ok() {
                    return Admission::Allowed;
                }
                metrics::inc_rate_limited(key, !learning_mode);
                if *learning_mode {
                    debug!(app = %key, "rate limit exceeded (learning mode), admitting");
                    Admission::Allowed
                } else {
                    Admission::Denied
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_limiter_admits_everything() {
        let limiter = EventRateLimiter::from_opts(&RateLimiterOpts::default());
        for _ in 0..1000 {
            assert_eq!(limiter.admit("app"), Admission::Allowed);
        }
    }

    #[test]
    fn burst_exhaustion_denies() {
        let limiter = EventRateLimiter::from_opts(&RateLimiterOpts {
            enabled: true,
            rate: 1,
            burst: 3,
            learning_mode: false,
        });
        let admitted = (0..10).filter(|_| limiter.admit("app") == Admission::Allowed).count();
        assert_eq!(admitted, 3);
    }

    #[test]
    fn learning_mode_never_denies() {
        let limiter = EventRateLimiter::from_opts(&RateLimiterOpts {
            enabled: true,
            rate: 1,
            burst: 1,
            learning_mode: true,
        });
        for _ in 0..10 {
            assert_eq!(limiter.admit("app"), Admission::Allowed);
        }
    }

    #[test]
    fn keys_are_independent() {
        let limiter = EventRateLimiter::from_opts(&RateLimiterOpts {
            enabled: true,
            rate: 1,
            burst: 1,
            learning_mode: false,
        });
        assert_eq!(limiter.admit("a"), Admission::Allowed);
        assert_eq!(limiter.admit("a"), Admission::Denied);
        assert_eq!(limiter.admit("b"), Admission::Allowed);
    }
}
