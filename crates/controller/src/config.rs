//! Environment configuration, resolved once at startup and passed by value.

use std::time::Duration;

pub const APPLICATION_EVENT_CACHE_DURATION_ENV: &str = "APPLICATION_EVENT_CACHE_DURATION";
pub const RESOURCE_EVENT_CACHE_DURATION_ENV: &str = "RESOURCE_EVENT_CACHE_DURATION";

const DEFAULT_CACHE_SECS: i64 = 20 * 60;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub application_event_cache_ttl: Duration,
    pub resource_event_cache_ttl: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            application_event_cache_ttl: Duration::from_secs(DEFAULT_CACHE_SECS as u64),
            resource_event_cache_ttl: Duration::from_secs(DEFAULT_CACHE_SECS as u64),
        }
    }
}

impl ControllerConfig {
    pub fn from_env() -> Self {
        Self {
            application_event_cache_ttl: cache_duration(APPLICATION_EVENT_CACHE_DURATION_ENV),
            resource_event_cache_ttl: cache_duration(RESOURCE_EVENT_CACHE_DURATION_ENV),
        }
    }
}

/// Integer seconds, clamped to `[0, i32::MAX]`; anything unparseable falls
/// back to the default.
fn cache_duration(name: &str) -> Duration {
    let secs = std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(DEFAULT_CACHE_SECS)
        .clamp(0, i32::MAX as i64);
    Duration::from_secs(secs as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_variable_uses_default() {
        assert_eq!(
            cache_duration("MANTA_TEST_CACHE_MISSING"),
            Duration::from_secs(DEFAULT_CACHE_SECS as u64)
        );
    }

    #[test]
    fn value_is_parsed_as_seconds() {
        std::env::set_var("MANTA_TEST_CACHE_SECONDS", "90");
        assert_eq!(cache_duration("MANTA_TEST_CACHE_SECONDS"), Duration::from_secs(90));
    }

    #[test]
    fn negative_value_clamps_to_zero() {
        std::env::set_var("MANTA_TEST_CACHE_NEGATIVE", "-5");
        assert_eq!(cache_duration("MANTA_TEST_CACHE_NEGATIVE"), Duration::ZERO);
    }

    #[test]
    fn garbage_value_uses_default() {
        std::env::set_var("MANTA_TEST_CACHE_GARBAGE", "soon");
        assert_eq!(
            cache_duration("MANTA_TEST_CACHE_GARBAGE"),
            Duration::from_secs(DEFAULT_CACHE_SECS as u64)
        );
    }
}
