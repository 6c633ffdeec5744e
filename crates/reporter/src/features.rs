//! Feature flags read by the pipeline at publication time.

use std::sync::RwLock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Gate publications through the per-application rate limiter.
    pub rate_limit_events: bool,
}

/// Runtime-swappable flag set. The broadcaster reads it on every publish, so
/// flag changes take effect without restarting subscriptions.
#[derive(Debug, Default)]
pub struct FeatureManager {
    flags: RwLock<FeatureFlags>,
}

impl FeatureManager {
    pub fn new(flags: FeatureFlags) -> Self {
        Self { flags: RwLock::new(flags) }
    }

    pub fn rate_limit_enabled(&self) -> bool {
        self.flags.read().expect("feature lock poisoned").rate_limit_events
    }

    pub fn set_flags(&self, flags: FeatureFlags) {
        *self.flags.write().expect("feature lock poisoned") = flags;
    }
}
