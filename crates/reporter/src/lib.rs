//! Manta event reporter: watch-event fan-out, change detection, and the
//! per-application streaming pipeline.

#![forbid(unsafe_code)]

pub mod app_errors;
pub mod broadcast;
pub mod decision;
pub mod features;
pub mod metrics;
pub mod payload;
pub mod ratelimit;
pub mod report;

pub use broadcast::{Broadcaster, Subscription, SUBSCRIBER_CHANNEL_SIZE};
pub use features::{FeatureFlags, FeatureManager};
pub use ratelimit::{Admission, EventRateLimiter, RateLimiterOpts};
pub use report::ApplicationEventReporter;
