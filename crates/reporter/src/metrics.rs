//! Metric helpers for the event pipeline.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Which entity an event was produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    App,
    ParentApp,
    ChildApp,
    Resource,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::App => "app",
            EventType::ParentApp => "parentApp",
            EventType::ChildApp => "childApp",
            EventType::Resource => "resource",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unknown,
    GetPayload,
    Delivery,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unknown => "unknown",
            ErrorKind::GetPayload => "getPayload",
            ErrorKind::Delivery => "delivery",
        }
    }
}

pub fn inc_cached_ignored(event_type: EventType, app: &str) {
    counter!(
        "cached_ignored_events_total",
        1,
        "type" => event_type.as_str(),
        "app" => app.to_string()
    );
}

pub fn inc_errored(event_type: EventType, kind: ErrorKind, app: &str) {
    counter!(
        "errored_events_total",
        1,
        "type" => event_type.as_str(),
        "error_kind" => kind.as_str(),
        "app" => app.to_string()
    );
}

pub fn observe_processing_duration(app: &str, event_type: EventType, elapsed: Duration) {
    histogram!(
        "event_processing_duration_seconds",
        elapsed.as_secs_f64(),
        "app" => app.to_string(),
        "type" => event_type.as_str()
    );
}

pub fn set_queue_size(size: usize) {
    gauge!("queue_size", size as f64);
}

pub fn inc_rate_limited(app: &str, dropped: bool) {
    counter!(
        "events_rate_limited_total",
        1,
        "app" => app.to_string(),
        "dropped" => if dropped { "true" } else { "false" }
    );
}

pub fn inc_broadcast_dropped(app: &str) {
    counter!("broadcaster_dropped_events_total", 1, "app" => app.to_string());
}
