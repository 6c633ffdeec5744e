//! Manta controller: owns a subscription to the broadcaster and drains watch
//! events through the reporter, one event at a time.

#![forbid(unsafe_code)]

pub mod config;

pub use config::ControllerConfig;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use manta_api::{is_deadline_exceeded, SettingsProvider};
use manta_cache::EventCache;
use manta_core::{ApplicationWatchEvent, TrackingMetadata, WatchEventKind};
use manta_reporter::metrics::{self, EventType};
use manta_reporter::{ApplicationEventReporter, Broadcaster, SUBSCRIBER_CHANNEL_SIZE};

/// Per-event processing deadline.
const EVENT_TIMEOUT: Duration = Duration::from_secs(120);

/// One consumer of the broadcast stream. Horizontal scaling runs several
/// controller instances, each with its own subscriber channel.
pub struct EventReporterController {
    broadcaster: Arc<Broadcaster>,
    reporter: Arc<ApplicationEventReporter>,
    cache: EventCache,
    settings: Arc<dyn SettingsProvider>,
    application_event_ttl: Duration,
}

impl EventReporterController {
    pub fn new(
        broadcaster: Arc<Broadcaster>,
        reporter: Arc<ApplicationEventReporter>,
        cache: EventCache,
        settings: Arc<dyn SettingsProvider>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            broadcaster,
            reporter,
            cache,
            settings,
            application_event_ttl: config.application_event_cache_ttl,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let (tx, mut rx) = mpsc::channel(SUBSCRIBER_CHANNEL_SIZE);
        let _subscription = self.broadcaster.subscribe(tx);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("event reporter controller stopping");
                    return;
                }
                maybe_event = rx.recv() => {
                    let Some(event) = maybe_event else {
                        info!("subscriber channel closed");
                        return;
                    };
                    metrics::set_queue_size(rx.len());
                    self.handle_event(event).await;
                }
            }
        }
    }

    async fn handle_event(&self, event: ApplicationWatchEvent) {
        let app_name = event.application.name().to_string();

        // The healthy-transition signal doubles as a cache override: on a
        // transition to healthy every resource is re-sent.
        let (should_send, ignore_resource_cache) =
            self.reporter.should_send_application_event(&event);
        if !should_send {
            info!(app = %app_name, kind = ?event.kind, "skipping event");
            metrics::inc_cached_ignored(EventType::App, &app_name);
            return;
        }

        let started_at = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();

        let outcome = tokio::time::timeout(
            EVENT_TIMEOUT,
            self.send_if_permitted(&event, &started_at, ignore_resource_cache),
        )
        .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(app = %app_name, error = %format!("{err:#}"), "failed to stream application events");
                if is_deadline_exceeded(&err) {
                    info!("closing event-source connection");
                }
            }
            Err(_) => {
                error!(app = %app_name, "failed to stream application events: context deadline exceeded");
                info!("closing event-source connection");
            }
        }
    }

    async fn send_if_permitted(
        &self,
        event: &ApplicationWatchEvent,
        started_at: &str,
        ignore_resource_cache: bool,
    ) -> anyhow::Result<()> {
        if event.kind == WatchEventKind::Bookmark {
            return Ok(());
        }

        let tracking = TrackingMetadata {
            app_instance_label_key: self.settings.app_instance_label_key(),
            tracking_method: self.settings.tracking_method(),
        };

        self.reporter
            .stream_application_events(&event.application, started_at, ignore_resource_cache, &tracking)
            .await?;

        // A failed cache write only costs a redundant send later.
        if let Err(err) = self
            .cache
            .set_last_application_event(&event.application, self.application_event_ttl)
        {
            warn!(app = %event.application.name(), error = %err, "failed to cache last sent application event");
        }
        Ok(())
    }
}
