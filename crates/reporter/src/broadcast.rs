//! Watch-event ingest and fan-out.
//!
//! The watch source drives [`Broadcaster`] synchronously through the
//! [`WatchEventHandler`] callbacks, so every path here is non-blocking: a
//! subscriber whose channel is full loses that delivery (counted) instead of
//! stalling the source.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use manta_api::WatchEventHandler;
use manta_core::{Application, ApplicationWatchEvent, WatchEventKind};

use crate::features::FeatureManager;
use crate::metrics;
use crate::ratelimit::{Admission, EventRateLimiter, RateLimiterOpts};

/// Capacity of every subscriber channel: large enough to absorb bursts,
/// bounded to protect memory.
pub const SUBSCRIBER_CHANNEL_SIZE: usize = 1000;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<ApplicationWatchEvent>,
}

pub struct Broadcaster {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    next_id: AtomicU64,
    features: Arc<FeatureManager>,
    limiter: EventRateLimiter,
}

impl Broadcaster {
    pub fn new(features: Arc<FeatureManager>, limiter_opts: &RateLimiterOpts) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
            features,
            limiter: EventRateLimiter::from_opts(limiter_opts),
        }
    }

    /// Register a subscriber channel. The returned guard unregisters on drop.
    pub fn subscribe(&self, tx: mpsc::Sender<ApplicationWatchEvent>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .push(Subscriber { id, tx });
        Subscription { id, subscribers: Arc::clone(&self.subscribers) }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("subscriber lock poisoned").len()
    }

    fn publish(&self, event: ApplicationWatchEvent) {
        let app_name = event.application.name().to_string();

        if self.features.rate_limit_enabled()
            && self.limiter.admit(&app_name) == Admission::Denied
        {
            warn!(app = %app_name, "rate limit exceeded, dropping event");
            return;
        }

        let subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
        for sub in subscribers.iter() {
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metrics::inc_broadcast_dropped(&app_name);
                    warn!(app = %app_name, subscriber = sub.id, "subscriber channel full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    metrics::inc_broadcast_dropped(&app_name);
                    debug!(app = %app_name, subscriber = sub.id, "subscriber channel closed");
                }
            }
        }
    }
}

impl WatchEventHandler for Broadcaster {
    fn on_add(&self, app: Application, is_in_initial_list: bool) {
        // Initial-list replays only checkpoint the stream; they are published
        // as bookmarks and discarded before delivery.
        let kind = if is_in_initial_list { WatchEventKind::Bookmark } else { WatchEventKind::Added };
        self.publish(ApplicationWatchEvent::new(kind, app));
    }

    fn on_update(&self, _old: Application, new: Application) {
        self.publish(ApplicationWatchEvent::new(WatchEventKind::Modified, new));
    }

    fn on_delete(&self, app: Application) {
        self.publish(ApplicationWatchEvent::new(WatchEventKind::Deleted, app));
    }
}

/// One-shot un-register handle for a subscriber channel.
pub struct Subscription {
    id: u64,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .retain(|s| s.id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureFlags;

    fn app(name: &str) -> Application {
        let mut a = Application::default();
        a.metadata.name = Some(name.to_string());
        a.metadata.namespace = Some("default".to_string());
        a
    }

    fn broadcaster() -> Broadcaster {
        Broadcaster::new(
            Arc::new(FeatureManager::new(FeatureFlags::default())),
            &RateLimiterOpts::default(),
        )
    }

    #[test]
    fn every_subscriber_sees_every_admitted_event() {
        let b = broadcaster();
        let (tx1, mut rx1) = mpsc::channel(SUBSCRIBER_CHANNEL_SIZE);
        let (tx2, mut rx2) = mpsc::channel(SUBSCRIBER_CHANNEL_SIZE);
        let _s1 = b.subscribe(tx1);
        let _s2 = b.subscribe(tx2);

        b.on_add(app("web"), false);
        b.on_delete(app("web"));

        assert_eq!(rx1.try_recv().unwrap().kind, WatchEventKind::Added);
        assert_eq!(rx1.try_recv().unwrap().kind, WatchEventKind::Deleted);
        assert_eq!(rx2.try_recv().unwrap().kind, WatchEventKind::Added);
        assert_eq!(rx2.try_recv().unwrap().kind, WatchEventKind::Deleted);
    }

    #[test]
    fn initial_list_adds_become_bookmarks() {
        let b = broadcaster();
        let (tx, mut rx) = mpsc::channel(SUBSCRIBER_CHANNEL_SIZE);
        let _s = b.subscribe(tx);
        b.on_add(app("web"), true);
        assert_eq!(rx.try_recv().unwrap().kind, WatchEventKind::Bookmark);
    }

    #[test]
    fn slow_subscriber_never_blocks_fast_one() {
        let b = broadcaster();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(SUBSCRIBER_CHANNEL_SIZE);
        let _s1 = b.subscribe(slow_tx);
        let _s2 = b.subscribe(fast_tx);

        b.on_add(app("a"), false);
        b.on_add(app("b"), false);
        b.on_add(app("c"), false);

        // The slow channel kept only the first event; the fast one got all.
        assert_eq!(slow_rx.try_recv().unwrap().application.name(), "a");
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(fast_rx.try_recv().unwrap().application.name(), "a");
        assert_eq!(fast_rx.try_recv().unwrap().application.name(), "b");
        assert_eq!(fast_rx.try_recv().unwrap().application.name(), "c");
    }

    #[test]
    fn dropped_subscription_unregisters() {
        let b = broadcaster();
        let (tx, _rx) = mpsc::channel(SUBSCRIBER_CHANNEL_SIZE);
        let sub = b.subscribe(tx);
        assert_eq!(b.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(b.subscriber_count(), 0);
    }

    #[test]
    fn rate_limiter_gates_publication_when_enabled() {
        let b = Broadcaster::new(
            Arc::new(FeatureManager::new(FeatureFlags { rate_limit_events: true })),
            &RateLimiterOpts { enabled: true, rate: 1, burst: 1, learning_mode: false },
        );
        let (tx, mut rx) = mpsc::channel(SUBSCRIBER_CHANNEL_SIZE);
        let _s = b.subscribe(tx);

        b.on_add(app("web"), false);
        b.on_add(app("web"), false);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
