//! Manta event cache: last-sent application and resource fingerprints with TTL.
//!
//! The pipeline needs only (key, value, ttl) semantics from the backend, so
//! the store is pluggable; the in-memory backend is sufficient for a single
//! process. Readers treat any retrieval failure as a miss and send anyway.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::debug;

use manta_core::{Application, ResourceStatus};

/// Minimal byte-store contract the cache runs on.
pub trait CacheBackend: Send + Sync {
    /// Store `value` under `key`. A zero `ttl` means the entry never expires.
    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

struct Entry {
    expires_at: Option<Instant>,
    data: Vec<u8>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

/// Process-local backend with lazy expiry.
#[derive(Default)]
pub struct InMemoryBackend {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheBackend for InMemoryBackend {
    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        let mut entries = self.entries.write().expect("cache lock poisoned");
        let now = Instant::now();
        entries.retain(|_, e| !e.expired(now));
        entries.insert(key.to_string(), Entry { expires_at, data: value });
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let expired = {
            let entries = self.entries.read().expect("cache lock poisoned");
            match entries.get(key) {
                None => return Ok(None),
                Some(e) if e.expired(Instant::now()) => true,
                Some(e) => return Ok(Some(e.data.clone())),
            }
        };
        if expired {
            self.entries.write().expect("cache lock poisoned").remove(key);
        }
        Ok(None)
    }
}

/// Last-sent event fingerprints keyed by application and by resource.
#[derive(Clone)]
pub struct EventCache {
    backend: Arc<dyn CacheBackend>,
}

impl EventCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()))
    }

    pub fn get_last_application_event(&self, app: &Application) -> Result<Option<Application>> {
        match self.backend.get(&app_event_key(app))? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .context("decoding cached application event"),
        }
    }

    pub fn set_last_application_event(&self, app: &Application, ttl: Duration) -> Result<()> {
        let bytes = serde_json::to_vec(app).context("encoding application event")?;
        debug!(app = %app.qualified_name(), "caching last application event");
        self.backend.set(&app_event_key(app), bytes, ttl)
    }

    pub fn get_last_resource_event(
        &self,
        app: &Application,
        rs: &ResourceStatus,
        revision: &str,
    ) -> Result<Option<ResourceStatus>> {
        match self.backend.get(&resource_event_key(app, rs, revision))? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .context("decoding cached resource event"),
        }
    }

    pub fn set_last_resource_event(
        &self,
        app: &Application,
        rs: &ResourceStatus,
        ttl: Duration,
        revision: &str,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(rs).context("encoding resource event")?;
        self.backend.set(&resource_event_key(app, rs, revision), bytes, ttl)
    }
}

fn app_event_key(app: &Application) -> String {
    format!("app|last-sent-event|{}", app.qualified_name())
}

fn resource_event_key(app: &Application, rs: &ResourceStatus, revision: &str) -> String {
    format!(
        "resource|last-sent-event|{}|{}|{}/{}|{}",
        app.qualified_name(),
        rs.gvk_key(),
        rs.namespace,
        rs.name,
        revision,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use manta_core::{HealthState, HealthStatus};

    fn app(name: &str) -> Application {
        let mut a = Application::default();
        a.metadata.name = Some(name.to_string());
        a.metadata.namespace = Some("default".to_string());
        a
    }

    fn resource(name: &str) -> ResourceStatus {
        ResourceStatus {
            group: "apps".into(),
            version: "v1".into(),
            kind: "Deployment".into(),
            namespace: "default".into(),
            name: name.into(),
            ..ResourceStatus::default()
        }
    }

    #[test]
    fn application_event_round_trip() {
        let cache = EventCache::in_memory();
        let mut a = app("web");
        a.status.health.status = HealthState::Degraded;

        assert!(cache.get_last_application_event(&a).unwrap().is_none());
        cache.set_last_application_event(&a, Duration::from_secs(60)).unwrap();
        let cached = cache.get_last_application_event(&a).unwrap().unwrap();
        assert_eq!(cached, a);
    }

    #[test]
    fn entries_expire() {
        let cache = EventCache::in_memory();
        let a = app("web");
        cache.set_last_application_event(&a, Duration::from_millis(5)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get_last_application_event(&a).unwrap().is_none());
    }

    #[test]
    fn zero_ttl_never_expires() {
        let cache = EventCache::in_memory();
        let a = app("web");
        cache.set_last_application_event(&a, Duration::ZERO).unwrap();
        assert!(cache.get_last_application_event(&a).unwrap().is_some());
    }

    #[test]
    fn resource_events_key_on_revision() {
        let cache = EventCache::in_memory();
        let a = app("web");
        let mut rs = resource("api");
        rs.health = Some(HealthStatus { status: HealthState::Healthy, message: String::new() });

        cache.set_last_resource_event(&a, &rs, Duration::from_secs(60), "rev-1").unwrap();
        assert!(cache.get_last_resource_event(&a, &rs, "rev-1").unwrap().is_some());
        // A new revision is a distinct fingerprint.
        assert!(cache.get_last_resource_event(&a, &rs, "rev-2").unwrap().is_none());
    }

    #[test]
    fn different_apps_do_not_collide() {
        let cache = EventCache::in_memory();
        let rs = resource("api");
        cache.set_last_resource_event(&app("a"), &rs, Duration::from_secs(60), "rev").unwrap();
        assert!(cache.get_last_resource_event(&app("b"), &rs, "rev").unwrap().is_none());
    }
}
