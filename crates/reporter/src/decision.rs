//! Change detection: is an incoming watch event worth processing?

use tracing::debug;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use manta_core::{
    Application, ApplicationWatchEvent, HealthState, ResourceStatus, WatchEventKind,
};

const LAST_APPLIED_CONFIG_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Decide whether `event` should be streamed, given the last delivered
/// snapshot for the same application. The second flag reports a transition
/// into the healthy state.
pub fn should_send_application_event(
    event: &ApplicationWatchEvent,
    cached: Option<&Application>,
) -> (bool, bool) {
    let app = &event.application;

    if event.kind == WatchEventKind::Deleted {
        debug!(app = %app.name(), "application deleted");
        return (true, false);
    }

    let Some(cached) = cached else {
        return (true, false);
    };

    let mut cached = cached.clone();
    let mut incoming = app.clone();

    // Neutralise fields that churn on every reconciliation cycle. The project
    // field is compared raw, never through the defaulting accessor.
    cached.status.reconciled_at = incoming.status.reconciled_at.clone();
    cached.spec.project = incoming.spec.project.clone();
    for c in &mut cached.status.conditions {
        c.last_transition_time = None;
    }
    for c in &mut incoming.status.conditions {
        c.last_transition_time = None;
    }

    if incoming.status.health.status == HealthState::Healthy
        && cached.status.health.status != HealthState::Healthy
    {
        debug!(app = %app.name(), "application transitioned to healthy");
        return (true, true);
    }

    if incoming.spec != cached.spec {
        debug!(app = %app.name(), "application spec changed");
        return (true, false);
    }

    if incoming.status != cached.status {
        debug!(app = %app.name(), "application status changed");
        return (true, false);
    }

    if incoming.operation != cached.operation {
        debug!(app = %app.name(), "application operation changed");
        return (true, false);
    }

    if application_metadata_changed(event.kind, &incoming.metadata, &cached.metadata) {
        debug!(app = %app.name(), "application metadata changed");
        return (true, false);
    }

    (false, false)
}

fn application_metadata_changed(
    kind: WatchEventKind,
    incoming: &ObjectMeta,
    cached: &ObjectMeta,
) -> bool {
    if kind != WatchEventKind::Modified {
        return false;
    }

    let mut incoming = incoming.clone();
    let mut cached = cached.clone();

    if incoming.annotations.is_some() {
        if let Some(annotations) = incoming.annotations.as_mut() {
            annotations.remove(LAST_APPLIED_CONFIG_ANNOTATION);
        }
        if let Some(annotations) = cached.annotations.as_mut() {
            annotations.remove(LAST_APPLIED_CONFIG_ANNOTATION);
        }
    }

    cached.resource_version = incoming.resource_version.clone();
    cached.generation = incoming.generation;
    cached.generate_name = incoming.generate_name.clone();
    incoming.managed_fields = None;
    cached.managed_fields = None;

    incoming != cached
}

/// A resource event is sent when its fingerprint is absent or its status
/// value changed since the last successful delivery.
pub fn should_send_resource_event(cached: Option<&ResourceStatus>, rs: &ResourceStatus) -> bool {
    match cached {
        None => true,
        Some(cached) => cached != rs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ManagedFieldsEntry, Time};
    use manta_core::{ApplicationCondition, HealthStatus, Operation, SyncOperation};
    use std::collections::BTreeMap;

    fn time(secs: i64) -> Time {
        use chrono::TimeZone;
        Time(chrono::Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn app(name: &str) -> Application {
        let mut a = Application::default();
        a.metadata.name = Some(name.to_string());
        a.metadata.namespace = Some("default".to_string());
        a.status.health.status = HealthState::Healthy;
        a
    }

    fn event(kind: WatchEventKind, app: Application) -> ApplicationWatchEvent {
        ApplicationWatchEvent::new(kind, app)
    }

    #[test]
    fn deletion_always_fires() {
        let a = app("web");
        let ev = event(WatchEventKind::Deleted, a.clone());
        assert_eq!(should_send_application_event(&ev, Some(&a)), (true, false));
        assert_eq!(should_send_application_event(&ev, None), (true, false));
    }

    #[test]
    fn cache_miss_fires() {
        let ev = event(WatchEventKind::Modified, app("web"));
        assert_eq!(should_send_application_event(&ev, None), (true, false));
    }

    #[test]
    fn identical_snapshot_is_suppressed() {
        let a = app("web");
        let ev = event(WatchEventKind::Modified, a.clone());
        assert_eq!(should_send_application_event(&ev, Some(&a)), (false, false));
    }

    #[test]
    fn reconciled_at_churn_is_suppressed() {
        let mut cached = app("web");
        cached.status.reconciled_at = Some(time(100));
        let mut incoming = cached.clone();
        incoming.status.reconciled_at = Some(time(200));
        let ev = event(WatchEventKind::Modified, incoming);
        assert_eq!(should_send_application_event(&ev, Some(&cached)), (false, false));
    }

    #[test]
    fn condition_transition_time_churn_is_suppressed() {
        let mut cached = app("web");
        cached.status.conditions = vec![ApplicationCondition {
            condition_type: ApplicationCondition::SYNC_ERROR.into(),
            message: "boom".into(),
            last_transition_time: Some(time(100)),
        }];
        let mut incoming = cached.clone();
        incoming.status.conditions[0].last_transition_time = Some(time(200));
        let ev = event(WatchEventKind::Modified, incoming);
        assert_eq!(should_send_application_event(&ev, Some(&cached)), (false, false));
    }

    #[test]
    fn health_transition_to_healthy_is_signalled() {
        let mut cached = app("web");
        cached.status.health.status = HealthState::Degraded;
        let incoming = app("web");
        let ev = event(WatchEventKind::Modified, incoming);
        assert_eq!(should_send_application_event(&ev, Some(&cached)), (true, true));
    }

    #[test]
    fn health_transition_away_from_healthy_is_plain_status_change() {
        let cached = app("web");
        let mut incoming = app("web");
        incoming.status.health.status = HealthState::Degraded;
        let ev = event(WatchEventKind::Modified, incoming);
        assert_eq!(should_send_application_event(&ev, Some(&cached)), (true, false));
    }

    #[test]
    fn spec_change_fires() {
        let cached = app("web");
        let mut incoming = app("web");
        incoming.spec.project = "other".into();
        let ev = event(WatchEventKind::Modified, incoming);
        assert_eq!(should_send_application_event(&ev, Some(&cached)), (true, false));
    }

    #[test]
    fn operation_change_fires() {
        let cached = app("web");
        let mut incoming = app("web");
        incoming.operation = Some(Operation {
            sync: Some(SyncOperation { revision: "abc".into(), prune: false }),
            ..Operation::default()
        });
        let ev = event(WatchEventKind::Modified, incoming);
        assert_eq!(should_send_application_event(&ev, Some(&cached)), (true, false));
    }

    #[test]
    fn metadata_noise_is_suppressed() {
        let mut cached = app("web");
        cached.metadata.annotations = Some(BTreeMap::from([(
            LAST_APPLIED_CONFIG_ANNOTATION.to_string(),
            "old".to_string(),
        )]));
        cached.metadata.resource_version = Some("1".into());
        cached.metadata.generation = Some(1);
        cached.metadata.managed_fields =
            Some(vec![ManagedFieldsEntry { manager: Some("old".into()), ..Default::default() }]);

        let mut incoming = cached.clone();
        incoming.metadata.annotations = Some(BTreeMap::from([(
            LAST_APPLIED_CONFIG_ANNOTATION.to_string(),
            "new".to_string(),
        )]));
        incoming.metadata.resource_version = Some("2".into());
        incoming.metadata.generation = Some(2);
        incoming.metadata.generate_name = Some("web-".into());
        incoming.metadata.managed_fields =
            Some(vec![ManagedFieldsEntry { manager: Some("new".into()), ..Default::default() }]);

        let ev = event(WatchEventKind::Modified, incoming);
        assert_eq!(should_send_application_event(&ev, Some(&cached)), (false, false));
    }

    #[test]
    fn label_change_fires() {
        let cached = app("web");
        let mut incoming = app("web");
        incoming.metadata.labels =
            Some(BTreeMap::from([("team".to_string(), "infra".to_string())]));
        let ev = event(WatchEventKind::Modified, incoming);
        assert_eq!(should_send_application_event(&ev, Some(&cached)), (true, false));
    }

    #[test]
    fn metadata_is_ignored_for_added_events() {
        let cached = app("web");
        let mut incoming = app("web");
        incoming.metadata.labels =
            Some(BTreeMap::from([("team".to_string(), "infra".to_string())]));
        let ev = event(WatchEventKind::Added, incoming);
        assert_eq!(should_send_application_event(&ev, Some(&cached)), (false, false));
    }

    #[test]
    fn resource_event_dedup() {
        let rs = ResourceStatus {
            kind: "Deployment".into(),
            name: "web".into(),
            health: Some(HealthStatus { status: HealthState::Healthy, message: String::new() }),
            ..ResourceStatus::default()
        };
        assert!(should_send_resource_event(None, &rs));
        assert!(!should_send_resource_event(Some(&rs.clone()), &rs));

        let mut changed = rs.clone();
        changed.health = Some(HealthStatus { status: HealthState::Degraded, message: "x".into() });
        assert!(should_send_resource_event(Some(&rs), &changed));
    }
}
