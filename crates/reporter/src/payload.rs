//! Composition of outbound event payloads.

use anyhow::{Context, Result};

use manta_api::{
    ApplicationVersions, EventPayload, Manifest, ObjectSource, OutboundEvent, ResourceResponse,
    RevisionMetadata,
};
use manta_core::{Application, ApplicationTree, ResourceStatus, TrackingMetadata};

use crate::app_errors;

/// Revision metadata resolved for an application's sync revisions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppSyncRevisionsMetadata {
    pub sync_revisions: Vec<RevisionWithMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevisionWithMetadata {
    pub revision: String,
    pub metadata: Option<RevisionMetadata>,
}

impl AppSyncRevisionsMetadata {
    fn first_metadata(&self) -> Option<&RevisionMetadata> {
        self.sync_revisions.first().and_then(|r| r.metadata.as_ref())
    }
}

/// A resource together with everything resolved for it.
pub(crate) struct ReportedResource<'a> {
    pub rs: &'a ResourceStatus,
    pub actual_state: &'a ResourceResponse,
    pub desired_state: &'a Manifest,
    pub manifest_gen_err: bool,
    /// Present only when the resource is itself an application.
    pub rs_as_app: Option<ReportedResourceAsApp<'a>>,
}

pub(crate) struct ReportedResourceAsApp<'a> {
    pub app: &'a Application,
    /// Revision metadata of the child application itself.
    pub revisions_metadata: Option<&'a AppSyncRevisionsMetadata>,
    pub application_versions: Option<&'a ApplicationVersions>,
}

/// The application the resource is reported under.
pub(crate) struct ParentAppContext<'a> {
    pub app: &'a Application,
    pub tree: Option<&'a ApplicationTree>,
    pub revisions_metadata: Option<&'a AppSyncRevisionsMetadata>,
}

fn base_source(
    app: &Application,
    revisions_metadata: Option<&AppSyncRevisionsMetadata>,
    tracking: &TrackingMetadata,
) -> ObjectSource {
    let commit = revisions_metadata.and_then(|m| m.first_metadata());
    ObjectSource {
        repo_url: app.spec.source.as_ref().map(|s| s.repo_url.clone()).unwrap_or_default(),
        path: app.spec.source.as_ref().map(|s| s.path.clone()).unwrap_or_default(),
        revision: app.latest_revision().to_string(),
        operation_sync_revision: app.operation_sync_revision().unwrap_or_default().to_string(),
        history_id: app.latest_history_id(),
        app_name: app.name().to_string(),
        app_namespace: app.namespace().to_string(),
        app_uid: app.metadata.uid.clone().unwrap_or_default(),
        app_instance_label_key: tracking.app_instance_label_key.clone(),
        tracking_method: tracking.tracking_method.to_string(),
        sync_started_at: app.status.operation_state.as_ref().and_then(|os| os.started_at.clone()),
        sync_finished_at: app.status.operation_state.as_ref().and_then(|os| os.finished_at.clone()),
        commit_author: commit.map(|m| m.author.clone()).unwrap_or_default(),
        commit_date: commit.and_then(|m| m.date.clone()),
        commit_message: commit.map(|m| m.message.clone()).unwrap_or_default(),
        ..ObjectSource::default()
    }
}

/// Payload for one resource of an application (or a child application
/// represented as a resource of its parent).
pub(crate) fn resource_event_payload(
    started_at: &str,
    reported: &ReportedResource<'_>,
    parent: &ParentAppContext<'_>,
    tracking: &TrackingMetadata,
) -> Result<OutboundEvent> {
    let rs = reported.rs;

    let object: serde_json::Value = if !reported.actual_state.manifest.is_empty() {
        serde_json::from_str(&reported.actual_state.manifest)
            .context("parsing actual state manifest")?
    } else if !reported.desired_state.compiled_manifest.is_empty() {
        serde_json::from_str(&reported.desired_state.compiled_manifest)
            .context("parsing desired state manifest")?
    } else {
        // Neither live nor desired state: report the status summary itself.
        serde_json::to_value(rs).context("encoding resource status")?
    };

    let errors = match &reported.rs_as_app {
        Some(as_app) => {
            let mut errors = app_errors::parse_application_sync_result_errors_from_conditions(
                &as_app.app.status,
            );
            errors.extend(app_errors::parse_aggregative_health_errors_of_application(
                as_app.app,
                parent.tree,
            ));
            errors
        }
        None => {
            let mut errors = parent
                .app
                .status
                .operation_state
                .as_ref()
                .map(|os| app_errors::parse_resource_sync_result_errors(rs, os))
                .unwrap_or_default();
            errors.extend(app_errors::parse_aggregative_health_errors(rs, parent.tree, true));
            errors
        }
    };

    let mut source = base_source(parent.app, parent.revisions_metadata, tracking);
    // A child application's own commit information wins over the parent's.
    if let Some(commit) =
        reported.rs_as_app.as_ref().and_then(|a| a.revisions_metadata).and_then(|m| m.first_metadata())
    {
        source.commit_author = commit.author.clone();
        source.commit_date = commit.date.clone();
        source.commit_message = commit.message.clone();
    }
    source.desired_manifest = reported.desired_state.compiled_manifest.clone();
    source.git_manifest = reported.desired_state.raw_manifest.clone();
    source.actual_manifest = reported.actual_state.manifest.clone();
    source.sync_status = rs.status;
    source.health_status = rs.health.as_ref().map(|h| h.status);
    source.health_message = rs.health.as_ref().map(|h| h.message.clone()).unwrap_or_default();
    source.requires_pruning = rs.requires_pruning && !reported.manifest_gen_err;

    Ok(OutboundEvent {
        payload: EventPayload {
            timestamp: started_at.to_string(),
            object,
            source,
            errors,
            app_versions: reported
                .rs_as_app
                .as_ref()
                .and_then(|a| a.application_versions.cloned()),
        },
    })
}

/// Payload for the root application itself. Returns `None` when the record
/// has no operation state: nothing has ever been synced, so there is nothing
/// to report yet.
pub(crate) fn application_event_payload(
    app: &Application,
    tree: Option<&ApplicationTree>,
    started_at: &str,
    application_versions: Option<&ApplicationVersions>,
    tracking: &TrackingMetadata,
) -> Result<Option<OutboundEvent>> {
    if app.status.operation_state.is_none() {
        return Ok(None);
    }

    let mut app = app.clone();
    if app.is_empty_type_meta() {
        app.set_default_type_meta();
    }
    let object = serde_json::to_value(&app).context("encoding application")?;

    let mut errors = app_errors::parse_application_sync_result_errors_from_conditions(&app.status);
    errors.extend(app_errors::parse_aggregative_health_errors_of_application(&app, tree));

    // Commit metadata is a per-resource enrichment; the record event carries
    // none.
    let mut source = base_source(&app, None, tracking);
    source.sync_status = Some(app.status.sync.status);
    source.health_status = Some(app.status.health.status);
    source.health_message = app.status.health.message.clone();

    Ok(Some(OutboundEvent {
        payload: EventPayload {
            timestamp: started_at.to_string(),
            object,
            source,
            errors,
            app_versions: application_versions.cloned(),
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use manta_core::{OperationState, TrackingMethod};

    fn tracking() -> TrackingMetadata {
        TrackingMetadata {
            app_instance_label_key: "app.kubernetes.io/instance".into(),
            tracking_method: TrackingMethod::Annotation,
        }
    }

    fn app(name: &str) -> Application {
        let mut a = Application::default();
        a.metadata.name = Some(name.to_string());
        a.metadata.namespace = Some("default".to_string());
        a
    }

    #[test]
    fn application_without_operation_state_yields_nothing() {
        let ev = application_event_payload(&app("web"), None, "ts", None, &tracking()).unwrap();
        assert!(ev.is_none());
    }

    #[test]
    fn application_payload_carries_typed_object() {
        let mut a = app("web");
        a.status.operation_state = Some(OperationState::default());
        let ev = application_event_payload(&a, None, "ts", None, &tracking())
            .unwrap()
            .expect("payload");
        assert_eq!(ev.payload.timestamp, "ts");
        assert_eq!(ev.payload.object["kind"], "Application");
        assert_eq!(ev.payload.source.app_name, "web");
    }

    #[test]
    fn application_payload_carries_no_commit_metadata() {
        let mut a = app("web");
        a.status.operation_state = Some(OperationState::default());
        a.status.sync.revision = "rev-1".to_string();
        let ev = application_event_payload(&a, None, "ts", None, &tracking())
            .unwrap()
            .expect("payload");
        assert_eq!(ev.payload.source.revision, "rev-1");
        assert_eq!(ev.payload.source.commit_author, "");
        assert_eq!(ev.payload.source.commit_message, "");
        assert!(ev.payload.source.commit_date.is_none());
    }

    #[test]
    fn resource_payload_prefers_actual_state() {
        let rs = ResourceStatus {
            kind: "Deployment".into(),
            name: "web".into(),
            ..ResourceStatus::default()
        };
        let actual = ResourceResponse {
            manifest: r#"{"kind":"Deployment","metadata":{"name":"web"}}"#.into(),
        };
        let desired = Manifest {
            compiled_manifest: r#"{"kind":"Deployment","metadata":{"name":"other"}}"#.into(),
            ..Manifest::default()
        };
        let parent = app("root");
        let reported = ReportedResource {
            rs: &rs,
            actual_state: &actual,
            desired_state: &desired,
            manifest_gen_err: false,
            rs_as_app: None,
        };
        let ctx = ParentAppContext { app: &parent, tree: None, revisions_metadata: None };
        let ev = resource_event_payload("ts", &reported, &ctx, &tracking()).unwrap();
        assert_eq!(ev.payload.object["metadata"]["name"], "web");
        assert_eq!(ev.payload.source.actual_manifest, actual.manifest);
        assert_eq!(ev.payload.source.desired_manifest, desired.compiled_manifest);
    }

    #[test]
    fn pruning_suppressed_on_manifest_generation_error() {
        let rs = ResourceStatus {
            kind: "Deployment".into(),
            name: "web".into(),
            requires_pruning: true,
            ..ResourceStatus::default()
        };
        let actual = ResourceResponse::default();
        let desired = Manifest::default();
        let parent = app("root");
        let ctx = ParentAppContext { app: &parent, tree: None, revisions_metadata: None };

        let reported = ReportedResource {
            rs: &rs,
            actual_state: &actual,
            desired_state: &desired,
            manifest_gen_err: true,
            rs_as_app: None,
        };
        let ev = resource_event_payload("ts", &reported, &ctx, &tracking()).unwrap();
        assert!(!ev.payload.source.requires_pruning);

        let reported = ReportedResource {
            rs: &rs,
            actual_state: &actual,
            desired_state: &desired,
            manifest_gen_err: false,
            rs_as_app: None,
        };
        let ev = resource_event_payload("ts", &reported, &ctx, &tracking()).unwrap();
        assert!(ev.payload.source.requires_pruning);
    }
}
