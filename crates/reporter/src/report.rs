//! Per-application event streaming: resolve desired and actual state for the
//! application and each of its resources, compose payloads, deliver them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use kube::core::DynamicObject;
use tracing::{debug, info, warn};

use manta_api::{
    ApiError, AppQuery, AppServiceClient, ApplicationLister, ApplicationVersions, DeliverySink,
    Manifest, ManifestQuery, ManifestResponse, ResourceQuery, ResourceResponse,
    RevisionMetadataQuery, ResourcesQuery,
};
use manta_cache::EventCache;
use manta_core::{
    app_as_resource, parent_app_identity, Application, ApplicationTree, ApplicationWatchEvent,
    ResourceStatus, TrackingMetadata,
};

use crate::decision;
use crate::metrics::{self, ErrorKind, EventType};
use crate::payload::{
    self, AppSyncRevisionsMetadata, ParentAppContext, ReportedResource, ReportedResourceAsApp,
    RevisionWithMetadata,
};

const ROLLOUT_KIND: &str = "Rollout";
const SECRET_KIND: &str = "Secret";

pub struct ApplicationEventReporter {
    cache: EventCache,
    app_service: Arc<dyn AppServiceClient>,
    app_lister: Arc<dyn ApplicationLister>,
    sink: Arc<dyn DeliverySink>,
    resource_event_ttl: Duration,
}

struct ProcessArgs<'a> {
    rs: &'a ResourceStatus,
    started_at: &'a str,
    desired_manifests: &'a ManifestResponse,
    manifest_gen_err: bool,
    /// The child application record, set only when the resource is an app.
    original_app: Option<&'a Application>,
    app_versions: Option<&'a ApplicationVersions>,
    parent_app: &'a Application,
    parent_tree: Option<&'a ApplicationTree>,
    parent_revisions_metadata: Option<&'a AppSyncRevisionsMetadata>,
    tracking: &'a TrackingMetadata,
}

impl ApplicationEventReporter {
    pub fn new(
        cache: EventCache,
        app_service: Arc<dyn AppServiceClient>,
        app_lister: Arc<dyn ApplicationLister>,
        sink: Arc<dyn DeliverySink>,
        resource_event_ttl: Duration,
    ) -> Self {
        Self { cache, app_service, app_lister, sink, resource_event_ttl }
    }

    /// Decide whether a watch event is worth processing. The cache is
    /// best-effort: a failed read counts as a miss and the event is sent.
    pub fn should_send_application_event(&self, event: &ApplicationWatchEvent) -> (bool, bool) {
        let cached = match self.cache.get_last_application_event(&event.application) {
            Ok(cached) => cached,
            Err(err) => {
                debug!(app = %event.application.name(), error = %err, "cache read failed, treating as miss");
                None
            }
        };
        decision::should_send_application_event(event, cached.as_ref())
    }

    fn should_send_resource_event(&self, app: &Application, rs: &ResourceStatus) -> bool {
        let cached = self
            .cache
            .get_last_resource_event(app, rs, app.latest_revision())
            .unwrap_or_else(|err| {
                debug!(app = %app.name(), error = %err, "resource cache read failed, treating as miss");
                None
            });
        let send = decision::should_send_resource_event(cached.as_ref(), rs);
        if !send {
            debug!(
                app = %app.name(),
                gvk = %rs.gvk_key(),
                resource = format!("{}/{}", rs.namespace, rs.name),
                "resource status not changed"
            );
        }
        send
    }

    /// Walk the application and stream one event per changed entity.
    pub async fn stream_application_events(
        &self,
        app: &Application,
        started_at: &str,
        ignore_resource_cache: bool,
        tracking: &TrackingMetadata,
    ) -> Result<()> {
        let timer = Instant::now();
        info!(app = %app.name(), ignore_resource_cache, "streaming application events");

        let tree = match self
            .app_service
            .resource_tree(&ResourcesQuery {
                application_name: app.name().to_string(),
                namespace: app.namespace().to_string(),
                project: app.spec.project().to_string(),
            })
            .await
        {
            Ok(tree) => Some(tree),
            Err(err) if err.is_deadline_exceeded() => {
                return Err(anyhow::Error::new(err).context("failed to get application tree"));
            }
            Err(err) => {
                // A broken application manifest still deserves reporting; its
                // errors are visible even without a resource tree.
                warn!(app = %app.name(), error = %err, "failed to get application tree, resuming");
                None
            }
        };

        debug!(app = %app.name(), "getting desired manifests");
        let (desired_manifests, manifest_gen_err) = self.get_desired_manifests(app, None).await;

        let app_versions = self.resolve_application_versions(app).await;

        let parent_identity =
            parent_app_identity(app, &tracking.app_instance_label_key, tracking.tracking_method);

        if parent_identity.is_child_app() {
            info!(app = %app.name(), parent = %parent_identity.name, "processing as child application");
            let parent_namespace = if parent_identity.namespace.is_empty() {
                app.namespace()
            } else {
                &parent_identity.namespace
            };
            let parent = self
                .app_service
                .get(&AppQuery {
                    name: parent_identity.name.clone(),
                    namespace: parent_namespace.to_string(),
                })
                .await
                .context("failed to get parent application entity")?;

            let mut rs = app_as_resource(app);
            rs.set_health_status_if_missing();

            let (parent_desired, parent_manifest_gen_err) =
                self.get_desired_manifests(&parent, None).await;

            let parent_revisions_metadata =
                match self.get_application_revisions_metadata(&parent).await {
                    Ok(metadata) => Some(metadata),
                    Err(err) => {
                        warn!(app = %app.name(), error = %err, "failed to get parent application's revision metadata, resuming");
                        None
                    }
                };

            let processed = self
                .process_resource(ProcessArgs {
                    rs: &rs,
                    started_at,
                    desired_manifests: &parent_desired,
                    manifest_gen_err: parent_manifest_gen_err,
                    original_app: Some(app),
                    app_versions: app_versions.as_ref(),
                    parent_app: &parent,
                    parent_tree: tree.as_ref(),
                    parent_revisions_metadata: parent_revisions_metadata.as_ref(),
                    tracking,
                })
                .await;
            if let Err(err) = processed {
                metrics::inc_errored(EventType::ChildApp, ErrorKind::Unknown, app.name());
                return Err(err);
            }
            metrics::observe_processing_duration(app.name(), EventType::ChildApp, timer.elapsed());
        } else {
            info!(app = %app.name(), "processing as root application");
            let event = match payload::application_event_payload(
                app,
                tree.as_ref(),
                started_at,
                app_versions.as_ref(),
                tracking,
            ) {
                Ok(event) => event,
                Err(err) => {
                    metrics::inc_errored(EventType::ParentApp, ErrorKind::GetPayload, app.name());
                    return Err(err.context("failed to get application event payload"));
                }
            };

            let Some(event) = event else {
                // No operation state: nothing was ever synced, skip all events.
                return Ok(());
            };

            info!(
                app = %app.name(),
                health = ?app.status.health.status,
                sync = ?app.status.sync.status,
                "sending root application event"
            );
            if let Err(err) = self.sink.send_event(app.name(), &event).await {
                metrics::inc_errored(EventType::ParentApp, ErrorKind::Delivery, app.name());
                return Err(anyhow::Error::new(err).context(format!(
                    "failed to send event for root application {}/{}",
                    app.namespace(),
                    app.name()
                )));
            }
            metrics::observe_processing_duration(app.name(), EventType::ParentApp, timer.elapsed());
        }

        let revisions_metadata = self.get_application_revisions_metadata(app).await.ok();

        for rs in &app.status.resources {
            if rs.is_app() {
                continue;
            }
            let mut rs = rs.clone();
            rs.set_health_status_if_missing();
            if !ignore_resource_cache && !self.should_send_resource_event(app, &rs) {
                metrics::inc_cached_ignored(EventType::Resource, app.name());
                continue;
            }
            let processed = self
                .process_resource(ProcessArgs {
                    rs: &rs,
                    started_at,
                    desired_manifests: &desired_manifests,
                    manifest_gen_err,
                    original_app: None,
                    app_versions: None,
                    parent_app: app,
                    parent_tree: tree.as_ref(),
                    parent_revisions_metadata: revisions_metadata.as_ref(),
                    tracking,
                })
                .await;
            if let Err(err) = processed {
                metrics::inc_errored(EventType::Resource, ErrorKind::Unknown, app.name());
                return Err(err);
            }
        }
        Ok(())
    }

    /// Desired-state manifests; a failure degrades to an empty manifest list
    /// so the actual state is still reported (the flag suppresses pruning).
    async fn get_desired_manifests(
        &self,
        app: &Application,
        revision: Option<&str>,
    ) -> (ManifestResponse, bool) {
        let query = ManifestQuery {
            name: app.name().to_string(),
            namespace: app.namespace().to_string(),
            project: app.spec.project().to_string(),
            revision: revision.map(str::to_string),
        };
        match self.app_service.get_manifests(&query).await {
            Ok(response) => (response, false),
            Err(err) => {
                warn!(app = %app.name(), error = %err, "failed to get application desired state manifests, reporting actual state only");
                (ManifestResponse::default(), true)
            }
        }
    }

    /// Versions block rendered at the revision of the recorded operation.
    async fn resolve_application_versions(&self, app: &Application) -> Option<ApplicationVersions> {
        let revision = app.operation_state_revision()?.to_string();
        let (response, _) = self.get_desired_manifests(app, Some(&revision)).await;
        response.application_versions
    }

    async fn get_application_revisions_metadata(
        &self,
        app: &Application,
    ) -> Result<AppSyncRevisionsMetadata, ApiError> {
        let mut revisions = app.status.sync.revisions.clone();
        if revisions.is_empty() && !app.status.sync.revision.is_empty() {
            revisions.push(app.status.sync.revision.clone());
        }

        let mut sync_revisions = Vec::with_capacity(revisions.len());
        for revision in revisions {
            let metadata = self
                .app_service
                .revision_metadata(&RevisionMetadataQuery {
                    app_name: app.name().to_string(),
                    app_namespace: app.namespace().to_string(),
                    project: app.spec.project().to_string(),
                    revision: revision.clone(),
                })
                .await?;
            sync_revisions.push(RevisionWithMetadata { revision, metadata: Some(metadata) });
        }
        Ok(AppSyncRevisionsMetadata { sync_revisions })
    }

    async fn process_resource(&self, args: ProcessArgs<'_>) -> Result<()> {
        let rs = args.rs;
        let event_type = if rs.is_app() { EventType::ChildApp } else { EventType::Resource };

        let desired_state = resolve_resource_desired_state(rs, args.desired_manifests);

        let Some(actual_state) = self
            .resource_actual_state(rs, args.parent_app, args.original_app, event_type)
            .await?
        else {
            return Ok(());
        };

        let (parent_app, refreshed_metadata) =
            self.app_for_resource_reporting(rs, args.parent_app).await;
        let revisions_metadata =
            refreshed_metadata.as_ref().or(args.parent_revisions_metadata);

        let original_revisions_metadata = match args.original_app {
            Some(original) => self.get_application_revisions_metadata(original).await.ok(),
            None => None,
        };

        let reported = ReportedResource {
            rs,
            actual_state: &actual_state,
            desired_state: &desired_state,
            manifest_gen_err: args.manifest_gen_err,
            rs_as_app: args.original_app.map(|app| ReportedResourceAsApp {
                app,
                revisions_metadata: original_revisions_metadata.as_ref(),
                application_versions: args.app_versions,
            }),
        };
        let parent_ctx = ParentAppContext {
            app: &parent_app,
            tree: args.parent_tree,
            revisions_metadata,
        };

        let event =
            match payload::resource_event_payload(args.started_at, &reported, &parent_ctx, args.tracking)
            {
                Ok(event) => event,
                Err(err) => {
                    metrics::inc_errored(event_type, ErrorKind::GetPayload, parent_app.name());
                    warn!(
                        app = %parent_app.name(),
                        gvk = %rs.gvk_key(),
                        resource = format!("{}/{}", rs.namespace, rs.name),
                        error = %err,
                        "failed to get event payload, resuming"
                    );
                    return Ok(());
                }
            };

        // An application manifest is delivered under the inner app's own name;
        // everything else goes under the parent.
        let mut delivery_key = parent_app.name().to_string();
        if rs.is_app() {
            if let Ok(inner) = serde_json::from_str::<Application>(&actual_state.manifest) {
                delivery_key = inner.name().to_string();
            }
        }

        info!(
            app = %delivery_key,
            gvk = %rs.gvk_key(),
            resource = format!("{}/{}", rs.namespace, rs.name),
            "streaming resource event"
        );
        if let Err(err) = self.sink.send_event(&delivery_key, &event).await {
            if err.is_deadline_exceeded() {
                return Err(anyhow::Error::new(err).context("failed to send resource event"));
            }
            metrics::inc_errored(event_type, ErrorKind::Delivery, &delivery_key);
            warn!(app = %delivery_key, error = %err, "failed to send resource event, resuming");
            return Ok(());
        }

        let revision = parent_app.latest_revision().to_string();
        if let Err(err) =
            self.cache.set_last_resource_event(&parent_app, rs, self.resource_event_ttl, &revision)
        {
            warn!(app = %parent_app.name(), error = %err, "failed to cache resource event");
        }

        Ok(())
    }

    /// Live state of one resource. A child application is its own source of
    /// truth; everything else is fetched. "Not found" means deleted and
    /// yields an empty manifest; only a deadline abort is fatal.
    async fn resource_actual_state(
        &self,
        rs: &ResourceStatus,
        parent: &Application,
        child: Option<&Application>,
        event_type: EventType,
    ) -> Result<Option<ResourceResponse>> {
        if rs.is_app() {
            if let Some(child) = child {
                let mut child = child.clone();
                if child.is_empty_type_meta() {
                    child.set_default_type_meta();
                }
                if let Ok(manifest) = serde_json::to_string(&child) {
                    return Ok(Some(ResourceResponse { manifest }));
                }
            }
        }

        let query = ResourceQuery {
            app_name: parent.name().to_string(),
            app_namespace: parent.namespace().to_string(),
            project: parent.spec.project().to_string(),
            resource_namespace: rs.namespace.clone(),
            resource_name: rs.name.clone(),
            group: rs.group.clone(),
            version: rs.version.clone(),
            kind: rs.kind.clone(),
        };
        match self.app_service.get_resource(&query).await {
            Ok(response) => Ok(Some(response)),
            Err(err) if err.is_not_found() => Ok(Some(ResourceResponse::default())),
            Err(err) if err.is_deadline_exceeded() => {
                Err(anyhow::Error::new(err).context("failed to get actual state"))
            }
            Err(err) => {
                metrics::inc_errored(event_type, ErrorKind::Unknown, parent.name());
                warn!(
                    app = %parent.name(),
                    gvk = %rs.gvk_key(),
                    error = %err,
                    "failed to get actual state, resuming"
                );
                Ok(None)
            }
        }
    }

    /// For rollouts the reported operation sync revision must be the freshest
    /// observable value, so the snapshot is refreshed through the lister.
    async fn app_for_resource_reporting(
        &self,
        rs: &ResourceStatus,
        app: &Application,
    ) -> (Application, Option<AppSyncRevisionsMetadata>) {
        if rs.kind != ROLLOUT_KIND {
            return (app.clone(), None);
        }
        let Some(latest) = self.app_lister.get(app.namespace(), app.name()) else {
            return (app.clone(), None);
        };
        match self.get_application_revisions_metadata(&latest).await {
            Ok(metadata) => (latest, Some(metadata)),
            Err(_) => (app.clone(), None),
        }
    }
}

/// Find the manifest rendered for `rs` by linear search. A missing match
/// yields an empty manifest: the object was deleted from the source repo.
fn resolve_resource_desired_state(rs: &ResourceStatus, manifests: &ManifestResponse) -> Manifest {
    for manifest in &manifests.manifests {
        let object: DynamicObject = match serde_json::from_str(&manifest.compiled_manifest) {
            Ok(object) => object,
            Err(err) => {
                warn!(error = %err, "failed to parse compiled manifest");
                continue;
            }
        };

        let (group, version) = object
            .types
            .as_ref()
            .map(|t| split_api_version(&t.api_version))
            .unwrap_or_default();
        let kind = object.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default();
        let name = object.metadata.name.as_deref().unwrap_or_default();
        let namespace = object
            .metadata
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(&rs.namespace);

        if group == rs.group
            && version == rs.version
            && kind == rs.kind
            && name == rs.name
            && namespace == rs.namespace
        {
            let mut manifest = manifest.clone();
            if rs.kind == SECRET_KIND && rs.version == "v1" {
                // Secrets bypass normalisation; the raw manifest must carry
                // the rendered content.
                manifest.raw_manifest = manifest.compiled_manifest.clone();
            }
            return manifest;
        }
    }
    Manifest::default()
}

fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(json: &str) -> Manifest {
        Manifest {
            compiled_manifest: json.to_string(),
            raw_manifest: "raw".to_string(),
            path: String::new(),
        }
    }

    fn deployment_rs() -> ResourceStatus {
        ResourceStatus {
            group: "apps".into(),
            version: "v1".into(),
            kind: "Deployment".into(),
            namespace: "prod".into(),
            name: "web".into(),
            ..ResourceStatus::default()
        }
    }

    #[test]
    fn desired_state_matches_on_gvk_name_namespace() {
        let manifests = ManifestResponse {
            manifests: vec![
                manifest(r#"{"apiVersion":"apps/v1","kind":"Deployment","metadata":{"name":"api","namespace":"prod"}}"#),
                manifest(r#"{"apiVersion":"apps/v1","kind":"Deployment","metadata":{"name":"web","namespace":"prod"}}"#),
            ],
            ..ManifestResponse::default()
        };
        let found = resolve_resource_desired_state(&deployment_rs(), &manifests);
        assert!(found.compiled_manifest.contains("\"web\""));
    }

    #[test]
    fn desired_state_falls_back_to_resource_namespace() {
        let manifests = ManifestResponse {
            manifests: vec![manifest(
                r#"{"apiVersion":"apps/v1","kind":"Deployment","metadata":{"name":"web"}}"#,
            )],
            ..ManifestResponse::default()
        };
        let found = resolve_resource_desired_state(&deployment_rs(), &manifests);
        assert!(!found.compiled_manifest.is_empty());
    }

    #[test]
    fn missing_desired_state_yields_empty_manifest() {
        let manifests = ManifestResponse::default();
        let found = resolve_resource_desired_state(&deployment_rs(), &manifests);
        assert_eq!(found, Manifest::default());
    }

    #[test]
    fn secret_raw_manifest_mirrors_compiled() {
        let rs = ResourceStatus {
            group: String::new(),
            version: "v1".into(),
            kind: "Secret".into(),
            namespace: "prod".into(),
            name: "creds".into(),
            ..ResourceStatus::default()
        };
        let compiled = r#"{"apiVersion":"v1","kind":"Secret","metadata":{"name":"creds","namespace":"prod"}}"#;
        let manifests = ManifestResponse {
            manifests: vec![manifest(compiled)],
            ..ManifestResponse::default()
        };
        let found = resolve_resource_desired_state(&rs, &manifests);
        assert_eq!(found.raw_manifest, found.compiled_manifest);
        assert_eq!(found.compiled_manifest, compiled);
    }

    #[test]
    fn unparseable_manifest_is_skipped() {
        let manifests = ManifestResponse {
            manifests: vec![
                manifest("not json"),
                manifest(r#"{"apiVersion":"apps/v1","kind":"Deployment","metadata":{"name":"web","namespace":"prod"}}"#),
            ],
            ..ManifestResponse::default()
        };
        let found = resolve_resource_desired_state(&deployment_rs(), &manifests);
        assert!(!found.compiled_manifest.is_empty());
    }
}
