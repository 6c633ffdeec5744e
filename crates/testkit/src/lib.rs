//! In-memory fakes of the manta capability traits, for tests.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use manta_api::{
    ApiError, AppQuery, AppServiceClient, ApplicationLister, DeliverySink, ManifestQuery,
    ManifestResponse, OutboundEvent, ResourceQuery, ResourceResponse, RevisionMetadata,
    RevisionMetadataQuery, ResourcesQuery, SettingsProvider,
};
use manta_core::{Application, ApplicationTree, TrackingMethod};

pub mod fixtures {
    use manta_core::{Application, HealthState, HealthStatus, ResourceStatus, SyncState};

    pub fn app(name: &str, namespace: &str) -> Application {
        let mut app = Application::default();
        app.metadata.name = Some(name.to_string());
        app.metadata.namespace = Some(namespace.to_string());
        app.metadata.uid = Some(format!("uid-{name}"));
        app.status.health.status = HealthState::Healthy;
        app.status.sync.status = SyncState::Synced;
        app
    }

    pub fn resource(kind: &str, name: &str, namespace: &str) -> ResourceStatus {
        let group = match kind {
            "Deployment" | "ReplicaSet" => "apps",
            "Rollout" => "rollouts.manta.dev",
            _ => "",
        };
        ResourceStatus {
            group: group.to_string(),
            version: "v1".to_string(),
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            status: Some(SyncState::Synced),
            health: Some(HealthStatus { status: HealthState::Healthy, message: String::new() }),
            ..ResourceStatus::default()
        }
    }
}

/// Scripted application RPC service. Responses are looked up by name; absent
/// entries fall back to permissive defaults so tests only script what they
/// assert on.
#[derive(Default)]
pub struct FakeAppService {
    apps: Mutex<HashMap<String, Application>>,
    trees: Mutex<HashMap<String, Result<ApplicationTree, ApiError>>>,
    manifests: Mutex<HashMap<String, Result<ManifestResponse, ApiError>>>,
    resources: Mutex<HashMap<String, Result<ResourceResponse, ApiError>>>,
    revision_metadata: Mutex<HashMap<String, Result<RevisionMetadata, ApiError>>>,
    resource_calls: Mutex<Vec<String>>,
}

impl FakeAppService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_app(&self, app: Application) {
        self.apps
            .lock()
            .unwrap()
            .insert(format!("{}/{}", app.namespace(), app.name()), app);
    }

    pub fn put_tree(&self, app_name: &str, tree: Result<ApplicationTree, ApiError>) {
        self.trees.lock().unwrap().insert(app_name.to_string(), tree);
    }

    /// Key is the application name, or `name@revision` for revision-pinned
    /// manifest queries.
    pub fn put_manifests(&self, key: &str, response: Result<ManifestResponse, ApiError>) {
        self.manifests.lock().unwrap().insert(key.to_string(), response);
    }

    pub fn put_resource(&self, resource_name: &str, response: Result<ResourceResponse, ApiError>) {
        self.resources.lock().unwrap().insert(resource_name.to_string(), response);
    }

    pub fn put_revision_metadata(
        &self,
        revision: &str,
        response: Result<RevisionMetadata, ApiError>,
    ) {
        self.revision_metadata.lock().unwrap().insert(revision.to_string(), response);
    }

    /// Resource names passed to `get_resource`, in call order.
    pub fn resource_calls(&self) -> Vec<String> {
        self.resource_calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AppServiceClient for FakeAppService {
    async fn get(&self, query: &AppQuery) -> Result<Application, ApiError> {
        self.apps
            .lock()
            .unwrap()
            .get(&format!("{}/{}", query.namespace, query.name))
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("application {} not found", query.name)))
    }

    async fn resource_tree(&self, query: &ResourcesQuery) -> Result<ApplicationTree, ApiError> {
        self.trees
            .lock()
            .unwrap()
            .get(&query.application_name)
            .cloned()
            .unwrap_or_else(|| Ok(ApplicationTree::default()))
    }

    async fn get_manifests(&self, query: &ManifestQuery) -> Result<ManifestResponse, ApiError> {
        let manifests = self.manifests.lock().unwrap();
        if let Some(revision) = &query.revision {
            if let Some(response) = manifests.get(&format!("{}@{revision}", query.name)) {
                return response.clone();
            }
        }
        manifests
            .get(&query.name)
            .cloned()
            .unwrap_or_else(|| Ok(ManifestResponse::default()))
    }

    async fn get_resource(&self, query: &ResourceQuery) -> Result<ResourceResponse, ApiError> {
        self.resource_calls.lock().unwrap().push(query.resource_name.clone());
        self.resources
            .lock()
            .unwrap()
            .get(&query.resource_name)
            .cloned()
            .unwrap_or_else(|| {
                Ok(ResourceResponse {
                    manifest: format!(
                        r#"{{"apiVersion":"v1","kind":"{}","metadata":{{"name":"{}","namespace":"{}"}}}}"#,
                        query.kind, query.resource_name, query.resource_namespace
                    ),
                })
            })
    }

    async fn revision_metadata(
        &self,
        query: &RevisionMetadataQuery,
    ) -> Result<RevisionMetadata, ApiError> {
        self.revision_metadata
            .lock()
            .unwrap()
            .get(&query.revision)
            .cloned()
            .unwrap_or_else(|| Ok(RevisionMetadata::default()))
    }
}

/// Delivery sink that records every event and can be scripted to fail for
/// specific delivery keys.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, OutboundEvent)>>,
    failures: Mutex<HashMap<String, ApiError>>,
    call_failures: Mutex<HashMap<usize, ApiError>>,
    calls: Mutex<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, app_name: &str, error: ApiError) {
        self.failures.lock().unwrap().insert(app_name.to_string(), error);
    }

    /// Fail the nth `send_event` call (0-based), regardless of key.
    pub fn fail_nth(&self, n: usize, error: ApiError) {
        self.call_failures.lock().unwrap().insert(n, error);
    }

    pub fn sent(&self) -> Vec<(String, OutboundEvent)> {
        self.events.lock().unwrap().clone()
    }

    pub fn sent_keys(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }
}

#[async_trait::async_trait]
impl DeliverySink for RecordingSink {
    async fn send_event(&self, app_name: &str, event: &OutboundEvent) -> Result<(), ApiError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let current = *calls;
            *calls += 1;
            current
        };
        if let Some(err) = self.call_failures.lock().unwrap().get(&call) {
            return Err(err.clone());
        }
        if let Some(err) = self.failures.lock().unwrap().get(app_name) {
            return Err(err.clone());
        }
        self.events.lock().unwrap().push((app_name.to_string(), event.clone()));
        Ok(())
    }
}

/// Static local view of application records.
#[derive(Default)]
pub struct StaticLister {
    apps: Mutex<HashMap<String, Application>>,
}

impl StaticLister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, app: Application) {
        self.apps
            .lock()
            .unwrap()
            .insert(format!("{}/{}", app.namespace(), app.name()), app);
    }
}

impl ApplicationLister for StaticLister {
    fn get(&self, namespace: &str, name: &str) -> Option<Application> {
        self.apps.lock().unwrap().get(&format!("{namespace}/{name}")).cloned()
    }
}

/// Fixed settings.
pub struct StaticSettings {
    pub label_key: String,
    pub method: TrackingMethod,
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self { label_key: "app.kubernetes.io/instance".to_string(), method: TrackingMethod::Annotation }
    }
}

impl SettingsProvider for StaticSettings {
    fn app_instance_label_key(&self) -> String {
        self.label_key.clone()
    }

    fn tracking_method(&self) -> TrackingMethod {
        self.method
    }
}
