//! The Application record and its spec/status/operation blocks.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::core::TypeMeta;
use serde::{Deserialize, Serialize};

use crate::{APPLICATION_KIND, GROUP, VERSION};

/// Declarative description of a deployed workload plus its observed status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    #[serde(flatten)]
    pub types: Option<TypeMeta>,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ApplicationSpec,
    #[serde(default)]
    pub status: ApplicationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
}

impl Application {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// `namespace/name`, the identity used for cache keys and limiter keys.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace(), self.name())
    }

    pub fn is_empty_type_meta(&self) -> bool {
        match &self.types {
            None => true,
            Some(t) => t.api_version.is_empty() || t.kind.is_empty(),
        }
    }

    pub fn set_default_type_meta(&mut self) {
        self.types = Some(TypeMeta {
            api_version: format!("{GROUP}/{VERSION}"),
            kind: APPLICATION_KIND.to_string(),
        });
    }

    /// The revision the event refers to: `status.sync.revisions[0]` when the
    /// sources are multi-revision, `status.sync.revision` otherwise.
    pub fn latest_revision(&self) -> &str {
        self.status
            .sync
            .revisions
            .first()
            .map(String::as_str)
            .unwrap_or(&self.status.sync.revision)
    }

    /// Revision recorded on the last (or in-flight) operation state, if any.
    pub fn operation_state_revision(&self) -> Option<&str> {
        self.status
            .operation_state
            .as_ref()
            .and_then(|os| os.operation.sync.as_ref())
            .map(|s| s.revision.as_str())
    }

    /// Revision of the running operation, preferring the in-flight `operation`
    /// block over the recorded operation state.
    pub fn operation_sync_revision(&self) -> Option<&str> {
        self.operation
            .as_ref()
            .and_then(|op| op.sync.as_ref())
            .map(|s| s.revision.as_str())
            .or_else(|| self.operation_state_revision())
    }

    pub fn latest_history_id(&self) -> Option<i64> {
        self.status.history.iter().map(|h| h.id).max()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Raw project field; may be empty on records that rely on the default
    /// project. Use [`ApplicationSpec::project`] outside of diffing.
    #[serde(default)]
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ApplicationSource>,
    #[serde(default)]
    pub destination: ApplicationDestination,
}

impl ApplicationSpec {
    /// Project with the implicit default substituted.
    pub fn project(&self) -> &str {
        if self.project.is_empty() {
            "default"
        } else {
            &self.project
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    #[serde(default, rename = "repoURL")]
    pub repo_url: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_revision: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chart: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDestination {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default)]
    pub health: HealthStatus,
    #[serde(default)]
    pub sync: SyncStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ApplicationCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconciled_at: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_state: Option<OperationState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<RevisionHistory>,
}

/// Aggregate or per-resource health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Progressing,
    Degraded,
    Suspended,
    Missing,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    #[serde(default)]
    pub status: HealthState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self { status: HealthState::Healthy, message: String::new() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    Synced,
    OutOfSync,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    #[serde(default)]
    pub status: SyncState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revisions: Vec<String>,
}

/// Per-managed-object summary attached to an application's status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SyncState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthStatus>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hook: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_pruning: bool,
}

impl ResourceStatus {
    /// `group/version/kind`, used in logs and cache keys.
    pub fn gvk_key(&self) -> String {
        format!("{}/{}/{}", self.group, self.version, self.kind)
    }

    /// True when the resource is itself an application entity.
    pub fn is_app(&self) -> bool {
        self.group == GROUP && self.kind == APPLICATION_KIND
    }

    /// Health may be omitted by the reconciler; the pipeline treats a missing
    /// health block as healthy.
    pub fn set_health_status_if_missing(&mut self) {
        if self.health.is_none() {
            self.health = Some(HealthStatus::healthy());
        }
    }
}

/// Structured status condition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
}

impl ApplicationCondition {
    pub const DELETION_ERROR: &'static str = "DeletionError";
    pub const INVALID_SPEC_ERROR: &'static str = "InvalidSpecError";
    pub const COMPARISON_ERROR: &'static str = "ComparisonError";
    pub const SYNC_ERROR: &'static str = "SyncError";
    pub const UNKNOWN_ERROR: &'static str = "UnknownError";
    pub const SHARED_RESOURCE_WARNING: &'static str = "SharedResourceWarning";
    pub const REPEATED_RESOURCE_WARNING: &'static str = "RepeatedResourceWarning";
    pub const EXCLUDED_RESOURCE_WARNING: &'static str = "ExcludedResourceWarning";
    pub const ORPHANED_RESOURCE_WARNING: &'static str = "OrphanedResourceWarning";

    pub fn is_error(&self) -> bool {
        self.condition_type.ends_with("Error")
    }
}

/// A requested or in-flight operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiated_by: Option<OperationInitiator>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    #[serde(default)]
    pub revision: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub prune: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationInitiator {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub automated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationPhase {
    #[default]
    Running,
    Succeeded,
    Failed,
    Error,
    Terminating,
}

impl OperationPhase {
    pub fn is_failure(&self) -> bool {
        matches!(self, OperationPhase::Failed | OperationPhase::Error)
    }
}

/// State of the last (or in-flight) operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationState {
    #[serde(default)]
    pub phase: OperationPhase,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_result: Option<SyncOperationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Time>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperationResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceResult>,
    #[serde(default)]
    pub revision: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revisions: Vec<String>,
}

/// Outcome of an operation on a single resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceResult {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ResultCode>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_phase: Option<OperationPhase>,
    #[serde(default)]
    pub sync_phase: SyncPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultCode {
    Synced,
    SyncFailed,
    Pruned,
    PruneSkipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    PreSync,
    #[default]
    Sync,
    PostSync,
    SyncFail,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionHistory {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub revision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<Time>,
}
