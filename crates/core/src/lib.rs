//! Manta core types: application records, watch events, resource trees.

#![forbid(unsafe_code)]

pub mod app;
pub mod tracking;
pub mod tree;

pub use app::{
    Application, ApplicationCondition, ApplicationDestination, ApplicationSource, ApplicationSpec,
    ApplicationStatus, HealthState, HealthStatus, Operation, OperationInitiator, OperationPhase,
    OperationState, ResourceResult, ResourceStatus, ResultCode, RevisionHistory, SyncOperation,
    SyncOperationResult, SyncPhase, SyncState, SyncStatus,
};
pub use tracking::{
    app_as_resource, parent_app_identity, AppIdentity, TrackingMetadata, TrackingMethod,
};
pub use tree::{ApplicationTree, ResourceNode, ResourceRef};

use serde::{Deserialize, Serialize};

/// API group of the Application custom resource.
pub const GROUP: &str = "manta.dev";
/// API version of the Application custom resource.
pub const VERSION: &str = "v1alpha1";
/// Kind of the Application custom resource.
pub const APPLICATION_KIND: &str = "Application";

/// Annotation carrying the identity of the application that manages an object.
/// Value format: `instance:group/kind:namespace/name`.
pub const TRACKING_ANNOTATION: &str = "manta.dev/tracking-id";

/// Watch notification kinds, mirroring the upstream watch protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WatchEventKind {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
}

/// A raw watch notification paired with the application snapshot it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationWatchEvent {
    #[serde(rename = "type")]
    pub kind: WatchEventKind,
    pub application: Application,
}

impl ApplicationWatchEvent {
    pub fn new(kind: WatchEventKind, application: Application) -> Self {
        Self { kind, application }
    }
}
