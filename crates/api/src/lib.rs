//! Manta external capability surface.
//!
//! This crate defines the traits and transport types the pipeline depends on:
//! the application RPC service, the delivery sink, the local application
//! lister, the settings provider, and the watch-source callback capability.
//! Implementations live elsewhere (gRPC, HTTP, in-memory fakes).

#![forbid(unsafe_code)]

pub mod event;

pub use event::{EventPayload, ObjectError, ObjectSource, OutboundEvent};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::{Deserialize, Serialize};

use manta_core::{Application, ApplicationTree, TrackingMethod};

/// Errors crossing the RPC and delivery boundaries.
///
/// Transport implementations should map their failures onto the typed
/// variants; the substring fallbacks in [`ApiError::is_deadline_exceeded`] and
/// [`ApiError::is_not_found`] exist for transports that only surface opaque
/// message strings.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("context deadline exceeded")]
    DeadlineExceeded,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn is_deadline_exceeded(&self) -> bool {
        match self {
            Self::DeadlineExceeded => true,
            Self::Transport(msg) | Self::Internal(msg) => {
                msg.contains("context deadline exceeded")
            }
            Self::NotFound(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Transport(msg) | Self::Internal(msg) => msg.contains("not found"),
            Self::DeadlineExceeded => false,
        }
    }
}

/// True when any error in the chain is a deadline-exceeded, typed or textual.
pub fn is_deadline_exceeded(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(api) = cause.downcast_ref::<ApiError>() {
            return api.is_deadline_exceeded();
        }
    }
    format!("{err:#}").contains("context deadline exceeded")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppQuery {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcesQuery {
    pub application_name: String,
    pub namespace: String,
    pub project: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestQuery {
    pub name: String,
    pub namespace: String,
    pub project: String,
    /// When absent the service renders at the current latest revision.
    pub revision: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceQuery {
    pub app_name: String,
    pub app_namespace: String,
    pub project: String,
    pub resource_namespace: String,
    pub resource_name: String,
    pub group: String,
    pub version: String,
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionMetadataQuery {
    pub app_name: String,
    pub app_namespace: String,
    pub project: String,
    pub revision: String,
}

/// One rendered manifest. `compiled_manifest` is the fully rendered object;
/// `raw_manifest` is the object as it appears in the source repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub compiled_manifest: String,
    #[serde(default)]
    pub raw_manifest: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationVersions {
    #[serde(default)]
    pub app_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestResponse {
    #[serde(default)]
    pub manifests: Vec<Manifest>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_versions: Option<ApplicationVersions>,
}

/// Live state of a single resource, serialized as a manifest string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceResponse {
    #[serde(default)]
    pub manifest: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionMetadata {
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<Time>,
    #[serde(default)]
    pub message: String,
}

/// The application RPC service consumed by the reporter.
#[async_trait::async_trait]
pub trait AppServiceClient: Send + Sync {
    async fn get(&self, query: &AppQuery) -> Result<Application, ApiError>;
    async fn resource_tree(&self, query: &ResourcesQuery) -> Result<ApplicationTree, ApiError>;
    async fn get_manifests(&self, query: &ManifestQuery) -> Result<ManifestResponse, ApiError>;
    async fn get_resource(&self, query: &ResourceQuery) -> Result<ResourceResponse, ApiError>;
    async fn revision_metadata(
        &self,
        query: &RevisionMetadataQuery,
    ) -> Result<RevisionMetadata, ApiError>;
}

/// Downstream delivery of derived events, keyed by application name.
#[async_trait::async_trait]
pub trait DeliverySink: Send + Sync {
    async fn send_event(&self, app_name: &str, event: &OutboundEvent) -> Result<(), ApiError>;
}

/// Local cached read-only view of application records.
pub trait ApplicationLister: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Option<Application>;
}

/// Process-wide settings resolved per event.
pub trait SettingsProvider: Send + Sync {
    fn app_instance_label_key(&self) -> String;
    fn tracking_method(&self) -> TrackingMethod;
}

/// Callback capability the watch source drives. Callbacks are synchronous and
/// must return promptly; implementations may not block.
pub trait WatchEventHandler: Send + Sync {
    fn on_add(&self, app: Application, is_in_initial_list: bool);
    fn on_update(&self, old: Application, new: Application);
    fn on_delete(&self, app: Application);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_deadline_detection() {
        assert!(ApiError::DeadlineExceeded.is_deadline_exceeded());
        assert!(!ApiError::NotFound("x".into()).is_deadline_exceeded());
    }

    #[test]
    fn substring_fallback_detection() {
        let err = ApiError::Transport("rpc error: context deadline exceeded".into());
        assert!(err.is_deadline_exceeded());
        let err = ApiError::Transport("resource \"web\" not found".into());
        assert!(err.is_not_found());
    }

    #[test]
    fn anyhow_chain_detection() {
        let err = anyhow::Error::new(ApiError::DeadlineExceeded).context("failed to get tree");
        assert!(is_deadline_exceeded(&err));
        let err = anyhow::anyhow!("plain failure");
        assert!(!is_deadline_exceeded(&err));
    }
}
