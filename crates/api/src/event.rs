//! Outbound event envelope delivered to the sink.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::{Deserialize, Serialize};

use manta_core::{HealthState, ResourceRef, SyncState};

use crate::ApplicationVersions;

/// Envelope for a single derived event. One envelope corresponds to exactly
/// one application snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEvent {
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    /// Processing start stamp, ISO-8601 millisecond UTC.
    pub timestamp: String,
    /// The reported object: live manifest when available, desired otherwise.
    pub object: serde_json::Value,
    pub source: ObjectSource,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ObjectError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_versions: Option<ApplicationVersions>,
}

/// Provenance and state attached to every reported object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desired_manifest: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub actual_manifest: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub git_manifest: String,
    #[serde(default, rename = "repoURL", skip_serializing_if = "String::is_empty")]
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operation_sync_revision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_id: Option<i64>,
    pub app_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_namespace: String,
    #[serde(default, rename = "appUID", skip_serializing_if = "String::is_empty")]
    pub app_uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_instance_label_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tracking_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_status: Option<SyncState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_started_at: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_finished_at: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_status: Option<HealthState>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub health_message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit_author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_date: Option<Time>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit_message: String,
    /// Whether the object should be pruned. Suppressed when the desired state
    /// could not be rendered, so consumers never delete live objects on the
    /// strength of a failed manifest generation.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_pruning: bool,
}

/// A sync or health problem attached to the reported object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub level: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<ResourceRef>,
}

impl ObjectError {
    pub fn sync_error(message: impl Into<String>, last_seen: Option<Time>) -> Self {
        Self {
            error_type: "sync".into(),
            level: "error".into(),
            message: message.into(),
            last_seen,
            source_reference: None,
        }
    }

    pub fn health_error(message: impl Into<String>, last_seen: Option<Time>) -> Self {
        Self {
            error_type: "health".into(),
            level: "error".into(),
            message: message.into(),
            last_seen,
            source_reference: None,
        }
    }
}
