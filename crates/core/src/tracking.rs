//! Tracking metadata: how the identity of a managing application is embedded
//! into the objects it manages, and how to recover it.

use serde::{Deserialize, Serialize};

use crate::app::{Application, ResourceStatus};
use crate::{APPLICATION_KIND, GROUP, TRACKING_ANNOTATION, VERSION};

/// Where the managing application's identity is recorded on an object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMethod {
    Label,
    #[default]
    Annotation,
    #[serde(rename = "annotation+label")]
    AnnotationAndLabel,
}

impl std::fmt::Display for TrackingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Label => "label",
            Self::Annotation => "annotation",
            Self::AnnotationAndLabel => "annotation+label",
        })
    }
}

impl std::str::FromStr for TrackingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "label" => Ok(Self::Label),
            "annotation" => Ok(Self::Annotation),
            "annotation+label" => Ok(Self::AnnotationAndLabel),
            other => Err(format!("unknown tracking method: {other}")),
        }
    }
}

/// Tracking settings resolved per event from the settings provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingMetadata {
    pub app_instance_label_key: String,
    pub tracking_method: TrackingMethod,
}

/// Identity of an application recovered from tracking metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppIdentity {
    pub name: String,
    pub namespace: String,
}

impl AppIdentity {
    /// A child app carries a non-empty managing-application name.
    pub fn is_child_app(&self) -> bool {
        !self.name.is_empty()
    }
}

/// Recover the identity of the application managing `app`, if any.
///
/// The annotation value has the form `instance:group/kind:namespace/name`;
/// the label value is the bare instance name. An instance name of the form
/// `namespace_name` carries the manager's namespace.
pub fn parent_app_identity(
    app: &Application,
    app_instance_label_key: &str,
    method: TrackingMethod,
) -> AppIdentity {
    let from_annotation = || {
        app.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(TRACKING_ANNOTATION))
            .map(|v| v.split(':').next().unwrap_or_default().to_string())
    };
    let from_label = || {
        app.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(app_instance_label_key))
            .cloned()
    };

    let instance = match method {
        TrackingMethod::Label => from_label(),
        TrackingMethod::Annotation => from_annotation(),
        TrackingMethod::AnnotationAndLabel => from_annotation().or_else(from_label),
    }
    .unwrap_or_default();

    match instance.split_once('_') {
        Some((namespace, name)) => {
            AppIdentity { name: name.to_string(), namespace: namespace.to_string() }
        }
        None => AppIdentity { name: instance, namespace: String::new() },
    }
}

/// Represent a child application the way its parent sees it: as one more
/// resource in the parent's status.
pub fn app_as_resource(app: &Application) -> ResourceStatus {
    ResourceStatus {
        group: GROUP.to_string(),
        version: VERSION.to_string(),
        kind: APPLICATION_KIND.to_string(),
        namespace: app.namespace().to_string(),
        name: app.name().to_string(),
        status: Some(app.status.sync.status),
        health: Some(app.status.health.clone()),
        hook: false,
        requires_pruning: false,
    }
}
