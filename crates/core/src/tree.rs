//! Resource tree reported for an application: live objects and their
//! parent/child relationships.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::{Deserialize, Serialize};

use crate::app::{HealthStatus, ResourceStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
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
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
}

impl ResourceRef {
    /// Identity match ignoring version and uid, the way tree lookups work.
    fn matches(&self, group: &str, kind: &str, namespace: &str, name: &str) -> bool {
        self.group == group && self.kind == kind && self.namespace == namespace && self.name == name
    }
}

impl From<&ResourceStatus> for ResourceRef {
    fn from(rs: &ResourceStatus) -> Self {
        Self {
            group: rs.group.clone(),
            version: rs.version.clone(),
            kind: rs.kind.clone(),
            namespace: rs.namespace.clone(),
            name: rs.name.clone(),
            uid: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceNode {
    #[serde(flatten)]
    pub resource_ref: ResourceRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_refs: Vec<ResourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Time>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationTree {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<ResourceNode>,
}

impl ApplicationTree {
    pub fn find_node(
        &self,
        group: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Option<&ResourceNode> {
        self.nodes
            .iter()
            .find(|n| n.resource_ref.matches(group, kind, namespace, name))
    }

    /// Transitive children of the given node, following `parent_refs`
    /// backwards. Order is breadth-first; the starting node is excluded.
    pub fn child_nodes_of(&self, root: &ResourceRef) -> Vec<&ResourceNode> {
        let mut out: Vec<&ResourceNode> = Vec::new();
        let mut frontier: Vec<&ResourceRef> = vec![root];
        while let Some(parent) = frontier.pop() {
            for node in &self.nodes {
                let is_child = node.parent_refs.iter().any(|p| {
                    p.matches(&parent.group, &parent.kind, &parent.namespace, &parent.name)
                });
                if is_child && !out.iter().any(|n| n.resource_ref == node.resource_ref) {
                    out.push(node);
                    frontier.push(&node.resource_ref);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{HealthState, HealthStatus};

    fn node(kind: &str, name: &str, parents: Vec<ResourceRef>) -> ResourceNode {
        ResourceNode {
            resource_ref: ResourceRef {
                group: "apps".into(),
                version: "v1".into(),
                kind: kind.into(),
                namespace: "ns".into(),
                name: name.into(),
                uid: String::new(),
            },
            parent_refs: parents,
            health: Some(HealthStatus { status: HealthState::Healthy, message: String::new() }),
            created_at: None,
        }
    }

    #[test]
    fn child_nodes_are_transitive() {
        let deploy = node("Deployment", "web", vec![]);
        let rs = node("ReplicaSet", "web-1", vec![deploy.resource_ref.clone()]);
        let pod = node("Pod", "web-1-abc", vec![rs.resource_ref.clone()]);
        let tree = ApplicationTree { nodes: vec![pod, rs, deploy.clone()] };

        let children = tree.child_nodes_of(&deploy.resource_ref);
        let names: Vec<_> = children.iter().map(|n| n.resource_ref.name.as_str()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"web-1"));
        assert!(names.contains(&"web-1-abc"));
    }

    #[test]
    fn find_node_ignores_version() {
        let deploy = node("Deployment", "web", vec![]);
        let tree = ApplicationTree { nodes: vec![deploy] };
        assert!(tree.find_node("apps", "Deployment", "ns", "web").is_some());
        assert!(tree.find_node("apps", "Deployment", "ns", "api").is_none());
    }
}
