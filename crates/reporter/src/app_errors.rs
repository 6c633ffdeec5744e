//! Extraction of sync and health problems for the outbound payload.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use manta_api::ObjectError;
use manta_core::{
    ApplicationCondition, ApplicationStatus, ApplicationTree, HealthState, OperationState,
    ResourceResult, ResourceStatus, ResultCode, SyncPhase,
};

/// Reconciler condition messages that summarise per-resource failures; the
/// per-resource detail from the sync result replaces them.
const SYNC_TASK_UNSUCCESSFUL_MESSAGE: &str =
    "one or more synchronization tasks completed unsuccessfully";
const SYNC_TASK_APPLY_FAILED_MESSAGE: &str = "one or more objects failed to apply";

fn now() -> Option<Time> {
    Some(Time(Utc::now()))
}

fn is_failed_result(r: &ResourceResult) -> bool {
    r.hook_phase.is_some_and(|p| p.is_failure()) || r.status == Some(ResultCode::SyncFailed)
}

/// Errors recorded for one resource by the last sync operation.
pub fn parse_resource_sync_result_errors(
    rs: &ResourceStatus,
    operation_state: &OperationState,
) -> Vec<ObjectError> {
    let Some(sync_result) = &operation_state.sync_result else {
        return Vec::new();
    };
    let result = sync_result.resources.iter().find(|r| {
        r.group == rs.group
            && r.kind == rs.kind
            && r.namespace == rs.namespace
            && r.name == rs.name
            && r.sync_phase == SyncPhase::Sync
    });
    match result {
        Some(r) if is_failed_result(r) => {
            vec![ObjectError::sync_error(r.message.clone(), now())]
        }
        _ => Vec::new(),
    }
}

/// Operation-level failure of the whole application sync.
pub fn parse_application_sync_result_errors(operation_state: &OperationState) -> Vec<ObjectError> {
    if operation_state.phase.is_failure() {
        vec![ObjectError::sync_error(operation_state.message.clone(), now())]
    } else {
        Vec::new()
    }
}

pub fn condition_level(condition: &ApplicationCondition) -> &'static str {
    if condition.is_error() {
        "error"
    } else {
        "warning"
    }
}

/// Every status condition becomes an error entry; summary conditions are
/// replaced by the per-resource failures they summarise.
pub fn parse_application_sync_result_errors_from_conditions(
    status: &ApplicationStatus,
) -> Vec<ObjectError> {
    let mut errors = Vec::new();

    let sync_result = status.operation_state.as_ref().and_then(|os| os.sync_result.as_ref());

    for condition in &status.conditions {
        let summarises_resources = (condition.message.contains(SYNC_TASK_UNSUCCESSFUL_MESSAGE)
            || condition.message.contains(SYNC_TASK_APPLY_FAILED_MESSAGE))
            && sync_result.is_some();

        if let (true, Some(sync_result)) = (summarises_resources, sync_result) {
            for r in sync_result.resources.iter().filter(|r| is_failed_result(r)) {
                errors.push(ObjectError::sync_error(
                    format!("Resource {}({}): \n {}", r.kind, r.name, r.message),
                    now(),
                ));
            }
        } else {
            errors.push(ObjectError {
                error_type: "sync".into(),
                level: condition_level(condition).into(),
                message: condition.message.clone(),
                last_seen: now(),
                source_reference: None,
            });
        }
    }

    errors
}

/// Health errors of degraded descendants, aggregated up to the reported
/// resource. When no descendant is degraded but the resource itself is, its
/// own message is reported.
pub fn parse_aggregative_health_errors(
    rs: &ResourceStatus,
    tree: Option<&ApplicationTree>,
    set_source_reference: bool,
) -> Vec<ObjectError> {
    let Some(tree) = tree else {
        return Vec::new();
    };
    let Some(node) = tree.find_node(&rs.group, &rs.kind, &rs.namespace, &rs.name) else {
        return Vec::new();
    };

    let source_reference = set_source_reference.then(|| node.resource_ref.clone());

    let mut errors = Vec::new();
    for child in tree.child_nodes_of(&node.resource_ref) {
        let Some(health) = &child.health else { continue };
        if health.status == HealthState::Degraded && !health.message.is_empty() {
            let mut err =
                ObjectError::health_error(health.message.clone(), child.created_at.clone().or_else(now));
            err.source_reference = source_reference.clone();
            errors.push(err);
        }
    }

    if errors.is_empty() {
        if let Some(health) = &node.health {
            if health.status == HealthState::Degraded && !health.message.is_empty() {
                let mut err = ObjectError::health_error(
                    health.message.clone(),
                    node.created_at.clone().or_else(now),
                );
                err.source_reference = source_reference;
                errors.push(err);
            }
        }
    }

    errors
}

/// Health errors aggregated across all degraded resources of an application.
pub fn parse_aggregative_health_errors_of_application(
    app: &manta_core::Application,
    tree: Option<&ApplicationTree>,
) -> Vec<ObjectError> {
    let mut errors = Vec::new();
    for rs in &app.status.resources {
        if rs.health.as_ref().is_some_and(|h| h.status == HealthState::Degraded) {
            errors.extend(parse_aggregative_health_errors(rs, tree, false));
        }
    }
    errors
}
