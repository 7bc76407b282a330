//! Application engine.
//!
//! Builds a resource patch for a single container and emits it through the
//! cluster writer, either as a server-side field-ownership apply under the
//! stable `optipod` manager identity (the default) or as a strategic merge
//! patch. Only the resource sub-tree of the named container is emitted;
//! other containers and all other spec fields are untouched.

pub mod decision;

pub use decision::{can_apply, ApplyMethod, Decision};

use crate::cluster::{ClusterError, ClusterWriter, PatchStrategy};
use crate::policy::{
    OptimizationPolicy, DEFAULT_CPU_LIMIT_MULTIPLIER, DEFAULT_MEMORY_LIMIT_MULTIPLIER,
};
use crate::quantity::QuantityError;
use crate::recommender::Recommendation;
use crate::workload::Workload;
use serde_json::{json, Value};

/// Patch-type name for field-ownership apply, stable across releases (also
/// a metric label value).
pub const METHOD_FIELD_OWNERSHIP: &str = "FieldOwnershipApply";
/// Patch-type name for strategic merge.
pub const METHOD_STRATEGIC_MERGE: &str = "StrategicMergePatch";

/// Error type for the application engine, mirroring the controller's
/// failure taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("Failed to parse current quantity on container {container}: {message}")]
    CurrentQuantityParse { container: String, message: String },

    #[error("RBAC forbidden: {0}")]
    Permission(String),

    #[error("Conflict during apply: {0}")]
    Conflict(String),

    #[error("Patch rejected as invalid: {0}")]
    Validation(String),

    #[error("Patch failed: {0}")]
    Patch(String),

    #[error(transparent)]
    Quantity(#[from] QuantityError),
}

impl From<ClusterError> for ApplyError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::Forbidden(m) => ApplyError::Permission(m),
            ClusterError::Conflict(m) => ApplyError::Conflict(m),
            ClusterError::Invalid(m) => ApplyError::Validation(m),
            ClusterError::NotFound(m) | ClusterError::Api(m) => ApplyError::Patch(m),
        }
    }
}

/// Result of a successful apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyResult {
    /// `"FieldOwnershipApply"` or `"StrategicMergePatch"`.
    pub method: &'static str,
    pub field_ownership: bool,
}

/// Limits derived from a recommendation via the policy's multipliers
/// (defaults: cpu x1.0, memory x1.1). `None` when the policy updates
/// requests only.
pub fn recommended_limits(
    rec: &Recommendation,
    policy: &OptimizationPolicy,
) -> Result<Option<(crate::quantity::ResourceQuantity, crate::quantity::ResourceQuantity)>, ApplyError>
{
    let strategy = policy.spec.update_strategy.clone().unwrap_or_default();
    if strategy.update_requests_only.unwrap_or(false) {
        return Ok(None);
    }
    let limits = strategy.limit_config.unwrap_or_default();
    let cpu_limit = rec
        .cpu
        .multiply(limits.cpu_limit_multiplier.unwrap_or(DEFAULT_CPU_LIMIT_MULTIPLIER))?;
    let memory_limit = rec.memory.multiply(
        limits
            .memory_limit_multiplier
            .unwrap_or(DEFAULT_MEMORY_LIMIT_MULTIPLIER),
    )?;
    Ok(Some((cpu_limit, memory_limit)))
}

/// Manager name of a prior owner of the container resource fields, if one
/// exists on the workload's managed fields. Used to emit a takeover event
/// when the force flag transfers ownership to the controller.
pub fn prior_resource_owner(workload: &Workload) -> Option<String> {
    let entries = workload
        .body
        .pointer("/metadata/managedFields")?
        .as_array()?;
    for entry in entries {
        let Some(manager) = entry.get("manager").and_then(Value::as_str) else {
            continue;
        };
        if manager == crate::cluster::FIELD_MANAGER {
            continue;
        }
        let fields = entry.get("fieldsV1").map(|v| v.to_string()).unwrap_or_default();
        if fields.contains("f:resources") {
            return Some(manager.to_string());
        }
    }
    None
}

/// Build the patch body and strategy for one container.
///
/// The patch sets `resources.requests.{cpu,memory}` from the recommendation.
/// Unless `updateRequestsOnly` is set, limits are derived from the requests
/// via the policy's multipliers; when it is set, no `limits` field appears
/// in the patch at all, preserving any existing limits under both
/// strategies.
pub fn build_patch(
    workload: &Workload,
    container: &str,
    rec: &Recommendation,
    policy: &OptimizationPolicy,
) -> Result<(Value, PatchStrategy), ApplyError> {
    let strategy = policy.spec.update_strategy.clone().unwrap_or_default();

    let mut resources = json!({
        "requests": {
            "cpu": rec.cpu.to_string(),
            "memory": rec.memory.to_string(),
        }
    });

    if let Some((cpu_limit, memory_limit)) = recommended_limits(rec, policy)? {
        resources["limits"] = json!({
            "cpu": cpu_limit.to_string(),
            "memory": memory_limit.to_string(),
        });
    }

    let container_entry = json!({
        "name": container,
        "resources": resources,
    });

    if strategy.uses_field_ownership() {
        // A field-ownership apply document must identify the object; only
        // the one container's resource sub-tree is declared as owned.
        let body = json!({
            "apiVersion": "apps/v1",
            "kind": workload.kind.as_str(),
            "metadata": {
                "name": workload.name,
                "namespace": workload.namespace,
            },
            "spec": {
                "template": {
                    "spec": {
                        "containers": [container_entry]
                    }
                }
            }
        });
        Ok((body, PatchStrategy::Apply { force: true }))
    } else {
        let body = json!({
            "spec": {
                "template": {
                    "spec": {
                        "containers": [container_entry]
                    }
                }
            }
        });
        Ok((body, PatchStrategy::StrategicMerge))
    }
}

/// Apply a recommendation to one container of a workload.
pub async fn apply<W: ClusterWriter + ?Sized>(
    writer: &W,
    workload: &Workload,
    container: &str,
    rec: &Recommendation,
    policy: &OptimizationPolicy,
) -> Result<ApplyResult, ApplyError> {
    let (patch, strategy) = build_patch(workload, container, rec, policy)?;

    writer.patch_workload(workload, &patch, strategy).await?;

    let result = match strategy {
        PatchStrategy::Apply { .. } => ApplyResult {
            method: METHOD_FIELD_OWNERSHIP,
            field_ownership: true,
        },
        PatchStrategy::StrategicMerge => ApplyResult {
            method: METHOD_STRATEGIC_MERGE,
            field_ownership: false,
        },
    };

    log::info!(
        "applied recommendation to {}/{} container {container} via {} (cpu {}, memory {})",
        workload.namespace,
        workload.name,
        result.method,
        rec.cpu,
        rec.memory
    );

    Ok(result)
}
