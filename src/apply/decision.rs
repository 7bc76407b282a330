//! Apply decision logic.
//!
//! Decides whether a recommendation may be applied to a workload and with
//! which method, before any patch is constructed. The memory-decrease gate
//! refuses to shrink memory below a container's current limit: lowering the
//! limit on a running container risks immediate OOM kills, so those
//! workloads stay in Recommend territory until a human intervenes. CPU has
//! no equivalent gate since CPU pressure only throttles.

use super::ApplyError;
use crate::cluster::in_place_resize_supported;
use crate::policy::{OptimizationPolicy, PolicyMode};
use crate::quantity::ResourceQuantity;
use crate::recommender::Recommendation;
use crate::workload::Workload;
use std::collections::BTreeMap;
use std::fmt;

/// How a recommendation would be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMethod {
    /// In-place pod resize without restart.
    InPlace,
    /// Rolling update that recreates pods.
    Recreate,
    /// No application.
    Skip,
}

impl ApplyMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InPlace => "InPlace",
            Self::Recreate => "Recreate",
            Self::Skip => "Skip",
        }
    }
}

impl fmt::Display for ApplyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of the apply decision.
#[derive(Debug, Clone)]
pub struct Decision {
    pub can_apply: bool,
    pub method: ApplyMethod,
    pub reason: String,
}

impl Decision {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            can_apply: false,
            method: ApplyMethod::Skip,
            reason: reason.into(),
        }
    }

    fn go(method: ApplyMethod, reason: impl Into<String>) -> Self {
        Self {
            can_apply: true,
            method,
            reason: reason.into(),
        }
    }
}

/// Decide whether `recommendations` may be applied to `workload`.
///
/// `cluster_version` is the advertised (major, minor) pair; a parse failure
/// of any current quantity on the workload is an error, never a fabricated
/// zero.
pub fn can_apply(
    workload: &Workload,
    recommendations: &BTreeMap<String, Recommendation>,
    policy: &OptimizationPolicy,
    cluster_version: (&str, &str),
    global_dry_run: bool,
) -> Result<Decision, ApplyError> {
    match policy.spec.mode {
        PolicyMode::Recommend => return Ok(Decision::skip("policy in Recommend mode")),
        PolicyMode::Disabled => return Ok(Decision::skip("policy disabled")),
        PolicyMode::Automatic => {}
    }

    if global_dry_run {
        return Ok(Decision::skip("global dry-run"));
    }

    // Extract and parse every current quantity first. A malformed value on
    // the object is an error, never a fabricated zero.
    let containers = workload.containers();
    let mut memory_limits = Vec::with_capacity(containers.len());
    for container in &containers {
        let parse_err = |e: &dyn std::fmt::Display| ApplyError::CurrentQuantityParse {
            container: container.name.clone(),
            message: e.to_string(),
        };
        if let Some(cpu) = &container.cpu_request {
            ResourceQuantity::parse_cpu(cpu).map_err(|e| parse_err(&e))?;
        }
        if let Some(cpu) = &container.cpu_limit {
            ResourceQuantity::parse_cpu(cpu).map_err(|e| parse_err(&e))?;
        }
        if let Some(memory) = &container.memory_request {
            ResourceQuantity::parse_memory(memory).map_err(|e| parse_err(&e))?;
        }
        let limit = match &container.memory_limit {
            Some(memory) => Some(ResourceQuantity::parse_memory(memory).map_err(|e| parse_err(&e))?),
            None => None,
        };
        memory_limits.push((container.name.clone(), limit));
    }

    // Memory-decrease safety gate against every container's current limit.
    for (name, limit) in &memory_limits {
        let (Some(rec), Some(limit)) = (recommendations.get(name), limit) else {
            continue;
        };
        if rec.memory.magnitude() < limit.magnitude() {
            return Ok(Decision::skip("memory decrease could cause eviction/OOM"));
        }
    }

    let strategy = policy.spec.update_strategy.clone().unwrap_or_default();
    let in_place_available = in_place_resize_supported(cluster_version.0, cluster_version.1);

    if in_place_available && strategy.allow_in_place_resize.unwrap_or(false) {
        return Ok(Decision::go(
            ApplyMethod::InPlace,
            "in-place resize supported by cluster and allowed by policy",
        ));
    }

    if strategy.allow_recreate.unwrap_or(false) {
        return Ok(Decision::go(
            ApplyMethod::Recreate,
            "recreate allowed by policy",
        ));
    }

    Ok(Decision::skip("no update strategy available"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{
        Bounds, MetricsConfig, NamespaceFilter, OptimizationPolicySpec, ResourceBounds,
        UpdateStrategy, WorkloadKind, WorkloadSelector,
    };
    use serde_json::json;

    fn policy(mode: PolicyMode, strategy: Option<UpdateStrategy>) -> OptimizationPolicy {
        OptimizationPolicy::new(
            "p",
            OptimizationPolicySpec {
                mode,
                weight: None,
                selector: WorkloadSelector {
                    namespaces: Some(NamespaceFilter {
                        allow: vec!["default".to_string()],
                        deny: vec![],
                    }),
                    ..Default::default()
                },
                metrics_config: MetricsConfig {
                    provider: "metrics-server".to_string(),
                    window: None,
                    percentile: None,
                    safety_factor: None,
                },
                resource_bounds: ResourceBounds {
                    cpu: Bounds {
                        min: "100m".to_string(),
                        max: "4000m".to_string(),
                    },
                    memory: Bounds {
                        min: "128Mi".to_string(),
                        max: "8Gi".to_string(),
                    },
                },
                update_strategy: strategy,
                reconciliation_interval: None,
            },
        )
    }

    fn workload_with_resources(resources: serde_json::Value) -> Workload {
        Workload {
            kind: WorkloadKind::Deployment,
            namespace: "default".to_string(),
            name: "web".to_string(),
            labels: Default::default(),
            body: json!({
                "spec": {"template": {"spec": {"containers": [
                    {"name": "app", "resources": resources}
                ]}}}
            }),
        }
    }

    fn rec(cpu_millis: i64, memory_bytes: i64) -> BTreeMap<String, Recommendation> {
        let mut m = BTreeMap::new();
        m.insert(
            "app".to_string(),
            Recommendation {
                cpu: ResourceQuantity::millicores(cpu_millis),
                memory: ResourceQuantity::bytes(memory_bytes),
                explanation: String::new(),
            },
        );
        m
    }

    fn allow_recreate() -> Option<UpdateStrategy> {
        Some(UpdateStrategy {
            allow_recreate: Some(true),
            ..Default::default()
        })
    }

    #[test]
    fn test_recommend_mode_skips() {
        let d = can_apply(
            &workload_with_resources(json!({})),
            &rec(100, 1 << 30),
            &policy(PolicyMode::Recommend, allow_recreate()),
            ("1", "30"),
            false,
        )
        .unwrap();
        assert!(!d.can_apply);
        assert_eq!(d.method, ApplyMethod::Skip);
        assert_eq!(d.reason, "policy in Recommend mode");
    }

    #[test]
    fn test_disabled_mode_skips() {
        let d = can_apply(
            &workload_with_resources(json!({})),
            &rec(100, 1 << 30),
            &policy(PolicyMode::Disabled, allow_recreate()),
            ("1", "30"),
            false,
        )
        .unwrap();
        assert_eq!(d.reason, "policy disabled");
    }

    #[test]
    fn test_global_dry_run_skips() {
        let d = can_apply(
            &workload_with_resources(json!({})),
            &rec(100, 1 << 30),
            &policy(PolicyMode::Automatic, allow_recreate()),
            ("1", "30"),
            true,
        )
        .unwrap();
        assert_eq!(d.reason, "global dry-run");
    }

    #[test]
    fn test_memory_decrease_gate() {
        // Current limit 1Gi, current request 512Mi, recommendation 768Mi:
        // shrinking below the limit is refused.
        let workload = workload_with_resources(json!({
            "requests": {"memory": "512Mi"},
            "limits": {"memory": "1Gi"}
        }));
        let d = can_apply(
            &workload,
            &rec(100, 768 * (1 << 20)),
            &policy(PolicyMode::Automatic, allow_recreate()),
            ("1", "30"),
            false,
        )
        .unwrap();
        assert!(!d.can_apply);
        assert_eq!(d.reason, "memory decrease could cause eviction/OOM");
    }

    #[test]
    fn test_memory_at_or_above_limit_passes_gate() {
        let workload = workload_with_resources(json!({
            "limits": {"memory": "1Gi"}
        }));
        let d = can_apply(
            &workload,
            &rec(100, 2 << 30),
            &policy(PolicyMode::Automatic, allow_recreate()),
            ("1", "30"),
            false,
        )
        .unwrap();
        assert!(d.can_apply);
    }

    #[test]
    fn test_malformed_current_quantity_is_an_error() {
        let workload = workload_with_resources(json!({
            "limits": {"memory": "one-ish-gig"}
        }));
        let err = can_apply(
            &workload,
            &rec(100, 1 << 30),
            &policy(PolicyMode::Automatic, allow_recreate()),
            ("1", "30"),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, ApplyError::CurrentQuantityParse { .. }));
    }

    #[test]
    fn test_in_place_preferred_when_supported_and_allowed() {
        let strategy = Some(UpdateStrategy {
            allow_in_place_resize: Some(true),
            allow_recreate: Some(true),
            ..Default::default()
        });
        let d = can_apply(
            &workload_with_resources(json!({})),
            &rec(100, 1 << 30),
            &policy(PolicyMode::Automatic, strategy),
            ("1", "29+"),
            false,
        )
        .unwrap();
        assert!(d.can_apply);
        assert_eq!(d.method, ApplyMethod::InPlace);
    }

    #[test]
    fn test_recreate_fallback_on_old_cluster() {
        let strategy = Some(UpdateStrategy {
            allow_in_place_resize: Some(true),
            allow_recreate: Some(true),
            ..Default::default()
        });
        let d = can_apply(
            &workload_with_resources(json!({})),
            &rec(100, 1 << 30),
            &policy(PolicyMode::Automatic, strategy),
            ("1", "28"),
            false,
        )
        .unwrap();
        assert_eq!(d.method, ApplyMethod::Recreate);
    }

    #[test]
    fn test_no_strategy_available_skips() {
        let d = can_apply(
            &workload_with_resources(json!({})),
            &rec(100, 1 << 30),
            &policy(PolicyMode::Automatic, None),
            ("1", "30"),
            false,
        )
        .unwrap();
        assert!(!d.can_apply);
        assert_eq!(d.reason, "no update strategy available");
    }
}
