//! Best-policy selection when multiple policies match one workload.
//!
//! Matching here is evaluated from the workload side: kind admitted by the
//! type filter, namespace admitted by the allow/deny lists, labels admitted
//! by the workload selector. Label-based namespace selection needs the
//! namespace object itself and is evaluated during discovery.

use crate::policy::workload_types::active_types;
use crate::policy::{OptimizationPolicy, PolicyMode};
use crate::workload::Workload;

/// Whether `policy` governs `workload`.
pub fn policy_matches(policy: &OptimizationPolicy, workload: &Workload) -> bool {
    let selector = &policy.spec.selector;

    if !active_types(selector.workload_types.as_ref()).contains(&workload.kind) {
        return false;
    }

    if let Some(ns) = &selector.namespaces {
        if ns.deny.contains(&workload.namespace) {
            return false;
        }
        if !ns.allow.is_empty() && !ns.allow.contains(&workload.namespace) {
            return false;
        }
    }

    if let Some(sel) = &selector.workload_selector {
        if !sel.matches(&workload.labels) {
            return false;
        }
    }

    true
}

/// Choose the single policy governing `workload` from `policies`.
///
/// Disabled policies are ignored. Matches are ordered by weight descending
/// with ascending-name tiebreak, and the first is returned; `None` when
/// nothing matches. The tiebreak is deterministic and part of the contract.
pub fn select_best_policy<'a>(
    policies: &'a [OptimizationPolicy],
    workload: &Workload,
) -> Option<&'a OptimizationPolicy> {
    let mut matches: Vec<&OptimizationPolicy> = policies
        .iter()
        .filter(|p| p.spec.mode != PolicyMode::Disabled)
        .filter(|p| policy_matches(p, workload))
        .collect();

    matches.sort_by(|a, b| {
        b.weight()
            .cmp(&a.weight())
            .then_with(|| a.name_unchecked().cmp(&b.name_unchecked()))
    });

    matches.first().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{
        Bounds, MetricsConfig, NamespaceFilter, OptimizationPolicySpec, ResourceBounds,
        WorkloadKind, WorkloadSelector, WorkloadTypeFilter,
    };
    use std::collections::BTreeMap;

    fn policy(name: &str, weight: Option<u32>, mode: PolicyMode) -> OptimizationPolicy {
        let mut p = OptimizationPolicy::new(
            name,
            OptimizationPolicySpec {
                mode,
                weight,
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
                update_strategy: None,
                reconciliation_interval: None,
            },
        );
        p.metadata.namespace = Some("optipod-system".to_string());
        p
    }

    fn deployment(namespace: &str) -> Workload {
        Workload {
            kind: WorkloadKind::Deployment,
            namespace: namespace.to_string(),
            name: "web".to_string(),
            labels: BTreeMap::new(),
            body: serde_json::json!({}),
        }
    }

    #[test]
    fn test_higher_weight_wins() {
        let policies = vec![
            policy("low", Some(100), PolicyMode::Automatic),
            policy("high", Some(200), PolicyMode::Automatic),
        ];
        let best = select_best_policy(&policies, &deployment("default")).unwrap();
        assert_eq!(best.name_unchecked(), "high");
    }

    #[test]
    fn test_equal_weight_breaks_ties_by_name() {
        let policies = vec![
            policy("z", Some(200), PolicyMode::Automatic),
            policy("a", Some(200), PolicyMode::Automatic),
        ];
        let best = select_best_policy(&policies, &deployment("default")).unwrap();
        assert_eq!(best.name_unchecked(), "a");
    }

    #[test]
    fn test_disabled_policies_ignored() {
        let policies = vec![policy("only", Some(500), PolicyMode::Disabled)];
        assert!(select_best_policy(&policies, &deployment("default")).is_none());
    }

    #[test]
    fn test_no_match_on_namespace() {
        let policies = vec![policy("p", Some(100), PolicyMode::Automatic)];
        assert!(select_best_policy(&policies, &deployment("other")).is_none());
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let mut p = policy("p", Some(100), PolicyMode::Automatic);
        p.spec.selector.namespaces = Some(NamespaceFilter {
            allow: vec!["default".to_string()],
            deny: vec!["default".to_string()],
        });
        assert!(!policy_matches(&p, &deployment("default")));
    }

    #[test]
    fn test_type_filter_excludes_kind() {
        let mut p = policy("p", Some(100), PolicyMode::Automatic);
        p.spec.selector.workload_types = Some(WorkloadTypeFilter {
            include: vec![],
            exclude: vec![WorkloadKind::Deployment],
        });
        assert!(!policy_matches(&p, &deployment("default")));
    }

    #[test]
    fn test_default_weight_is_100() {
        let policies = vec![
            policy("defaulted", None, PolicyMode::Automatic),
            policy("heavier", Some(101), PolicyMode::Automatic),
        ];
        let best = select_best_policy(&policies, &deployment("default")).unwrap();
        assert_eq!(best.name_unchecked(), "heavier");
    }
}
