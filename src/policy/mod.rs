//! Policy model for workload right-sizing.
//!
//! The `OptimizationPolicy` custom resource is the sole inbound control-plane
//! object: it pairs a workload selector with a metrics configuration,
//! resource bounds, and an update strategy. The controller writes back a
//! status sub-object with conditions, per-workload records, and counters.

pub mod selector;
pub mod validation;
pub mod workload_types;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use workload_types::{WorkloadKind, WorkloadTypeFilter};

// ============================================================================
// Policy spec
// ============================================================================

/// Declarative right-sizing policy.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "optipod.dev",
    version = "v1alpha1",
    kind = "OptimizationPolicy",
    plural = "optimizationpolicies",
    shortname = "optpol",
    status = "OptimizationPolicyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationPolicySpec {
    /// Operating mode: Automatic applies recommendations, Recommend only
    /// records them, Disabled skips matched workloads entirely.
    pub mode: PolicyMode,

    /// Priority when multiple policies match the same workload, 1-1000.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,

    /// Which namespaces and workloads this policy governs.
    pub selector: WorkloadSelector,

    /// Where and how usage statistics are collected.
    pub metrics_config: MetricsConfig,

    /// Hard bounds the recommendation is clamped into.
    pub resource_bounds: ResourceBounds,

    /// How recommendations are applied in Automatic mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<UpdateStrategy>,

    /// Requeue interval between reconciliations (e.g. "5m").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation_interval: Option<String>,
}

/// Default weight when the policy does not set one.
pub const DEFAULT_WEIGHT: u32 = 100;

/// Default safety factor applied above the selected percentile.
pub const DEFAULT_SAFETY_FACTOR: f64 = 1.2;

/// Default requeue interval.
pub const DEFAULT_RECONCILIATION_INTERVAL: std::time::Duration =
    std::time::Duration::from_secs(300);

/// Policy operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum PolicyMode {
    /// Compute and apply recommendations.
    Automatic,
    /// Compute and record recommendations without touching workloads.
    Recommend,
    /// Skip matched workloads.
    Disabled,
}

impl PolicyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "Automatic",
            Self::Recommend => "Recommend",
            Self::Disabled => "Disabled",
        }
    }
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Selector
// ============================================================================

/// Workload selection: label selectors, namespace allow/deny lists, and a
/// workload-type filter. At least one element must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSelector {
    /// Label selector over namespaces.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,

    /// Label selector over workloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload_selector: Option<LabelSelector>,

    /// Explicit namespace allow/deny lists; deny wins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<NamespaceFilter>,

    /// Which workload kinds to consider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload_types: Option<WorkloadTypeFilter>,
}

impl WorkloadSelector {
    /// True when no selector element is set at all.
    pub fn is_empty(&self) -> bool {
        self.namespace_selector.is_none()
            && self.workload_selector.is_none()
            && self
                .namespaces
                .as_ref()
                .map(|n| n.allow.is_empty() && n.deny.is_empty())
                .unwrap_or(true)
            && self.workload_types.is_none()
    }
}

/// Namespace allow/deny lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct NamespaceFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
}

/// Label selector with equality matches and set expressions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    /// An empty selector matches everything.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        for (k, v) in &self.match_labels {
            if labels.get(k) != Some(v) {
                return false;
            }
        }
        for expr in &self.match_expressions {
            if !expr.matches(labels) {
                return false;
            }
        }
        true
    }
}

/// A single selector expression.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: LabelSelectorOperator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl LabelSelectorRequirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self.operator {
            LabelSelectorOperator::In => labels
                .get(&self.key)
                .map(|v| self.values.contains(v))
                .unwrap_or(false),
            LabelSelectorOperator::NotIn => labels
                .get(&self.key)
                .map(|v| !self.values.contains(v))
                .unwrap_or(true),
            LabelSelectorOperator::Exists => labels.contains_key(&self.key),
            LabelSelectorOperator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

/// Closed operator set for selector expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum LabelSelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl LabelSelectorOperator {
    /// Whether this operator requires a non-empty value list.
    pub fn requires_values(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

// ============================================================================
// Metrics configuration
// ============================================================================

/// Metrics backend selection and statistics shape.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    /// Provider name (e.g. "metrics-server", "prometheus").
    pub provider: String,

    /// Rolling window of history considered (e.g. "1h", "7d").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,

    /// Percentile to base recommendations on: "P50", "P90" or "P99".
    /// Empty or unknown values fall back to P90.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentile: Option<String>,

    /// Multiplier >= 1.0 applied above the selected percentile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_factor: Option<f64>,
}

impl MetricsConfig {
    pub fn safety_factor(&self) -> f64 {
        self.safety_factor.unwrap_or(DEFAULT_SAFETY_FACTOR)
    }
}

// ============================================================================
// Resource bounds
// ============================================================================

/// Per-resource min/max bounds, as quantity strings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResourceBounds {
    pub cpu: Bounds,
    pub memory: Bounds,
}

/// A min/max pair (e.g. min "100m", max "4000m").
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Bounds {
    pub min: String,
    pub max: String,
}

// ============================================================================
// Update strategy
// ============================================================================

/// How recommendations are applied to workloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStrategy {
    /// Permit in-place pod resize when the cluster supports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_in_place_resize: Option<bool>,

    /// Permit updates that recreate pods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_recreate: Option<bool>,

    /// Patch only requests, leaving existing limits untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_requests_only: Option<bool>,

    /// Use server-side field-ownership apply (default) instead of a
    /// strategic merge patch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_field_ownership_apply: Option<bool>,

    /// Multipliers deriving limits from recommended requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_config: Option<LimitConfig>,
}

impl UpdateStrategy {
    /// Field-ownership apply is the default when unset.
    pub fn uses_field_ownership(&self) -> bool {
        self.use_field_ownership_apply.unwrap_or(true)
    }
}

/// Limit multipliers, each in [1, 10].
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LimitConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_limit_multiplier: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit_multiplier: Option<f64>,
}

/// Default limit multiplier for CPU when limits are updated.
pub const DEFAULT_CPU_LIMIT_MULTIPLIER: f64 = 1.0;
/// Default limit multiplier for memory when limits are updated.
pub const DEFAULT_MEMORY_LIMIT_MULTIPLIER: f64 = 1.1;

// ============================================================================
// Status
// ============================================================================

/// Observed state written back to the policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationPolicyStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<PolicyCondition>,

    /// Per-workload outcome records from the last reconciliation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workloads: Vec<WorkloadStatusRecord>,

    /// Per-type counts of discovered workloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload_counts: Option<WorkloadTypeCount>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reconcile_time: Option<String>,

    #[serde(default)]
    pub total_discovered: u32,
    #[serde(default)]
    pub total_processed: u32,
}

/// A status condition (Ready true/false with reason and message).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub reason: String,
    pub message: String,
    pub last_transition_time: String,
}

/// Condition type for overall policy health.
pub const CONDITION_READY: &str = "Ready";

/// Per-workload observed record.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatusRecord {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
    pub outcome: WorkloadOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_recommendation_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_applied_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_apply_method: Option<String>,
    #[serde(default)]
    pub field_ownership: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<ContainerRecommendationRecord>,
}

/// Recommended values recorded per container, as quantity strings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecommendationRecord {
    pub container: String,
    pub cpu_request: String,
    pub memory_request: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
}

/// Per-workload outcome for a reconciliation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum WorkloadOutcome {
    Applied,
    Recommended,
    Skipped,
    Error,
}

impl WorkloadOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "Applied",
            Self::Recommended => "Recommended",
            Self::Skipped => "Skipped",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for WorkloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Deployment / StatefulSet / DaemonSet counters; other kinds are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadTypeCount {
    pub deployments: u32,
    pub stateful_sets: u32,
    pub daemon_sets: u32,
}

impl WorkloadTypeCount {
    pub fn record(&mut self, kind: WorkloadKind) {
        match kind {
            WorkloadKind::Deployment => self.deployments += 1,
            WorkloadKind::StatefulSet => self.stateful_sets += 1,
            WorkloadKind::DaemonSet => self.daemon_sets += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.deployments + self.stateful_sets + self.daemon_sets
    }
}

// ============================================================================
// Helpers
// ============================================================================

impl OptimizationPolicy {
    /// Cache/queue key: `{namespace}/{name}`.
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.metadata.namespace.as_deref().unwrap_or_default(),
            self.metadata.name.as_deref().unwrap_or_default()
        )
    }

    pub fn weight(&self) -> u32 {
        self.spec.weight.unwrap_or(DEFAULT_WEIGHT)
    }

    pub fn name_unchecked(&self) -> String {
        self.metadata.name.clone().unwrap_or_default()
    }
}
