//! Workload-kind filtering.
//!
//! Policies may restrict themselves to a subset of the pod-producing kinds
//! the controller understands. The algebra is include-then-exclude, with
//! exclude always winning; an empty result is valid and simply matches
//! nothing.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The closed set of workload kinds the controller manages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
}

impl WorkloadKind {
    pub const ALL: [WorkloadKind; 3] = [
        WorkloadKind::Deployment,
        WorkloadKind::StatefulSet,
        WorkloadKind::DaemonSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
        }
    }

    /// Parse a kind string; returns `None` for anything outside the set.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Deployment" => Some(Self::Deployment),
            "StatefulSet" => Some(Self::StatefulSet),
            "DaemonSet" => Some(Self::DaemonSet),
            _ => None,
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Include/exclude filter over workload kinds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct WorkloadTypeFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<WorkloadKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<WorkloadKind>,
}

/// Resolve the active kind set for a filter.
///
/// - absent filter -> the full set (backward compatibility)
/// - non-empty `include` seeds the set, otherwise the full set
/// - `exclude` is then subtracted and always wins, even when a kind appears
///   in both lists
/// - the empty set is a valid result, not an error
pub fn active_types(filter: Option<&WorkloadTypeFilter>) -> BTreeSet<WorkloadKind> {
    let Some(filter) = filter else {
        return WorkloadKind::ALL.into_iter().collect();
    };

    let mut active: BTreeSet<WorkloadKind> = if filter.include.is_empty() {
        WorkloadKind::ALL.into_iter().collect()
    } else {
        filter.include.iter().copied().collect()
    };

    for kind in &filter.exclude {
        active.remove(kind);
    }

    active
}
