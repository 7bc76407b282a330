//! Configuration types for the controller process.

use serde::{Deserialize, Serialize};

/// Root configuration, loaded from `.optipod.toml` and overridden by CLI
/// flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub controller: ControllerSettings,
    pub metrics: MetricsSettings,
    pub annotations: AnnotationSettings,
}

/// Controller-wide behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerSettings {
    /// Overrides Automatic mode with Skip everywhere.
    pub dry_run: bool,
    /// Whether to take a leadership lease before reconciling (delegated to
    /// the runtime deployment).
    pub leader_election: bool,
    /// Default requeue interval for policies that do not set one.
    pub reconcile_interval: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            dry_run: false,
            leader_election: false,
            reconcile_interval: "5m".to_string(),
        }
    }
}

/// Metrics provider selection and polling parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsSettings {
    /// Default provider for policies that do not name one.
    pub provider: String,
    /// Provider tried once when the primary cannot be constructed.
    pub fallback_provider: Option<String>,
    /// Endpoint for the range-query provider.
    pub prometheus_url: Option<String>,
    /// Samples per collection for the polling provider.
    pub max_samples: u32,
    /// Spacing between polling samples.
    pub sample_interval: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            provider: "metrics-server".to_string(),
            fallback_provider: None,
            prometheus_url: None,
            max_samples: 10,
            sample_interval: "15s".to_string(),
        }
    }
}

/// Annotation settings for managed workloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnnotationSettings {
    /// Prefix for every annotation key the controller writes.
    pub prefix: String,
}

impl Default for AnnotationSettings {
    fn default() -> Self {
        Self {
            prefix: "optipod.dev".to_string(),
        }
    }
}
