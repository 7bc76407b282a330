//! Metrics providers.
//!
//! The core consumes percentile-shaped per-container usage statistics
//! through the [`MetricsProvider`] capability. Two conforming variants
//! exist: a polling provider for point-in-time backends (the Kubernetes
//! metrics-server) and a range-query provider for historical backends
//! (Prometheus). Providers are created by name from configuration; unknown
//! names fail at construction, and an optional fallback is tried once.

pub mod polling;
pub mod prometheus;

use crate::quantity::ResourceQuantity;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Provider name for the polling metrics-server variant.
pub const PROVIDER_METRICS_SERVER: &str = "metrics-server";
/// Provider name for the Prometheus range-query variant.
pub const PROVIDER_PROMETHEUS: &str = "prometheus";

/// Error type for metrics collection.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("No data available for {namespace}/{pod}/{container} over the window")]
    NoData {
        namespace: String,
        pod: String,
        container: String,
    },

    #[error("Metrics backend unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Failed to parse metrics response: {0}")]
    Parse(String),

    #[error("Unknown metrics provider type: {0}")]
    UnknownProvider(String),

    #[error("Provider construction failed: primary: {primary}; fallback: {fallback}")]
    ConstructionFailed { primary: String, fallback: String },
}

/// Percentile statistics for one resource. The quantities carry the
/// resource's unit tag (DecimalSI millicores for CPU, BinarySI bytes for
/// memory); `p50 <= p90 <= p99` by magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceMetrics {
    pub p50: ResourceQuantity,
    pub p90: ResourceQuantity,
    pub p99: ResourceQuantity,
    pub samples: u64,
}

impl ResourceMetrics {
    /// Build CPU statistics (millicores) from a sample series. An empty
    /// series yields zero values with `samples == 0`.
    pub fn from_cpu_samples(samples: &[u64]) -> Self {
        use crate::percentile::{percentile, Percentile};
        Self {
            p50: ResourceQuantity::millicores(percentile(samples, Percentile::P50) as i64),
            p90: ResourceQuantity::millicores(percentile(samples, Percentile::P90) as i64),
            p99: ResourceQuantity::millicores(percentile(samples, Percentile::P99) as i64),
            samples: samples.len() as u64,
        }
    }

    /// Build memory statistics (bytes) from a sample series.
    pub fn from_memory_samples(samples: &[u64]) -> Self {
        use crate::percentile::{percentile, Percentile};
        Self {
            p50: ResourceQuantity::bytes(percentile(samples, Percentile::P50) as i64),
            p90: ResourceQuantity::bytes(percentile(samples, Percentile::P90) as i64),
            p99: ResourceQuantity::bytes(percentile(samples, Percentile::P99) as i64),
            samples: samples.len() as u64,
        }
    }
}

/// CPU and memory statistics for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerMetrics {
    pub cpu: ResourceMetrics,
    pub memory: ResourceMetrics,
}

/// Capability: fetch percentile statistics per container over a rolling
/// window, plus a health probe.
#[async_trait]
pub trait MetricsProvider: Send + Sync + std::fmt::Debug {
    /// Provider name, for logging and metric labels.
    fn name(&self) -> &'static str;

    /// Percentile statistics for one container over `window`.
    async fn container_metrics(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        window: Duration,
    ) -> Result<ContainerMetrics, MetricsError>;

    /// Whether the backend is reachable.
    async fn health_check(&self) -> Result<(), MetricsError>;
}

/// Everything the factory needs to construct any provider variant.
pub struct ProviderDeps {
    /// Sampler for the polling variant (wraps the metrics.k8s.io API).
    pub sampler: Arc<dyn polling::UsageSampler>,
    /// Endpoint for the range-query variant.
    pub prometheus_url: Option<String>,
    /// Polling parameters.
    pub polling: polling::PollingConfig,
}

/// Construct a provider by name. Unknown names fail.
pub fn create_provider(
    name: &str,
    deps: &ProviderDeps,
) -> Result<Arc<dyn MetricsProvider>, MetricsError> {
    match name {
        PROVIDER_METRICS_SERVER => Ok(Arc::new(polling::PollingProvider::new(
            deps.sampler.clone(),
            deps.polling.clone(),
        ))),
        PROVIDER_PROMETHEUS => {
            let url = deps
                .prometheus_url
                .as_deref()
                .ok_or_else(|| MetricsError::Unavailable("no Prometheus URL configured".into()))?;
            let provider = prometheus::RangeQueryProvider::new(url)?;
            Ok(Arc::new(provider))
        }
        other => Err(MetricsError::UnknownProvider(other.to_string())),
    }
}

/// Capability: resolve a metrics provider for a policy-configured name.
pub trait ProviderSource: Send + Sync {
    /// Provider for `name`; an empty name selects the process default.
    fn provider_for(&self, name: &str) -> Result<Arc<dyn MetricsProvider>, MetricsError>;
}

/// Lazily constructs providers by name and memoizes successes; the
/// process-level fallback is tried once whenever a primary cannot be built.
pub struct ProviderRegistry {
    deps: ProviderDeps,
    default_provider: String,
    fallback: Option<String>,
    constructed: Mutex<HashMap<String, Arc<dyn MetricsProvider>>>,
}

impl ProviderRegistry {
    pub fn new(
        deps: ProviderDeps,
        default_provider: impl Into<String>,
        fallback: Option<String>,
    ) -> Self {
        Self {
            deps,
            default_provider: default_provider.into(),
            fallback,
            constructed: Mutex::new(HashMap::new()),
        }
    }

    /// The provider policies get when they name none.
    pub fn default_provider(&self) -> Result<Arc<dyn MetricsProvider>, MetricsError> {
        self.provider_for("")
    }
}

impl ProviderSource for ProviderRegistry {
    fn provider_for(&self, name: &str) -> Result<Arc<dyn MetricsProvider>, MetricsError> {
        let name = if name.trim().is_empty() {
            self.default_provider.as_str()
        } else {
            name
        };

        if let Some(provider) = self.constructed.lock().get(name) {
            return Ok(provider.clone());
        }

        let provider = create_provider_with_fallback(name, self.fallback.as_deref(), &self.deps)?;
        self.constructed
            .lock()
            .insert(name.to_string(), provider.clone());
        Ok(provider)
    }
}

/// Construct the primary provider, falling back once to `fallback` if the
/// primary cannot be built. When both fail the error names both causes.
pub fn create_provider_with_fallback(
    primary: &str,
    fallback: Option<&str>,
    deps: &ProviderDeps,
) -> Result<Arc<dyn MetricsProvider>, MetricsError> {
    match create_provider(primary, deps) {
        Ok(provider) => Ok(provider),
        Err(primary_err) => match fallback {
            Some(name) => {
                log::warn!("metrics provider {primary} failed ({primary_err}), trying {name}");
                create_provider(name, deps).map_err(|fallback_err| {
                    MetricsError::ConstructionFailed {
                        primary: primary_err.to_string(),
                        fallback: fallback_err.to_string(),
                    }
                })
            }
            None => Err(primary_err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polling::PollingConfig;

    struct NullSampler;

    #[async_trait]
    impl polling::UsageSampler for NullSampler {
        async fn sample(
            &self,
            _namespace: &str,
            _pod: &str,
            _container: &str,
        ) -> Result<polling::UsageSample, MetricsError> {
            Ok(polling::UsageSample {
                cpu_millicores: 0,
                memory_bytes: 0,
            })
        }

        async fn backend_available(&self) -> bool {
            true
        }
    }

    fn deps(prometheus_url: Option<&str>) -> ProviderDeps {
        ProviderDeps {
            sampler: Arc::new(NullSampler),
            prometheus_url: prometheus_url.map(str::to_string),
            polling: PollingConfig::default(),
        }
    }

    #[test]
    fn test_create_known_providers() {
        let d = deps(Some("http://localhost:9090"));
        assert_eq!(
            create_provider(PROVIDER_METRICS_SERVER, &d).unwrap().name(),
            PROVIDER_METRICS_SERVER
        );
        assert_eq!(
            create_provider(PROVIDER_PROMETHEUS, &d).unwrap().name(),
            PROVIDER_PROMETHEUS
        );
    }

    #[test]
    fn test_unknown_provider_fails_at_construction() {
        assert!(matches!(
            create_provider("graphite", &deps(None)),
            Err(MetricsError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_fallback_is_tried_once() {
        // Prometheus without a URL fails construction; the polling fallback
        // succeeds.
        let d = deps(None);
        let provider =
            create_provider_with_fallback(PROVIDER_PROMETHEUS, Some(PROVIDER_METRICS_SERVER), &d)
                .unwrap();
        assert_eq!(provider.name(), PROVIDER_METRICS_SERVER);
    }

    #[test]
    fn test_both_failing_names_both_causes() {
        let d = deps(None);
        let err =
            create_provider_with_fallback(PROVIDER_PROMETHEUS, Some("graphite"), &d).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("no Prometheus URL"));
        assert!(msg.contains("graphite"));
    }

    #[test]
    fn test_registry_memoizes_and_defaults() {
        let registry = ProviderRegistry::new(
            deps(Some("http://localhost:9090")),
            PROVIDER_METRICS_SERVER,
            None,
        );
        // An empty name resolves to the configured default.
        let default = registry.default_provider().unwrap();
        assert_eq!(default.name(), PROVIDER_METRICS_SERVER);

        let named = registry.provider_for(PROVIDER_PROMETHEUS).unwrap();
        assert_eq!(named.name(), PROVIDER_PROMETHEUS);

        // Repeated lookups return the memoized instance.
        let again = registry.provider_for(PROVIDER_PROMETHEUS).unwrap();
        assert!(Arc::ptr_eq(&named, &again));

        assert!(registry.provider_for("graphite").is_err());
    }

    #[test]
    fn test_resource_metrics_from_samples() {
        let m = ResourceMetrics::from_cpu_samples(&[100, 200, 300]);
        assert!(m.p50.magnitude() <= m.p90.magnitude());
        assert!(m.p90.magnitude() <= m.p99.magnitude());
        assert_eq!(m.samples, 3);
        assert_eq!(m.p50.format(), crate::quantity::Format::DecimalSI);

        let m = ResourceMetrics::from_memory_samples(&[1024, 2048]);
        assert_eq!(m.p50.format(), crate::quantity::Format::BinarySI);
    }
}
