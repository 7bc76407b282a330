//! Polling metrics provider for point-in-time backends.
//!
//! The Kubernetes metrics-server only exposes an instantaneous usage
//! snapshot, so percentile statistics are approximated by taking up to
//! `max_samples` evenly spaced samples at `sample_interval`. The sample
//! count is `min(max_samples, window / sample_interval)`, at least 1, which
//! caps total wall-clock at `(max_samples - 1) * sample_interval` no matter
//! how large the policy's rolling window is. The inter-sample wait is a
//! plain tokio sleep, so dropping the future at a tick boundary cancels
//! collection promptly.

use super::{ContainerMetrics, MetricsError, MetricsProvider, ResourceMetrics};
use async_trait::async_trait;
use kube::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Default number of samples per collection.
pub const DEFAULT_MAX_SAMPLES: u32 = 10;
/// Default spacing between samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(15);

/// One instantaneous usage reading.
#[derive(Debug, Clone, Copy)]
pub struct UsageSample {
    pub cpu_millicores: u64,
    pub memory_bytes: u64,
}

/// Capability: read one instantaneous usage sample for a container.
#[async_trait]
pub trait UsageSampler: Send + Sync {
    async fn sample(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<UsageSample, MetricsError>;

    /// Whether the backing metrics API is served at all.
    async fn backend_available(&self) -> bool;
}

/// Sampling parameters.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub max_samples: u32,
    pub sample_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_samples: DEFAULT_MAX_SAMPLES,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

/// Polling provider: samples the backend and feeds the percentile engine.
pub struct PollingProvider {
    sampler: Arc<dyn UsageSampler>,
    config: PollingConfig,
}

impl std::fmt::Debug for PollingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PollingProvider {
    pub fn new(sampler: Arc<dyn UsageSampler>, config: PollingConfig) -> Self {
        Self { sampler, config }
    }

    /// Number of samples for a window: `min(max_samples, window / interval)`,
    /// never less than 1. Deliberately NOT derived from the window alone, so
    /// a 1-hour window cannot induce a 1-hour wait.
    fn sample_count(&self, window: Duration) -> u32 {
        let by_window = (window.as_secs() / self.config.sample_interval.as_secs().max(1)) as u32;
        by_window.min(self.config.max_samples).max(1)
    }
}

#[async_trait]
impl MetricsProvider for PollingProvider {
    fn name(&self) -> &'static str {
        super::PROVIDER_METRICS_SERVER
    }

    async fn container_metrics(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        window: Duration,
    ) -> Result<ContainerMetrics, MetricsError> {
        let count = self.sample_count(window);
        let mut cpu = Vec::with_capacity(count as usize);
        let mut memory = Vec::with_capacity(count as usize);

        for i in 0..count {
            if i > 0 {
                tokio::time::sleep(self.config.sample_interval).await;
            }
            let sample = self.sampler.sample(namespace, pod, container).await?;
            cpu.push(sample.cpu_millicores);
            memory.push(sample.memory_bytes);
        }

        Ok(ContainerMetrics {
            cpu: ResourceMetrics::from_cpu_samples(&cpu),
            memory: ResourceMetrics::from_memory_samples(&memory),
        })
    }

    async fn health_check(&self) -> Result<(), MetricsError> {
        if self.sampler.backend_available().await {
            Ok(())
        } else {
            Err(MetricsError::Unavailable(
                "metrics API is not served".to_string(),
            ))
        }
    }
}

// ============================================================================
// metrics.k8s.io sampler
// ============================================================================

/// Sampler backed by the metrics.k8s.io API. The metrics API is an
/// aggregated resource, so we issue raw requests rather than going through a
/// typed client.
pub struct KubeUsageSampler {
    client: Client,
}

impl KubeUsageSampler {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UsageSampler for KubeUsageSampler {
    async fn sample(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<UsageSample, MetricsError> {
        let path = format!("/apis/metrics.k8s.io/v1beta1/namespaces/{namespace}/pods/{pod}");
        let request = http::Request::builder()
            .method("GET")
            .uri(&path)
            .body(Vec::new())
            .map_err(|e| MetricsError::QueryFailed(format!("building request: {e}")))?;

        let response: PodMetricsItem = self.client.request(request).await.map_err(|e| {
            let msg = e.to_string();
            if msg.contains("404") || msg.contains("not found") {
                MetricsError::Unavailable("metrics-server not available or pod unknown".to_string())
            } else {
                MetricsError::QueryFailed(format!("metrics API: {msg}"))
            }
        })?;

        let usage = response
            .containers
            .into_iter()
            .find(|c| c.name == container)
            .map(|c| c.usage)
            .ok_or_else(|| MetricsError::NoData {
                namespace: namespace.to_string(),
                pod: pod.to_string(),
                container: container.to_string(),
            })?;

        Ok(UsageSample {
            cpu_millicores: parse_cpu_usage(&usage.cpu),
            memory_bytes: parse_memory_usage(&usage.memory),
        })
    }

    async fn backend_available(&self) -> bool {
        let request = http::Request::builder()
            .method("GET")
            .uri("/apis/metrics.k8s.io/v1beta1")
            .body(Vec::new());
        match request {
            Ok(req) => self.client.request::<serde_json::Value>(req).await.is_ok(),
            Err(_) => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PodMetricsItem {
    #[serde(default)]
    containers: Vec<ContainerMetricsItem>,
}

#[derive(Debug, Deserialize)]
struct ContainerMetricsItem {
    name: String,
    usage: UsageQuantities,
}

#[derive(Debug, Deserialize)]
struct UsageQuantities {
    cpu: String,
    memory: String,
}

/// Parse an instantaneous CPU usage quantity ("100m", "1", "500000n") to
/// millicores. Usage strings come from the server, so malformed values
/// degrade to zero rather than failing the whole sample.
fn parse_cpu_usage(quantity: &str) -> u64 {
    crate::quantity::ResourceQuantity::parse_cpu(quantity)
        .map(|q| q.magnitude().max(0) as u64)
        .unwrap_or(0)
}

/// Parse an instantaneous memory usage quantity ("128Mi", "256000Ki") to
/// bytes.
fn parse_memory_usage(quantity: &str) -> u64 {
    crate::quantity::ResourceQuantity::parse_memory(quantity)
        .map(|q| q.magnitude().max(0) as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct ScriptedSampler {
        calls: AtomicU64,
    }

    #[async_trait]
    impl UsageSampler for ScriptedSampler {
        async fn sample(
            &self,
            _namespace: &str,
            _pod: &str,
            _container: &str,
        ) -> Result<UsageSample, MetricsError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(UsageSample {
                cpu_millicores: 100 + n * 10,
                memory_bytes: (64 + n) * 1024 * 1024,
            })
        }

        async fn backend_available(&self) -> bool {
            true
        }
    }

    fn provider(max_samples: u32, interval: Duration) -> PollingProvider {
        PollingProvider::new(
            Arc::new(ScriptedSampler {
                calls: AtomicU64::new(0),
            }),
            PollingConfig {
                max_samples,
                sample_interval: interval,
            },
        )
    }

    #[test]
    fn test_sample_count_bounded_by_max() {
        let p = provider(10, Duration::from_secs(15));
        // A 1-hour window would allow 240 samples; the cap holds at 10.
        assert_eq!(p.sample_count(Duration::from_secs(3600)), 10);
        // A short window yields fewer samples.
        assert_eq!(p.sample_count(Duration::from_secs(60)), 4);
        // Degenerate windows still take one sample.
        assert_eq!(p.sample_count(Duration::from_secs(1)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_clock_bounded_regardless_of_window() {
        let p = provider(4, Duration::from_secs(15));
        let started = tokio::time::Instant::now();
        let metrics = p
            .container_metrics("default", "web-0", "app", Duration::from_secs(86400))
            .await
            .unwrap();
        // 4 samples, 3 inter-sample waits: exactly (max_samples-1)*interval
        // of virtual time, no matter that the window was a full day.
        assert_eq!(started.elapsed(), Duration::from_secs(45));
        assert_eq!(metrics.cpu.samples, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_percentiles_are_monotone() {
        let p = provider(5, Duration::from_secs(15));
        let metrics = p
            .container_metrics("default", "web-0", "app", Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(metrics.cpu.p50.magnitude() <= metrics.cpu.p90.magnitude());
        assert!(metrics.cpu.p90.magnitude() <= metrics.cpu.p99.magnitude());
        assert!(metrics.memory.p50.magnitude() <= metrics.memory.p99.magnitude());
    }

    #[tokio::test]
    async fn test_sampler_error_propagates() {
        struct FailingSampler;

        #[async_trait]
        impl UsageSampler for FailingSampler {
            async fn sample(
                &self,
                _: &str,
                _: &str,
                _: &str,
            ) -> Result<UsageSample, MetricsError> {
                Err(MetricsError::Unavailable("no metrics-server".to_string()))
            }
            async fn backend_available(&self) -> bool {
                false
            }
        }

        let p = PollingProvider::new(Arc::new(FailingSampler), PollingConfig::default());
        assert!(p
            .container_metrics("default", "web-0", "app", Duration::from_secs(60))
            .await
            .is_err());
        assert!(p.health_check().await.is_err());
    }

    #[test]
    fn test_parse_usage_quantities() {
        assert_eq!(parse_cpu_usage("100m"), 100);
        assert_eq!(parse_cpu_usage("500000000n"), 500);
        assert_eq!(parse_cpu_usage("garbage"), 0);
        assert_eq!(parse_memory_usage("128Mi"), 128 * 1024 * 1024);
        assert_eq!(parse_memory_usage("garbage"), 0);
    }
}
