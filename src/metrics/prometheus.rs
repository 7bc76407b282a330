//! Range-query metrics provider for historical backends.
//!
//! Issues a Prometheus range query for `[now - window, now]` with a 30 s
//! step, converts the returned series to canonical integer units (CPU core
//! seconds rate * 1000 -> millicores; the memory byte gauge stays in bytes)
//! and feeds the percentile engine. An empty series is an error, not a pair
//! of zero statistics.

use super::{ContainerMetrics, MetricsError, MetricsProvider, ResourceMetrics};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Range query step.
const QUERY_STEP_SECONDS: u64 = 30;

/// Provider backed by a Prometheus-compatible range-query API.
#[derive(Debug)]
pub struct RangeQueryProvider {
    base_url: String,
    http_client: Client,
}

impl RangeQueryProvider {
    pub fn new(url: &str) -> Result<Self, MetricsError> {
        let base_url = url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(MetricsError::Unavailable(format!(
                "Prometheus URL must start with http:// or https://: {url}"
            )));
        }

        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MetricsError::Unavailable(format!("building HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            http_client,
        })
    }

    /// Run a range query over the window and collect finite sample values.
    async fn query_range(&self, query: &str, window: Duration) -> Result<Vec<f64>, MetricsError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let start = now.saturating_sub(window.as_secs());

        let url = format!(
            "{}/api/v1/query_range?query={}&start={}&end={}&step={}s",
            self.base_url,
            urlencoding::encode(query),
            start,
            now,
            QUERY_STEP_SECONDS
        );

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| MetricsError::Unavailable(format!("Prometheus request: {e}")))?;

        if !response.status().is_success() {
            return Err(MetricsError::QueryFailed(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let body: PrometheusResponse = response
            .json()
            .await
            .map_err(|e| MetricsError::Parse(format!("Prometheus response: {e}")))?;

        if body.status != "success" {
            return Err(MetricsError::QueryFailed(
                body.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        let mut values = Vec::new();
        if let Some(result) = body.data.result {
            for series in result {
                for (_, value) in series.values.unwrap_or_default() {
                    if let Ok(v) = value.parse::<f64>() {
                        if v.is_finite() && v >= 0.0 {
                            values.push(v);
                        }
                    }
                }
            }
        }

        Ok(values)
    }
}

#[async_trait]
impl MetricsProvider for RangeQueryProvider {
    fn name(&self) -> &'static str {
        super::PROVIDER_PROMETHEUS
    }

    async fn container_metrics(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        window: Duration,
    ) -> Result<ContainerMetrics, MetricsError> {
        let cpu_query = format!(
            r#"rate(container_cpu_usage_seconds_total{{namespace="{namespace}", pod="{pod}", container="{container}"}}[5m])"#
        );
        let memory_query = format!(
            r#"container_memory_working_set_bytes{{namespace="{namespace}", pod="{pod}", container="{container}"}}"#
        );

        let cpu_values = self.query_range(&cpu_query, window).await?;
        let memory_values = self.query_range(&memory_query, window).await?;

        series_to_metrics(namespace, pod, container, &cpu_values, &memory_values)
    }

    async fn health_check(&self) -> Result<(), MetricsError> {
        let url = format!("{}/-/healthy", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| MetricsError::Unavailable(format!("Prometheus health: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(MetricsError::Unavailable(format!(
                "Prometheus health endpoint returned HTTP {}",
                response.status()
            )))
        }
    }
}

/// Convert the two raw value series to percentile statistics.
///
/// Either series coming back empty is an error on its own: a missing memory
/// gauge with CPU data still present (or the reverse) must never degrade to
/// zero-valued statistics.
fn series_to_metrics(
    namespace: &str,
    pod: &str,
    container: &str,
    cpu_values: &[f64],
    memory_values: &[f64],
) -> Result<ContainerMetrics, MetricsError> {
    if cpu_values.is_empty() || memory_values.is_empty() {
        return Err(MetricsError::NoData {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            container: container.to_string(),
        });
    }

    // Core-seconds rate to integer millicores; byte gauge stays bytes.
    let cpu_samples: Vec<u64> = cpu_values.iter().map(|v| (v * 1000.0) as u64).collect();
    let memory_samples: Vec<u64> = memory_values.iter().map(|v| *v as u64).collect();

    Ok(ContainerMetrics {
        cpu: ResourceMetrics::from_cpu_samples(&cpu_samples),
        memory: ResourceMetrics::from_memory_samples(&memory_samples),
    })
}

// ============================================================================
// Prometheus API response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct PrometheusResponse {
    status: String,
    error: Option<String>,
    data: PrometheusData,
}

#[derive(Debug, Deserialize)]
struct PrometheusData {
    result: Option<Vec<PrometheusResult>>,
}

#[derive(Debug, Deserialize)]
struct PrometheusResult {
    #[allow(dead_code)]
    #[serde(default)]
    metric: HashMap<String, String>,
    values: Option<Vec<(f64, String)>>,
}
