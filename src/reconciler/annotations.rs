//! Recommendation annotations on managed workloads.
//!
//! Annotation keys share a single installation-defined prefix. Writes retry
//! on optimistic-concurrency conflicts with exponential backoff and jitter,
//! and are skipped entirely when another write landed within the last 30
//! seconds to avoid write storms on busy objects.

use crate::cluster::{ClusterError, ClusterWriter};
use crate::policy::ContainerRecommendationRecord;
use crate::workload::Workload;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::BTreeMap;
use std::time::Duration;

/// Default annotation prefix.
pub const DEFAULT_ANNOTATION_PREFIX: &str = "optipod.dev";

const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_FACTOR: f64 = 2.0;
const BACKOFF_JITTER: f64 = 0.1;
const BACKOFF_MAX: Duration = Duration::from_secs(5);
const BACKOFF_ATTEMPTS: u32 = 5;

/// Minimum spacing between annotation writes to one workload, in seconds.
const WRITE_SPACING_SECONDS: i64 = 30;

/// Builds and writes recommendation annotations under one prefix.
pub struct AnnotationWriter {
    prefix: String,
}

impl AnnotationWriter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn key(&self, suffix: &str) -> String {
        format!("{}/{}", self.prefix, suffix)
    }

    /// Build the full annotation map for a workload.
    pub fn build(
        &self,
        policy_name: &str,
        containers: &[ContainerRecommendationRecord],
        applied: bool,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        annotations.insert(self.key("managed"), "true".to_string());
        annotations.insert(self.key("policy"), policy_name.to_string());
        annotations.insert(self.key("last-recommendation"), now.to_rfc3339());
        if applied {
            annotations.insert(self.key("last-applied"), now.to_rfc3339());
        }

        for record in containers {
            let container = &record.container;
            annotations.insert(
                self.key(&format!("recommendation.{container}.cpu-request")),
                record.cpu_request.clone(),
            );
            annotations.insert(
                self.key(&format!("recommendation.{container}.memory-request")),
                record.memory_request.clone(),
            );
            if let Some(cpu_limit) = &record.cpu_limit {
                annotations.insert(
                    self.key(&format!("recommendation.{container}.cpu-limit")),
                    cpu_limit.clone(),
                );
            }
            if let Some(memory_limit) = &record.memory_limit {
                annotations.insert(
                    self.key(&format!("recommendation.{container}.memory-limit")),
                    memory_limit.clone(),
                );
            }
        }

        annotations
    }

    /// Whether a write landed on this workload recently enough to skip.
    pub fn recently_written(&self, workload: &Workload, now: DateTime<Utc>) -> bool {
        workload
            .annotation(&self.key("last-recommendation"))
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|at| {
                now.signed_duration_since(at) < chrono::TimeDelta::seconds(WRITE_SPACING_SECONDS)
            })
            .unwrap_or(false)
    }

    /// Write annotations, retrying conflicts with exponential backoff.
    /// Returns `false` when the write was skipped due to write spacing.
    pub async fn write<W: ClusterWriter + ?Sized>(
        &self,
        writer: &W,
        workload: &Workload,
        annotations: &BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<bool, ClusterError> {
        if self.recently_written(workload, now) {
            log::debug!(
                "skipping annotation update on {}: another write within the last 30s",
                workload.id()
            );
            return Ok(false);
        }

        let mut delay = BACKOFF_BASE;
        let mut last_err = None;
        for attempt in 0..BACKOFF_ATTEMPTS {
            match writer.annotate_workload(workload, annotations).await {
                Ok(()) => return Ok(true),
                Err(ClusterError::Conflict(message)) => {
                    log::debug!(
                        "annotation conflict on {} (attempt {}): {}",
                        workload.id(),
                        attempt + 1,
                        message
                    );
                    last_err = Some(ClusterError::Conflict(message));
                    tokio::time::sleep(jittered(delay)).await;
                    delay = Duration::from_secs_f64(
                        (delay.as_secs_f64() * BACKOFF_FACTOR).min(BACKOFF_MAX.as_secs_f64()),
                    );
                }
                Err(other) => return Err(other),
            }
        }

        Err(last_err.unwrap_or_else(|| ClusterError::Conflict("retries exhausted".to_string())))
    }
}

impl Default for AnnotationWriter {
    fn default() -> Self {
        Self::new(DEFAULT_ANNOTATION_PREFIX)
    }
}

fn jittered(delay: Duration) -> Duration {
    let jitter = rand::rng().random_range(-BACKOFF_JITTER..=BACKOFF_JITTER);
    Duration::from_secs_f64((delay.as_secs_f64() * (1.0 + jitter)).max(0.0))
}
