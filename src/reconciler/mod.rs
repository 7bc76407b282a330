//! Reconciliation engine.
//!
//! One reconcile tick per policy key: load, validate, discover matching
//! workloads, collect per-container statistics, compute bounded
//! recommendations, and in Automatic mode apply them. Every workload
//! contributes a status record; one workload's failure never aborts the
//! tick. The upstream controller runtime serializes ticks per policy key,
//! so status writes for a policy are naturally single-writer.

pub mod annotations;
pub mod status;

use crate::apply::{self, ApplyError};
use crate::cache::{metrics_cache_key, TtlCache};
use crate::cluster::{
    in_place_resize_supported, ClusterReader, ClusterWriter, PolicyReader, VersionProbe,
};
use crate::discovery::discover;
use crate::duration::parse_duration;
use crate::error::{Error, Result};
use crate::events::{ControllerEvent, EventReason, EventSink};
use crate::metrics::{ContainerMetrics, MetricsProvider, ProviderSource};
use crate::observability;
use crate::policy::selector::select_best_policy;
use crate::policy::validation::validate_on_create;
use crate::policy::{
    ContainerRecommendationRecord, OptimizationPolicy, PolicyMode, WorkloadKind, WorkloadOutcome,
    WorkloadStatusRecord, DEFAULT_RECONCILIATION_INTERVAL,
};
use crate::recommender::{self, Recommendation};
use crate::workload::Workload;
use annotations::AnnotationWriter;
use chrono::{DateTime, Utc};
use status::{build_status, outcome_count, ready_condition};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default rolling window when the policy does not set one.
pub const DEFAULT_METRICS_WINDOW: Duration = Duration::from_secs(3600);
/// Default TTL for both process caches.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Process-level settings shared by every tick.
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Overrides Automatic mode with Skip everywhere.
    pub global_dry_run: bool,
    /// Requeue interval when the policy does not set one.
    pub default_interval: Duration,
    /// Rolling window when the policy does not set one.
    pub default_window: Duration,
    /// Annotation prefix for managed workloads.
    pub annotation_prefix: String,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            global_dry_run: false,
            default_interval: DEFAULT_RECONCILIATION_INTERVAL,
            default_window: DEFAULT_METRICS_WINDOW,
            annotation_prefix: annotations::DEFAULT_ANNOTATION_PREFIX.to_string(),
        }
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub requeue_after: Option<Duration>,
}

/// The reconciler owns the caches and engines; engines own stateless
/// strategies. All cluster access goes through capability traits.
pub struct Reconciler {
    policies: Arc<dyn PolicyReader>,
    reader: Arc<dyn ClusterReader>,
    writer: Arc<dyn ClusterWriter>,
    version: Arc<dyn VersionProbe>,
    providers: Arc<dyn ProviderSource>,
    events: Arc<dyn EventSink>,
    annotations: AnnotationWriter,
    workload_cache: TtlCache<Vec<Workload>>,
    metrics_cache: TtlCache<ContainerMetrics>,
    settings: ReconcilerSettings,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        policies: Arc<dyn PolicyReader>,
        reader: Arc<dyn ClusterReader>,
        writer: Arc<dyn ClusterWriter>,
        version: Arc<dyn VersionProbe>,
        providers: Arc<dyn ProviderSource>,
        events: Arc<dyn EventSink>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            policies,
            reader,
            writer,
            version,
            providers,
            events,
            annotations: AnnotationWriter::new(settings.annotation_prefix.clone()),
            workload_cache: TtlCache::new(DEFAULT_CACHE_TTL),
            metrics_cache: TtlCache::new(DEFAULT_CACHE_TTL),
            settings,
        }
    }

    /// Run one reconcile tick for the policy at `{namespace}/{name}`.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        let started = Instant::now();
        let key = format!("{namespace}/{name}");

        let Some(policy) = self.policies.get_policy(namespace, name).await? else {
            // Observed deletion: nothing to do beyond dropping cached state.
            self.workload_cache.invalidate(&key);
            log::debug!("policy {key} is gone, nothing to reconcile");
            return Ok(ReconcileOutcome {
                requeue_after: None,
            });
        };

        let now = Utc::now();

        if let Err(validation_err) = validate_on_create(&policy.spec) {
            let condition = ready_condition(
                false,
                "ValidationFailed",
                &validation_err.to_string(),
                now,
            );
            let status = build_status(condition, Vec::new(), 0, now);
            if let Err(e) = self.writer.patch_policy_status(&policy, &status).await {
                log::warn!("failed to record validation failure on {key}: {e}");
            }
            self.events
                .publish(
                    &policy,
                    ControllerEvent::warning(
                        EventReason::ValidationFailed,
                        format!("policy rejected: {validation_err}"),
                        "fix the policy spec and re-apply it",
                    ),
                )
                .await;
            observability::RECONCILIATION_ERRORS
                .with_label_values(&[name, "validation"])
                .inc();
            // The user must fix the policy; no requeue.
            return Ok(ReconcileOutcome {
                requeue_after: None,
            });
        }

        let discovered = match self
            .workload_cache
            .get_or_fetch(&key, || discover(self.reader.as_ref(), &policy))
            .await
        {
            Ok(workloads) => workloads,
            Err(discovery_err) => {
                self.events
                    .publish(
                        &policy,
                        ControllerEvent::warning(
                            EventReason::UpdateFailed,
                            format!("workload discovery failed: {discovery_err}"),
                            "check the controller's list permissions and the cluster API health",
                        ),
                    )
                    .await;
                observability::RECONCILIATION_ERRORS
                    .with_label_values(&[name, "discovery"])
                    .inc();
                return Err(discovery_err.into());
            }
        };

        let cluster_version = match self.version.server_version().await {
            Ok(version) => version,
            Err(e) => {
                // In-place resize stays off when the probe fails; the tick
                // still proceeds with the remaining strategies.
                log::warn!("version probe failed for {key}: {e}");
                ("0".to_string(), "0".to_string())
            }
        };

        // The policy names its metrics provider; construction failures
        // (unknown name, missing endpoint, failed fallback) skip every
        // workload this tick rather than failing the reconcile.
        let provider = match self
            .providers
            .provider_for(&policy.spec.metrics_config.provider)
        {
            Ok(provider) => Some(provider),
            Err(e) => {
                self.events
                    .publish(
                        &policy,
                        ControllerEvent::warning(
                            EventReason::MetricsCollectionFailed,
                            format!("metrics provider unavailable: {e}"),
                            "check the policy's provider name and the provider endpoint configuration",
                        ),
                    )
                    .await;
                observability::RECONCILIATION_ERRORS
                    .with_label_values(&[name, "metrics"])
                    .inc();
                None
            }
        };

        // A single policy governs each workload; when several match, the
        // highest weight wins with an ascending-name tiebreak.
        let all_policies = match self.policies.list_policies().await {
            Ok(policies) => policies,
            Err(e) => {
                log::warn!("listing policies for contention check on {key}: {e}");
                vec![policy.clone()]
            }
        };

        let mut records = Vec::with_capacity(discovered.len());
        for workload in &discovered {
            let governing = select_best_policy(&all_policies, workload);
            if let Some(winner) = governing {
                if winner.key() != policy.key() {
                    records.push(WorkloadStatusRecord {
                        kind: workload.kind,
                        namespace: workload.namespace.clone(),
                        name: workload.name.clone(),
                        outcome: WorkloadOutcome::Skipped,
                        reason: Some(format!(
                            "governed by higher-priority policy {}",
                            winner.key()
                        )),
                        last_recommendation_at: None,
                        last_applied_at: None,
                        last_apply_method: None,
                        field_ownership: false,
                        containers: Vec::new(),
                    });
                    continue;
                }
            }

            let record = self
                .process_workload(&policy, workload, provider.as_ref(), &cluster_version, now)
                .await;
            records.push(record);
        }

        self.update_gauges(&policy, discovered.len(), &records);

        let condition = ready_condition(true, "Reconciled", "policy reconciled", now);
        let status = build_status(condition, records, discovered.len() as u32, now);
        self.writer.patch_policy_status(&policy, &status).await?;

        observability::RECONCILIATION_DURATION
            .with_label_values(&[name])
            .observe(started.elapsed().as_secs_f64());

        // Recommend mode deliberately uses the same interval as Automatic.
        let requeue_after = policy
            .spec
            .reconciliation_interval
            .as_deref()
            .and_then(|raw| parse_duration(raw).ok())
            .unwrap_or(self.settings.default_interval);

        Ok(ReconcileOutcome {
            requeue_after: Some(requeue_after),
        })
    }

    /// Process one workload; failures land in its status record only.
    async fn process_workload(
        &self,
        policy: &OptimizationPolicy,
        workload: &Workload,
        provider: Option<&Arc<dyn MetricsProvider>>,
        cluster_version: &(String, String),
        now: DateTime<Utc>,
    ) -> WorkloadStatusRecord {
        let mut record = WorkloadStatusRecord {
            kind: workload.kind,
            namespace: workload.namespace.clone(),
            name: workload.name.clone(),
            outcome: WorkloadOutcome::Skipped,
            reason: None,
            last_recommendation_at: None,
            last_applied_at: None,
            last_apply_method: None,
            field_ownership: false,
            containers: Vec::new(),
        };

        if policy.spec.mode == PolicyMode::Disabled {
            record.reason = Some("policy disabled".to_string());
            self.events
                .publish(
                    policy,
                    ControllerEvent::normal(
                        EventReason::WorkloadSkipped,
                        format!("{workload} skipped: policy disabled"),
                    ),
                )
                .await;
            return record;
        }

        let containers = workload.containers();
        if containers.is_empty() {
            record.reason = Some("no containers in pod template".to_string());
            return record;
        }

        // Provider construction failed for this tick; the event was already
        // published once at the policy level.
        let Some(provider) = provider else {
            record.reason = Some("missing metrics".to_string());
            return record;
        };

        let Some(pod) = self.pod_identity(workload).await else {
            record.reason = Some("missing metrics".to_string());
            self.events
                .publish(
                    policy,
                    ControllerEvent::warning(
                        EventReason::MetricsCollectionFailed,
                        format!("{workload}: no running pod found for metrics collection"),
                        "check that the workload has ready pods matching its selector",
                    ),
                )
                .await;
            observability::RECONCILIATION_ERRORS
                .with_label_values(&[&policy.name_unchecked(), "metrics"])
                .inc();
            return record;
        };

        let window = policy
            .spec
            .metrics_config
            .window
            .as_deref()
            .and_then(|raw| parse_duration(raw).ok())
            .unwrap_or(self.settings.default_window);

        // Collect metrics and compute recommendations per container. A
        // metrics failure on one container is accumulated and the remaining
        // containers still get collected; any failure skips the workload.
        let mut recommendations: BTreeMap<String, Recommendation> = BTreeMap::new();
        let mut metrics_failures = Vec::new();
        for container in &containers {
            let cache_key = metrics_cache_key(&workload.namespace, &pod, &container.name);
            let collection_started = Instant::now();
            let collected = self
                .metrics_cache
                .get_or_fetch(&cache_key, || {
                    provider.container_metrics(&workload.namespace, &pod, &container.name, window)
                })
                .await;
            observability::METRICS_COLLECTION_DURATION
                .with_label_values(&[provider.name()])
                .observe(collection_started.elapsed().as_secs_f64());

            let metrics = match collected {
                Ok(metrics) => metrics,
                Err(e) => {
                    metrics_failures.push(format!("{}: {e}", container.name));
                    continue;
                }
            };

            match recommender::compute(&metrics, &policy.spec) {
                Ok(rec) => {
                    observability::RECOMMENDATIONS_TOTAL
                        .with_label_values(&[&policy.name_unchecked()])
                        .inc();
                    recommendations.insert(container.name.clone(), rec);
                }
                Err(e) => {
                    let error: Error = e.into();
                    observability::RECONCILIATION_ERRORS
                        .with_label_values(&[&policy.name_unchecked(), error.error_type()])
                        .inc();
                    record.outcome = WorkloadOutcome::Error;
                    record.reason = Some(format!(
                        "recommendation failed for container {}: {error}",
                        container.name
                    ));
                    return record;
                }
            }
        }

        if !metrics_failures.is_empty() {
            record.reason = Some("missing metrics".to_string());
            self.events
                .publish(
                    policy,
                    ControllerEvent::warning(
                        EventReason::MetricsCollectionFailed,
                        format!(
                            "{workload}: metrics unavailable for {}",
                            metrics_failures.join("; ")
                        ),
                        "check the metrics provider's health and the policy's provider name",
                    ),
                )
                .await;
            observability::RECONCILIATION_ERRORS
                .with_label_values(&[&policy.name_unchecked(), "metrics"])
                .inc();
            return record;
        }

        record.containers = match self.container_records(&recommendations, policy) {
            Ok(records) => records,
            Err(e) => {
                let error: Error = e.into();
                observability::RECONCILIATION_ERRORS
                    .with_label_values(&[&policy.name_unchecked(), error.error_type()])
                    .inc();
                record.outcome = WorkloadOutcome::Error;
                record.reason = Some(error.to_string());
                return record;
            }
        };

        match policy.spec.mode {
            PolicyMode::Recommend => {
                record.outcome = WorkloadOutcome::Recommended;
                record.last_recommendation_at = Some(now.to_rfc3339());
                self.events
                    .publish(
                        policy,
                        ControllerEvent::normal(
                            EventReason::RecommendationGenerated,
                            format!("{workload}: recommendation recorded"),
                        ),
                    )
                    .await;
                self.annotate(policy, workload, &record.containers, false, now)
                    .await;
            }
            PolicyMode::Automatic => {
                self.apply_workload(
                    policy,
                    workload,
                    &recommendations,
                    cluster_version,
                    now,
                    &mut record,
                )
                .await;
            }
            PolicyMode::Disabled => unreachable!("handled above"),
        }

        record
    }

    /// Decide and apply in Automatic mode, filling in the status record.
    async fn apply_workload(
        &self,
        policy: &OptimizationPolicy,
        workload: &Workload,
        recommendations: &BTreeMap<String, Recommendation>,
        cluster_version: &(String, String),
        now: DateTime<Utc>,
        record: &mut WorkloadStatusRecord,
    ) {
        let decision = match apply::can_apply(
            workload,
            recommendations,
            policy,
            (&cluster_version.0, &cluster_version.1),
            self.settings.global_dry_run,
        ) {
            Ok(decision) => decision,
            Err(e) => {
                let error: Error = e.into();
                observability::RECONCILIATION_ERRORS
                    .with_label_values(&[&policy.name_unchecked(), error.error_type()])
                    .inc();
                record.outcome = WorkloadOutcome::Error;
                record.reason = Some(error.to_string());
                return;
            }
        };

        if !decision.can_apply {
            record.outcome = WorkloadOutcome::Skipped;
            record.reason = Some(decision.reason.clone());
            record.last_recommendation_at = Some(now.to_rfc3339());

            let wanted_in_place = policy
                .spec
                .update_strategy
                .as_ref()
                .and_then(|s| s.allow_in_place_resize)
                .unwrap_or(false);
            if decision.reason == "no update strategy available"
                && wanted_in_place
                && !in_place_resize_supported(&cluster_version.0, &cluster_version.1)
            {
                self.events
                    .publish(
                        policy,
                        ControllerEvent::warning(
                            EventReason::InPlaceResizeUnavailable,
                            format!(
                                "{workload}: cluster {}.{} does not support in-place pod resize",
                                cluster_version.0, cluster_version.1
                            ),
                            "upgrade the cluster to 1.29+ or allow recreate in the update strategy",
                        ),
                    )
                    .await;
            } else {
                self.events
                    .publish(
                        policy,
                        ControllerEvent::normal(
                            EventReason::WorkloadSkipped,
                            format!("{workload} skipped: {}", decision.reason),
                        ),
                    )
                    .await;
            }

            // A recommendation exists even when application is skipped.
            self.annotate(policy, workload, &record.containers, false, now)
                .await;
            return;
        }

        let prior_owner = apply::prior_resource_owner(workload);
        let mut applied_method = None;
        for (container, rec) in recommendations {
            match apply::apply(self.writer.as_ref(), workload, container, rec, policy).await {
                Ok(result) => {
                    observability::SSA_PATCH_TOTAL
                        .with_label_values(&[
                            &policy.name_unchecked(),
                            &workload.namespace,
                            &workload.name,
                            workload.kind.as_str(),
                            "success",
                            result.method,
                        ])
                        .inc();
                    record.field_ownership = result.field_ownership;
                    applied_method = Some(result.method);
                }
                Err(e) => {
                    let method = if policy
                        .spec
                        .update_strategy
                        .clone()
                        .unwrap_or_default()
                        .uses_field_ownership()
                    {
                        apply::METHOD_FIELD_OWNERSHIP
                    } else {
                        apply::METHOD_STRATEGIC_MERGE
                    };
                    observability::SSA_PATCH_TOTAL
                        .with_label_values(&[
                            &policy.name_unchecked(),
                            &workload.namespace,
                            &workload.name,
                            workload.kind.as_str(),
                            "failure",
                            method,
                        ])
                        .inc();
                    self.publish_apply_failure(policy, workload, container, &e).await;
                    let error: Error = e.into();
                    observability::RECONCILIATION_ERRORS
                        .with_label_values(&[&policy.name_unchecked(), error.error_type()])
                        .inc();
                    record.outcome = WorkloadOutcome::Error;
                    record.reason = Some(error.to_string());
                    // Remaining containers still get their patch attempts.
                }
            }
        }

        if record.outcome == WorkloadOutcome::Error {
            return;
        }

        let method = applied_method.unwrap_or(apply::METHOD_FIELD_OWNERSHIP);
        record.outcome = WorkloadOutcome::Applied;
        record.last_recommendation_at = Some(now.to_rfc3339());
        record.last_applied_at = Some(now.to_rfc3339());
        record.last_apply_method = Some(method.to_string());

        observability::APPLICATIONS_TOTAL
            .with_label_values(&[&policy.name_unchecked(), method])
            .inc();

        if record.field_ownership {
            if let Some(owner) = prior_owner {
                self.events
                    .publish(
                        policy,
                        ControllerEvent::normal(
                            EventReason::SsaOwnershipTaken,
                            format!(
                                "{workload}: took ownership of container resources from {owner}"
                            ),
                        ),
                    )
                    .await;
            }
        }

        self.events
            .publish(
                policy,
                ControllerEvent::normal(
                    EventReason::UpdateSuccess,
                    format!("{workload}: resource requests updated via {method}"),
                ),
            )
            .await;

        self.annotate(policy, workload, &record.containers, true, now)
            .await;
    }

    /// Pod identity for metrics collection: StatefulSets address their first
    /// ordinal; other kinds take any one pod matching the workload selector.
    async fn pod_identity(&self, workload: &Workload) -> Option<String> {
        if workload.kind == WorkloadKind::StatefulSet {
            return Some(format!("{}-0", workload.name));
        }
        let selector = workload.pod_selector();
        match self
            .reader
            .list_pods(&workload.namespace, &selector, 1)
            .await
        {
            Ok(pods) => pods.into_iter().next(),
            Err(e) => {
                log::warn!("listing pods for {workload}: {e}");
                None
            }
        }
    }

    fn container_records(
        &self,
        recommendations: &BTreeMap<String, Recommendation>,
        policy: &OptimizationPolicy,
    ) -> std::result::Result<Vec<ContainerRecommendationRecord>, ApplyError> {
        recommendations
            .iter()
            .map(|(container, rec)| {
                let limits = apply::recommended_limits(rec, policy)?;
                Ok(ContainerRecommendationRecord {
                    container: container.clone(),
                    cpu_request: rec.cpu.to_string(),
                    memory_request: rec.memory.to_string(),
                    cpu_limit: limits.map(|(cpu, _)| cpu.to_string()),
                    memory_limit: limits.map(|(_, memory)| memory.to_string()),
                })
            })
            .collect()
    }

    async fn annotate(
        &self,
        policy: &OptimizationPolicy,
        workload: &Workload,
        containers: &[ContainerRecommendationRecord],
        applied: bool,
        now: DateTime<Utc>,
    ) {
        let map = self
            .annotations
            .build(&policy.name_unchecked(), containers, applied, now);
        if let Err(e) = self
            .annotations
            .write(self.writer.as_ref(), workload, &map, now)
            .await
        {
            log::warn!("annotating {workload}: {e}");
        }
    }

    async fn publish_apply_failure(
        &self,
        policy: &OptimizationPolicy,
        workload: &Workload,
        container: &str,
        err: &ApplyError,
    ) {
        let event = match err {
            ApplyError::Permission(m) => ControllerEvent::warning(
                EventReason::RbacError,
                format!("{workload} container {container}: {m}"),
                "grant the controller patch permission on the workload kind",
            ),
            ApplyError::Conflict(m) => ControllerEvent::warning(
                EventReason::SsaConflict,
                format!("{workload} container {container}: {m}"),
                "check for another controller managing the same resource fields",
            ),
            other => ControllerEvent::warning(
                EventReason::UpdateFailed,
                format!("{workload} container {container}: {other}"),
                "inspect the patch rejection message and the workload's spec",
            ),
        };
        self.events.publish(policy, event).await;
    }

    fn update_gauges(
        &self,
        policy: &OptimizationPolicy,
        discovered: usize,
        records: &[WorkloadStatusRecord],
    ) {
        let namespace = policy.metadata.namespace.clone().unwrap_or_default();
        let name = policy.name_unchecked();

        observability::WORKLOADS_MONITORED
            .with_label_values(&[&namespace, &name])
            .set(discovered as i64);
        observability::WORKLOADS_UPDATED
            .with_label_values(&[&namespace, &name])
            .set(outcome_count(records, WorkloadOutcome::Applied) as i64);

        let mut skip_reasons: BTreeMap<&str, i64> = BTreeMap::new();
        for record in records {
            if record.outcome == WorkloadOutcome::Skipped {
                *skip_reasons
                    .entry(record.reason.as_deref().unwrap_or("unknown"))
                    .or_default() += 1;
            }
        }
        for (reason, count) in skip_reasons {
            observability::WORKLOADS_SKIPPED
                .with_label_values(&[&namespace, &name, reason])
                .set(count);
        }
    }

    /// Drop all cached discovery and metrics state.
    pub fn invalidate_caches(&self) {
        self.workload_cache.invalidate_all();
        self.metrics_cache.invalidate_all();
    }
}
