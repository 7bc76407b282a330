//! Controller metrics.
//!
//! A process-wide registry of gauges, histograms and counters. Metric names
//! are stable across releases; the scrape endpoint itself is wired outside
//! the core via [`registry`].

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, HistogramVec, IntCounterVec, IntGaugeVec, Registry,
};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Workloads currently matched per (namespace, policy).
pub static WORKLOADS_MONITORED: Lazy<IntGaugeVec> = Lazy::new(|| {
    let gauge = IntGaugeVec::new(
        opts!("workloads_monitored", "Workloads matched by a policy"),
        &["namespace", "policy"],
    )
    .expect("valid metric definition");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("metric registered once");
    gauge
});

/// Workloads updated during the last tick per (namespace, policy).
pub static WORKLOADS_UPDATED: Lazy<IntGaugeVec> = Lazy::new(|| {
    let gauge = IntGaugeVec::new(
        opts!("workloads_updated", "Workloads updated by a policy"),
        &["namespace", "policy"],
    )
    .expect("valid metric definition");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("metric registered once");
    gauge
});

/// Workloads skipped during the last tick per (namespace, policy, reason).
pub static WORKLOADS_SKIPPED: Lazy<IntGaugeVec> = Lazy::new(|| {
    let gauge = IntGaugeVec::new(
        opts!("workloads_skipped", "Workloads skipped by a policy"),
        &["namespace", "policy", "reason"],
    )
    .expect("valid metric definition");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("metric registered once");
    gauge
});

/// Reconciliation wall-clock per policy.
pub static RECONCILIATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        histogram_opts!(
            "reconciliation_duration_seconds",
            "Duration of one reconciliation tick"
        ),
        &["policy"],
    )
    .expect("valid metric definition");
    REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("metric registered once");
    histogram
});

/// Metrics-collection wall-clock per provider.
pub static METRICS_COLLECTION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        histogram_opts!(
            "metrics_collection_duration_seconds",
            "Duration of one per-container metrics collection"
        ),
        &["provider"],
    )
    .expect("valid metric definition");
    REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("metric registered once");
    histogram
});

/// Reconciliation errors per (policy, error_type).
pub static RECONCILIATION_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        opts!("reconciliation_errors_total", "Reconciliation errors"),
        &["policy", "error_type"],
    )
    .expect("valid metric definition");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric registered once");
    counter
});

/// Recommendations computed per policy.
pub static RECOMMENDATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        opts!("recommendations_total", "Recommendations computed"),
        &["policy"],
    )
    .expect("valid metric definition");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric registered once");
    counter
});

/// Applications per (policy, method).
pub static APPLICATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        opts!("applications_total", "Recommendations applied"),
        &["policy", "method"],
    )
    .expect("valid metric definition");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric registered once");
    counter
});

/// Patch attempts per (policy, namespace, workload, kind, status,
/// patch_type), where status is "success" or "failure" and patch_type is
/// "FieldOwnershipApply" or "StrategicMergePatch".
pub static SSA_PATCH_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        opts!("ssa_patch_total", "Workload patch attempts"),
        &["policy", "namespace", "workload", "kind", "status", "patch_type"],
    )
    .expect("valid metric definition");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric registered once");
    counter
});

/// The process-wide registry, for scrape-endpoint wiring.
pub fn registry() -> &'static Registry {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_stable() {
        WORKLOADS_MONITORED
            .with_label_values(&["default", "p"])
            .set(3);
        WORKLOADS_UPDATED.with_label_values(&["default", "p"]).set(1);
        WORKLOADS_SKIPPED
            .with_label_values(&["default", "p", "missing metrics"])
            .set(1);
        RECONCILIATION_ERRORS
            .with_label_values(&["p", "metrics"])
            .inc();
        RECOMMENDATIONS_TOTAL.with_label_values(&["p"]).inc();
        APPLICATIONS_TOTAL
            .with_label_values(&["p", "FieldOwnershipApply"])
            .inc();
        SSA_PATCH_TOTAL
            .with_label_values(&[
                "p",
                "default",
                "web",
                "Deployment",
                "success",
                "FieldOwnershipApply",
            ])
            .inc();
        RECONCILIATION_DURATION
            .with_label_values(&["p"])
            .observe(0.25);
        METRICS_COLLECTION_DURATION
            .with_label_values(&["metrics-server"])
            .observe(1.5);

        let families = registry().gather();
        let names: Vec<&str> = families.iter().map(|f| f.get_name()).collect();
        for expected in [
            "workloads_monitored",
            "workloads_updated",
            "workloads_skipped",
            "reconciliation_duration_seconds",
            "metrics_collection_duration_seconds",
            "reconciliation_errors_total",
            "recommendations_total",
            "applications_total",
            "ssa_patch_total",
        ] {
            assert!(names.contains(&expected), "missing metric {expected}");
        }
    }
}
