//! Observed-state assembly for the policy status sub-object.

use crate::policy::{
    OptimizationPolicyStatus, PolicyCondition, WorkloadOutcome, WorkloadStatusRecord,
    WorkloadTypeCount, CONDITION_READY,
};
use chrono::{DateTime, Utc};

/// Build a Ready condition.
pub fn ready_condition(
    ready: bool,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) -> PolicyCondition {
    PolicyCondition {
        type_: CONDITION_READY.to_string(),
        status: if ready { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: now.to_rfc3339(),
    }
}

/// Assemble the full status from per-workload records.
pub fn build_status(
    condition: PolicyCondition,
    records: Vec<WorkloadStatusRecord>,
    total_discovered: u32,
    now: DateTime<Utc>,
) -> OptimizationPolicyStatus {
    let mut counts = WorkloadTypeCount::default();
    for record in &records {
        counts.record(record.kind);
    }

    OptimizationPolicyStatus {
        conditions: vec![condition],
        total_processed: records.len() as u32,
        total_discovered,
        workload_counts: Some(counts),
        workloads: records,
        last_reconcile_time: Some(now.to_rfc3339()),
    }
}

/// Count records by outcome, for gauge updates.
pub fn outcome_count(records: &[WorkloadStatusRecord], outcome: WorkloadOutcome) -> usize {
    records.iter().filter(|r| r.outcome == outcome).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::WorkloadKind;

    fn record(kind: WorkloadKind, outcome: WorkloadOutcome) -> WorkloadStatusRecord {
        WorkloadStatusRecord {
            kind,
            namespace: "default".to_string(),
            name: "w".to_string(),
            outcome,
            reason: None,
            last_recommendation_at: None,
            last_applied_at: None,
            last_apply_method: None,
            field_ownership: false,
            containers: vec![],
        }
    }

    #[test]
    fn test_ready_condition() {
        let c = ready_condition(true, "Reconciled", "ok", Utc::now());
        assert_eq!(c.type_, "Ready");
        assert_eq!(c.status, "True");

        let c = ready_condition(false, "ValidationFailed", "bad bounds", Utc::now());
        assert_eq!(c.status, "False");
        assert_eq!(c.reason, "ValidationFailed");
    }

    #[test]
    fn test_build_status_counts_types() {
        let records = vec![
            record(WorkloadKind::Deployment, WorkloadOutcome::Applied),
            record(WorkloadKind::Deployment, WorkloadOutcome::Skipped),
            record(WorkloadKind::StatefulSet, WorkloadOutcome::Recommended),
        ];
        let status = build_status(
            ready_condition(true, "Reconciled", "ok", Utc::now()),
            records,
            5,
            Utc::now(),
        );

        let counts = status.workload_counts.unwrap();
        assert_eq!(counts.deployments, 2);
        assert_eq!(counts.stateful_sets, 1);
        assert_eq!(counts.daemon_sets, 0);
        assert_eq!(status.total_processed, 3);
        assert_eq!(status.total_discovered, 5);
        assert!(status.last_reconcile_time.is_some());
    }

    #[test]
    fn test_outcome_count() {
        let records = vec![
            record(WorkloadKind::Deployment, WorkloadOutcome::Applied),
            record(WorkloadKind::Deployment, WorkloadOutcome::Applied),
            record(WorkloadKind::DaemonSet, WorkloadOutcome::Error),
        ];
        assert_eq!(outcome_count(&records, WorkloadOutcome::Applied), 2);
        assert_eq!(outcome_count(&records, WorkloadOutcome::Error), 1);
        assert_eq!(outcome_count(&records, WorkloadOutcome::Skipped), 0);
    }
}
