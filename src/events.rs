//! Controller events.
//!
//! Events are published against the policy object. Warning events always
//! carry a `Suggestion:` clause naming a concrete remedial action, which is
//! enforced by construction here rather than at every call site.

use crate::policy::OptimizationPolicy;
use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use std::fmt;

/// Event severity, mapped onto the cluster event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

/// Closed set of event reasons; names are stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventReason {
    UpdateSuccess,
    RecommendationGenerated,
    WorkloadSkipped,
    SsaOwnershipTaken,
    UpdateFailed,
    ValidationFailed,
    MetricsCollectionFailed,
    RbacError,
    InPlaceResizeUnavailable,
    SsaConflict,
}

impl EventReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateSuccess => "UpdateSuccess",
            Self::RecommendationGenerated => "RecommendationGenerated",
            Self::WorkloadSkipped => "WorkloadSkipped",
            Self::SsaOwnershipTaken => "SSAOwnershipTaken",
            Self::UpdateFailed => "UpdateFailed",
            Self::ValidationFailed => "ValidationFailed",
            Self::MetricsCollectionFailed => "MetricsCollectionFailed",
            Self::RbacError => "RBACError",
            Self::InPlaceResizeUnavailable => "InPlaceResizeUnavailable",
            Self::SsaConflict => "SSAConflict",
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            Self::UpdateSuccess
            | Self::RecommendationGenerated
            | Self::WorkloadSkipped
            | Self::SsaOwnershipTaken => EventSeverity::Normal,
            Self::UpdateFailed
            | Self::ValidationFailed
            | Self::MetricsCollectionFailed
            | Self::RbacError
            | Self::InPlaceResizeUnavailable
            | Self::SsaConflict => EventSeverity::Warning,
        }
    }
}

impl fmt::Display for EventReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single event ready for publication.
#[derive(Debug, Clone)]
pub struct ControllerEvent {
    pub reason: EventReason,
    pub message: String,
}

impl ControllerEvent {
    /// A normal (informational) event.
    pub fn normal(reason: EventReason, message: impl Into<String>) -> Self {
        debug_assert_eq!(reason.severity(), EventSeverity::Normal);
        Self {
            reason,
            message: message.into(),
        }
    }

    /// A warning event; the suggestion clause is mandatory and appended to
    /// the message.
    pub fn warning(
        reason: EventReason,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        debug_assert_eq!(reason.severity(), EventSeverity::Warning);
        Self {
            reason,
            message: format!("{}. Suggestion: {}", message.into(), suggestion.into()),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        self.reason.severity()
    }
}

/// Capability: publish an event against a policy.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, policy: &OptimizationPolicy, event: ControllerEvent);
}

/// Event sink backed by the cluster events API.
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: crate::cluster::FIELD_MANAGER.to_string(),
            instance: std::env::var("HOSTNAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, policy: &OptimizationPolicy, event: ControllerEvent) {
        let type_ = match event.severity() {
            EventSeverity::Normal => EventType::Normal,
            EventSeverity::Warning => EventType::Warning,
        };
        let object_ref = policy.object_ref(&());
        let result = self
            .recorder
            .publish(
                &Event {
                    type_,
                    reason: event.reason.as_str().to_string(),
                    note: Some(event.message.clone()),
                    action: "Reconcile".to_string(),
                    secondary: None,
                },
                &object_ref,
            )
            .await;
        if let Err(e) = result {
            log::warn!(
                "failed to publish {} event for {}: {}",
                event.reason,
                policy.key(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_carries_suggestion() {
        let e = ControllerEvent::warning(
            EventReason::RbacError,
            "patch forbidden on apps/v1 deployments",
            "grant the controller patch permission on deployments",
        );
        assert!(e.message.contains("Suggestion:"));
        assert_eq!(e.severity(), EventSeverity::Warning);
    }

    #[test]
    fn test_reason_names_are_stable() {
        assert_eq!(EventReason::SsaOwnershipTaken.as_str(), "SSAOwnershipTaken");
        assert_eq!(EventReason::RbacError.as_str(), "RBACError");
        assert_eq!(EventReason::SsaConflict.as_str(), "SSAConflict");
        assert_eq!(
            EventReason::InPlaceResizeUnavailable.as_str(),
            "InPlaceResizeUnavailable"
        );
    }

    #[test]
    fn test_severity_partition() {
        for reason in [
            EventReason::UpdateSuccess,
            EventReason::RecommendationGenerated,
            EventReason::WorkloadSkipped,
            EventReason::SsaOwnershipTaken,
        ] {
            assert_eq!(reason.severity(), EventSeverity::Normal);
        }
        for reason in [
            EventReason::UpdateFailed,
            EventReason::ValidationFailed,
            EventReason::MetricsCollectionFailed,
            EventReason::RbacError,
            EventReason::InPlaceResizeUnavailable,
            EventReason::SsaConflict,
        ] {
            assert_eq!(reason.severity(), EventSeverity::Warning);
        }
    }
}
