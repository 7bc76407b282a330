//! Policy validation.
//!
//! Runs the semantic checks in a fixed order and returns the first failure.
//! Structural membership in the closed sets (mode, workload kinds, selector
//! operators) is already enforced by the typed model at deserialization; the
//! checks here cover everything the types cannot express.

use crate::duration::parse_duration;
use crate::policy::{
    Bounds, LabelSelector, MetricsConfig, OptimizationPolicySpec, UpdateStrategy,
};
use crate::quantity::ResourceQuantity;

/// Error type for policy validation; the message is surfaced on the policy
/// status and in the ValidationFailed event.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error(
        "selector must set at least one of namespaceSelector, workloadSelector, namespaces, or workloadTypes"
    )]
    EmptySelector,

    #[error("{selector} selector expression has an empty key")]
    EmptySelectorKey { selector: &'static str },

    #[error("{selector} selector: operator {operator} requires a non-empty values list")]
    MissingSelectorValues {
        selector: &'static str,
        operator: &'static str,
    },

    #[error("{selector} selector: operator {operator} must not carry values")]
    UnexpectedSelectorValues {
        selector: &'static str,
        operator: &'static str,
    },

    #[error("metricsConfig.provider must not be empty")]
    EmptyProvider,

    #[error("resourceBounds.{field} is not a valid quantity: {message}")]
    InvalidBound { field: String, message: String },

    #[error("resourceBounds.{field} must be strictly positive")]
    NonPositiveBound { field: String },

    #[error("resourceBounds.{resource}: min {min} exceeds max {max}")]
    MinAboveMax {
        resource: &'static str,
        min: String,
        max: String,
    },

    #[error("metricsConfig.safetyFactor must be >= 1.0, got {0}")]
    SafetyFactorTooLow(f64),

    #[error("weight must be within [1, 1000], got {0}")]
    WeightOutOfRange(u32),

    #[error("metricsConfig.window is not a valid duration: {0}")]
    InvalidWindow(String),

    #[error("reconciliationInterval is not a valid duration: {0}")]
    InvalidInterval(String),

    #[error("updateStrategy.limitConfig.{field} must be within [1, 10], got {value}")]
    LimitMultiplierOutOfRange { field: &'static str, value: f64 },
}

/// Validate a policy on creation. Checks run in order and the first failure
/// is returned.
pub fn validate_on_create(spec: &OptimizationPolicySpec) -> Result<(), ValidationError> {
    if spec.selector.is_empty() {
        return Err(ValidationError::EmptySelector);
    }

    if let Some(sel) = &spec.selector.namespace_selector {
        validate_label_selector(sel, "namespace")?;
    }
    if let Some(sel) = &spec.selector.workload_selector {
        validate_label_selector(sel, "workload")?;
    }

    validate_metrics_config(&spec.metrics_config)?;

    validate_bounds(&spec.resource_bounds.cpu, "cpu", ResourceQuantity::parse_cpu)?;
    validate_bounds(
        &spec.resource_bounds.memory,
        "memory",
        ResourceQuantity::parse_memory,
    )?;

    if let Some(factor) = spec.metrics_config.safety_factor {
        if factor < 1.0 {
            return Err(ValidationError::SafetyFactorTooLow(factor));
        }
    }

    if let Some(weight) = spec.weight {
        if !(1..=1000).contains(&weight) {
            return Err(ValidationError::WeightOutOfRange(weight));
        }
    }

    if let Some(window) = &spec.metrics_config.window {
        parse_duration(window).map_err(|e| ValidationError::InvalidWindow(e.to_string()))?;
    }

    if let Some(interval) = &spec.reconciliation_interval {
        parse_duration(interval).map_err(|e| ValidationError::InvalidInterval(e.to_string()))?;
    }

    if let Some(strategy) = &spec.update_strategy {
        validate_update_strategy(strategy)?;
    }

    Ok(())
}

/// Validate a policy on update.
///
/// Today this delegates to the create checks unchanged; no fields are
/// immutable. Revisit if selector immutability becomes a requirement.
pub fn validate_on_update(
    new_spec: &OptimizationPolicySpec,
    _old_spec: &OptimizationPolicySpec,
) -> Result<(), ValidationError> {
    validate_on_create(new_spec)
}

fn validate_label_selector(
    sel: &LabelSelector,
    which: &'static str,
) -> Result<(), ValidationError> {
    for (key, _) in &sel.match_labels {
        if key.is_empty() {
            return Err(ValidationError::EmptySelectorKey { selector: which });
        }
    }
    for expr in &sel.match_expressions {
        if expr.key.is_empty() {
            return Err(ValidationError::EmptySelectorKey { selector: which });
        }
        let operator = match expr.operator {
            crate::policy::LabelSelectorOperator::In => "In",
            crate::policy::LabelSelectorOperator::NotIn => "NotIn",
            crate::policy::LabelSelectorOperator::Exists => "Exists",
            crate::policy::LabelSelectorOperator::DoesNotExist => "DoesNotExist",
        };
        if expr.operator.requires_values() && expr.values.is_empty() {
            return Err(ValidationError::MissingSelectorValues {
                selector: which,
                operator,
            });
        }
        if !expr.operator.requires_values() && !expr.values.is_empty() {
            return Err(ValidationError::UnexpectedSelectorValues {
                selector: which,
                operator,
            });
        }
    }
    Ok(())
}

fn validate_metrics_config(config: &MetricsConfig) -> Result<(), ValidationError> {
    if config.provider.trim().is_empty() {
        return Err(ValidationError::EmptyProvider);
    }
    Ok(())
}

fn validate_bounds<F>(bounds: &Bounds, resource: &'static str, parse: F) -> Result<(), ValidationError>
where
    F: Fn(&str) -> Result<ResourceQuantity, crate::quantity::QuantityError>,
{
    let min = parse(&bounds.min).map_err(|e| ValidationError::InvalidBound {
        field: format!("{resource}.min"),
        message: e.to_string(),
    })?;
    let max = parse(&bounds.max).map_err(|e| ValidationError::InvalidBound {
        field: format!("{resource}.max"),
        message: e.to_string(),
    })?;

    if min.is_zero() {
        return Err(ValidationError::NonPositiveBound {
            field: format!("{resource}.min"),
        });
    }
    if max.is_zero() {
        return Err(ValidationError::NonPositiveBound {
            field: format!("{resource}.max"),
        });
    }
    if min.magnitude() > max.magnitude() {
        return Err(ValidationError::MinAboveMax {
            resource,
            min: bounds.min.clone(),
            max: bounds.max.clone(),
        });
    }
    Ok(())
}

fn validate_update_strategy(strategy: &UpdateStrategy) -> Result<(), ValidationError> {
    if let Some(limits) = &strategy.limit_config {
        if let Some(m) = limits.cpu_limit_multiplier {
            if !(1.0..=10.0).contains(&m) {
                return Err(ValidationError::LimitMultiplierOutOfRange {
                    field: "cpuLimitMultiplier",
                    value: m,
                });
            }
        }
        if let Some(m) = limits.memory_limit_multiplier {
            if !(1.0..=10.0).contains(&m) {
                return Err(ValidationError::LimitMultiplierOutOfRange {
                    field: "memoryLimitMultiplier",
                    value: m,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{
        LabelSelectorOperator, LabelSelectorRequirement, NamespaceFilter, PolicyMode,
        ResourceBounds, WorkloadSelector,
    };

    fn valid_spec() -> OptimizationPolicySpec {
        OptimizationPolicySpec {
            mode: PolicyMode::Recommend,
            weight: Some(100),
            selector: WorkloadSelector {
                namespaces: Some(NamespaceFilter {
                    allow: vec!["default".to_string()],
                    deny: vec![],
                }),
                ..Default::default()
            },
            metrics_config: MetricsConfig {
                provider: "metrics-server".to_string(),
                window: Some("1h".to_string()),
                percentile: Some("P90".to_string()),
                safety_factor: Some(1.2),
            },
            resource_bounds: ResourceBounds {
                cpu: Bounds {
                    min: "100m".to_string(),
                    max: "4000m".to_string(),
                },
                memory: Bounds {
                    min: "128Mi".to_string(),
                    max: "8Gi".to_string(),
                },
            },
            update_strategy: None,
            reconciliation_interval: Some("5m".to_string()),
        }
    }

    #[test]
    fn test_valid_spec_passes() {
        assert!(validate_on_create(&valid_spec()).is_ok());
    }

    #[test]
    fn test_empty_selector_fails() {
        let mut spec = valid_spec();
        spec.selector = WorkloadSelector::default();
        assert!(matches!(
            validate_on_create(&spec),
            Err(ValidationError::EmptySelector)
        ));
    }

    #[test]
    fn test_in_operator_requires_values() {
        let mut spec = valid_spec();
        spec.selector.workload_selector = Some(LabelSelector {
            match_expressions: vec![LabelSelectorRequirement {
                key: "app".to_string(),
                operator: LabelSelectorOperator::In,
                values: vec![],
            }],
            ..Default::default()
        });
        assert!(matches!(
            validate_on_create(&spec),
            Err(ValidationError::MissingSelectorValues { .. })
        ));
    }

    #[test]
    fn test_exists_operator_rejects_values() {
        let mut spec = valid_spec();
        spec.selector.workload_selector = Some(LabelSelector {
            match_expressions: vec![LabelSelectorRequirement {
                key: "app".to_string(),
                operator: LabelSelectorOperator::Exists,
                values: vec!["x".to_string()],
            }],
            ..Default::default()
        });
        assert!(matches!(
            validate_on_create(&spec),
            Err(ValidationError::UnexpectedSelectorValues { .. })
        ));
    }

    #[test]
    fn test_empty_provider_fails() {
        let mut spec = valid_spec();
        spec.metrics_config.provider = "  ".to_string();
        assert!(matches!(
            validate_on_create(&spec),
            Err(ValidationError::EmptyProvider)
        ));
    }

    #[test]
    fn test_min_above_max_fails() {
        let mut spec = valid_spec();
        spec.resource_bounds.cpu.min = "8000m".to_string();
        assert!(matches!(
            validate_on_create(&spec),
            Err(ValidationError::MinAboveMax { resource: "cpu", .. })
        ));

        let mut spec = valid_spec();
        spec.resource_bounds.memory.min = "16Gi".to_string();
        assert!(matches!(
            validate_on_create(&spec),
            Err(ValidationError::MinAboveMax {
                resource: "memory",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_bound_fails() {
        let mut spec = valid_spec();
        spec.resource_bounds.cpu.min = "0".to_string();
        assert!(matches!(
            validate_on_create(&spec),
            Err(ValidationError::NonPositiveBound { .. })
        ));
    }

    #[test]
    fn test_unparseable_bound_fails() {
        let mut spec = valid_spec();
        spec.resource_bounds.memory.max = "lots".to_string();
        assert!(matches!(
            validate_on_create(&spec),
            Err(ValidationError::InvalidBound { .. })
        ));
    }

    #[test]
    fn test_safety_factor_below_one_fails() {
        let mut spec = valid_spec();
        spec.metrics_config.safety_factor = Some(0.8);
        assert!(matches!(
            validate_on_create(&spec),
            Err(ValidationError::SafetyFactorTooLow(_))
        ));
    }

    #[test]
    fn test_weight_out_of_range_fails() {
        for bad in [0, 1001] {
            let mut spec = valid_spec();
            spec.weight = Some(bad);
            assert!(matches!(
                validate_on_create(&spec),
                Err(ValidationError::WeightOutOfRange(_))
            ));
        }
    }

    #[test]
    fn test_limit_multiplier_out_of_range_fails() {
        let mut spec = valid_spec();
        spec.update_strategy = Some(UpdateStrategy {
            limit_config: Some(crate::policy::LimitConfig {
                cpu_limit_multiplier: Some(0.5),
                memory_limit_multiplier: None,
            }),
            ..Default::default()
        });
        assert!(matches!(
            validate_on_create(&spec),
            Err(ValidationError::LimitMultiplierOutOfRange { .. })
        ));
    }

    #[test]
    fn test_update_delegates_to_create() {
        let old = valid_spec();
        let mut new = valid_spec();
        new.weight = Some(0);
        assert!(validate_on_update(&new, &old).is_err());
        new.weight = Some(500);
        assert!(validate_on_update(&new, &old).is_ok());
    }
}
