//! Recommendation engine.
//!
//! Composes the percentile statistics, the safety factor, and the policy's
//! resource bounds into a bounded per-container recommendation. All
//! arithmetic goes through the unit-preserving quantity layer, so CPU stays
//! decimal-SI millicores and memory stays binary-SI bytes end to end.

use crate::metrics::ContainerMetrics;
use crate::policy::OptimizationPolicySpec;
use crate::quantity::{QuantityError, ResourceQuantity};

/// Error type for recommendation computation.
#[derive(Debug, thiserror::Error)]
pub enum RecommendationError {
    #[error("Invalid resource bounds: {0}")]
    InvalidBounds(String),

    #[error(transparent)]
    Quantity(#[from] QuantityError),
}

/// A bounded recommendation for one container.
#[derive(Debug, Clone)]
pub struct Recommendation {
    /// Recommended CPU request (DecimalSI).
    pub cpu: ResourceQuantity,
    /// Recommended memory request (BinarySI).
    pub memory: ResourceQuantity,
    /// Human-readable derivation: percentile, pre-clamp values, safety
    /// factor and bounds.
    pub explanation: String,
}

/// Which percentile a policy selects; empty or unknown values fall back to
/// P90.
fn selected_percentile(spec: &OptimizationPolicySpec) -> &'static str {
    match spec
        .metrics_config
        .percentile
        .as_deref()
        .map(str::to_ascii_uppercase)
        .as_deref()
    {
        Some("P50") => "P50",
        Some("P99") => "P99",
        _ => "P90",
    }
}

/// Compute a bounded recommendation from container statistics and a policy.
///
/// Post-condition: `cpu` lies within the policy's CPU bounds and `memory`
/// within its memory bounds, by magnitude.
pub fn compute(
    metrics: &ContainerMetrics,
    spec: &OptimizationPolicySpec,
) -> Result<Recommendation, RecommendationError> {
    let percentile = selected_percentile(spec);

    let (cpu_base, memory_base) = match percentile {
        "P50" => (metrics.cpu.p50, metrics.memory.p50),
        "P99" => (metrics.cpu.p99, metrics.memory.p99),
        _ => (metrics.cpu.p90, metrics.memory.p90),
    };

    let safety_factor = spec.metrics_config.safety_factor();
    let cpu_scaled = cpu_base.multiply(safety_factor)?;
    let memory_scaled = memory_base.multiply(safety_factor)?;

    let bounds = &spec.resource_bounds;
    let cpu_min = ResourceQuantity::parse_cpu(&bounds.cpu.min)
        .map_err(|e| RecommendationError::InvalidBounds(format!("cpu.min: {e}")))?;
    let cpu_max = ResourceQuantity::parse_cpu(&bounds.cpu.max)
        .map_err(|e| RecommendationError::InvalidBounds(format!("cpu.max: {e}")))?;
    let memory_min = ResourceQuantity::parse_memory(&bounds.memory.min)
        .map_err(|e| RecommendationError::InvalidBounds(format!("memory.min: {e}")))?;
    let memory_max = ResourceQuantity::parse_memory(&bounds.memory.max)
        .map_err(|e| RecommendationError::InvalidBounds(format!("memory.max: {e}")))?;

    let cpu = cpu_scaled.clamp(&cpu_min, &cpu_max);
    let memory = memory_scaled.clamp(&memory_min, &memory_max);

    let explanation = format!(
        "{percentile} cpu {cpu_base} x{safety_factor} = {cpu_scaled}, memory {memory_base} x{safety_factor} = {memory_scaled}; \
         clamped into cpu [{}, {}], memory [{}, {}]",
        bounds.cpu.min, bounds.cpu.max, bounds.memory.min, bounds.memory.max
    );

    Ok(Recommendation {
        cpu,
        memory,
        explanation,
    })
}
