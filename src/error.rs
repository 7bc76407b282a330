//! Crate-level error type.
//!
//! Per-module errors aggregate here for the binary surface and the
//! reconciler. `error_type` maps an error onto the stable label values of
//! the `reconciliation_errors_total` counter.

use crate::apply::ApplyError;
use crate::cluster::ClusterError;
use crate::discovery::DiscoveryError;
use crate::duration::DurationParseError;
use crate::metrics::MetricsError;
use crate::policy::validation::ValidationError;
use crate::quantity::QuantityError;
use crate::recommender::RecommendationError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Quantity(#[from] QuantityError),

    #[error(transparent)]
    Duration(#[from] DurationParseError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Recommendation(#[from] RecommendationError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable `error_type` label value for the errors counter.
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Quantity(QuantityError::Overflow(_, _)) => "overflow",
            Error::Quantity(_) => "validation",
            Error::Duration(_) => "validation",
            Error::Discovery(_) => "discovery",
            Error::Cluster(ClusterError::Forbidden(_)) => "permission",
            Error::Cluster(ClusterError::Conflict(_)) => "conflict",
            Error::Cluster(_) => "patch",
            Error::Metrics(_) => "metrics",
            Error::Recommendation(RecommendationError::Quantity(QuantityError::Overflow(_, _))) => {
                "overflow"
            }
            Error::Recommendation(_) => "validation",
            Error::Apply(ApplyError::Permission(_)) => "permission",
            Error::Apply(ApplyError::Conflict(_)) => "conflict",
            Error::Apply(ApplyError::Validation(_)) => "validation",
            Error::Apply(ApplyError::Quantity(QuantityError::Overflow(_, _))) => "overflow",
            Error::Apply(_) => "patch",
            Error::Config(_) => "validation",
            Error::Kube(_) => "patch",
            Error::Io(_) => "patch",
        }
    }
}
