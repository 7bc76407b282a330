//! # Optipod
//!
//! A Kubernetes workload right-sizing controller. Optipod observes
//! declarative `OptimizationPolicy` objects, discovers matching Deployments,
//! StatefulSets and DaemonSets, collects per-container CPU and memory usage
//! from a pluggable metrics backend, computes bounded resource
//! recommendations, and — in Automatic mode — applies them to running
//! workloads while preserving field ownership.
//!
//! ## Pipeline
//!
//! ```text
//! policy -> validate -> discover -> collect metrics -> recommend -> apply
//!                            |            |                           |
//!                     workload cache  metrics cache            field-ownership
//!                                                              apply ("optipod")
//! ```
//!
//! The core is cluster-agnostic: discovery, recommendation and application
//! consume narrow capability traits ([`cluster::ClusterReader`],
//! [`cluster::ClusterWriter`], [`cluster::VersionProbe`],
//! [`metrics::MetricsProvider`]), so the whole pipeline runs against canned
//! data in tests.

pub mod apply;
pub mod cache;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod discovery;
pub mod duration;
pub mod error;
pub mod events;
pub mod metrics;
pub mod observability;
pub mod percentile;
pub mod policy;
pub mod quantity;
pub mod reconciler;
pub mod recommender;
pub mod workload;

pub use error::{Error, Result};
pub use policy::{OptimizationPolicy, OptimizationPolicySpec};
pub use quantity::ResourceQuantity;
pub use reconciler::{ReconcileOutcome, Reconciler, ReconcilerSettings};
pub use workload::Workload;

/// The current version of the controller.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
