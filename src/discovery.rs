//! Workload discovery.
//!
//! Enumerates namespaces visible to the controller, applies the policy's
//! namespace filters (deny list wins, then allow list, then the namespace
//! label selector), and lists workloads of each active kind filtered by the
//! workload label selector. Results are naturally unique per
//! (kind, namespace, name); ordering between kinds is not guaranteed.

use crate::cluster::{ClusterError, ClusterReader, NamespaceInfo};
use crate::policy::workload_types::active_types;
use crate::policy::OptimizationPolicy;
use crate::workload::Workload;

/// Error type for discovery; upstream lister failures propagate here and
/// trigger a requeue.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Failed to list namespaces: {0}")]
    Namespaces(#[source] ClusterError),

    #[error("Failed to list {kind} in {namespace}: {source}")]
    Workloads {
        kind: String,
        namespace: String,
        #[source]
        source: ClusterError,
    },
}

/// Whether a namespace is admitted by the policy's selector.
pub fn namespace_matches(namespace: &NamespaceInfo, policy: &OptimizationPolicy) -> bool {
    let selector = &policy.spec.selector;

    if let Some(filter) = &selector.namespaces {
        if filter.deny.contains(&namespace.name) {
            return false;
        }
        if !filter.allow.is_empty() && !filter.allow.contains(&namespace.name) {
            return false;
        }
    }

    if let Some(ns_selector) = &selector.namespace_selector {
        if !ns_selector.matches(&namespace.labels) {
            return false;
        }
    }

    true
}

/// Enumerate all workloads governed by `policy`.
pub async fn discover<R: ClusterReader + ?Sized>(
    reader: &R,
    policy: &OptimizationPolicy,
) -> Result<Vec<Workload>, DiscoveryError> {
    let namespaces = reader
        .list_namespaces()
        .await
        .map_err(DiscoveryError::Namespaces)?;

    let kinds = active_types(policy.spec.selector.workload_types.as_ref());
    if kinds.is_empty() {
        return Ok(Vec::new());
    }

    let workload_selector = policy.spec.selector.workload_selector.as_ref();

    let mut discovered = Vec::new();
    for namespace in namespaces
        .iter()
        .filter(|ns| namespace_matches(ns, policy))
    {
        for kind in &kinds {
            let items = reader
                .list_workloads(*kind, &namespace.name, workload_selector)
                .await
                .map_err(|e| DiscoveryError::Workloads {
                    kind: kind.to_string(),
                    namespace: namespace.name.clone(),
                    source: e,
                })?;
            discovered.extend(items);
        }
    }

    log::debug!(
        "discovered {} workloads for policy {}",
        discovered.len(),
        policy.key()
    );

    Ok(discovered)
}
