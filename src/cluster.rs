//! Cluster access capabilities.
//!
//! The reconciler and discovery engine consume these narrow traits instead
//! of a concrete client so tests can substitute canned data. The real
//! implementations wrap a `kube::Client`; everything above this module holds
//! cluster objects as opaque JSON documents.

use crate::policy::{LabelSelector, OptimizationPolicy, OptimizationPolicyStatus, WorkloadKind};
use crate::workload::Workload;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, Resource};
use serde_json::Value;
use std::collections::BTreeMap;

/// Field manager identity for server-side apply. One constant per
/// installation, used on every apply across all policies so the controller
/// owns a coherent field set.
pub const FIELD_MANAGER: &str = "optipod";

/// Error type for cluster operations, mapped onto the controller's failure
/// taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("RBAC forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid object: {0}")]
    Invalid(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cluster API error: {0}")]
    Api(String),
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        if let kube::Error::Api(ref ae) = err {
            return match ae.code {
                403 => ClusterError::Forbidden(ae.message.clone()),
                404 => ClusterError::NotFound(ae.message.clone()),
                409 => ClusterError::Conflict(ae.message.clone()),
                422 => ClusterError::Invalid(ae.message.clone()),
                _ => ClusterError::Api(ae.message.clone()),
            };
        }
        ClusterError::Api(err.to_string())
    }
}

/// Patch strategy tag passed through to the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchStrategy {
    /// Server-side apply under [`FIELD_MANAGER`]; `force` takes ownership
    /// from a prior field owner.
    Apply { force: bool },
    /// Strategic merge patch.
    StrategicMerge,
}

/// A namespace with its labels, for label-based namespace selection.
#[derive(Debug, Clone)]
pub struct NamespaceInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

/// Read-side cluster capability.
#[async_trait]
pub trait ClusterReader: Send + Sync {
    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>, ClusterError>;

    /// List workloads of one kind in one namespace, optionally filtered by a
    /// label selector (an empty selector matches all).
    async fn list_workloads(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<Workload>, ClusterError>;

    /// Names of up to `limit` pods matching `selector` in `namespace`.
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
        limit: u32,
    ) -> Result<Vec<String>, ClusterError>;
}

/// Policy loading capability.
#[async_trait]
pub trait PolicyReader: Send + Sync {
    /// Load one policy; `None` when it no longer exists.
    async fn get_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<OptimizationPolicy>, ClusterError>;

    /// All policies across namespaces.
    async fn list_policies(&self) -> Result<Vec<OptimizationPolicy>, ClusterError>;
}

/// Write-side cluster capability.
#[async_trait]
pub trait ClusterWriter: Send + Sync {
    /// Patch a workload with the given body and strategy.
    async fn patch_workload(
        &self,
        workload: &Workload,
        patch: &Value,
        strategy: PatchStrategy,
    ) -> Result<(), ClusterError>;

    /// Merge the given annotations into the workload's metadata.
    async fn annotate_workload(
        &self,
        workload: &Workload,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError>;

    /// Write the policy's observed status.
    async fn patch_policy_status(
        &self,
        policy: &OptimizationPolicy,
        status: &OptimizationPolicyStatus,
    ) -> Result<(), ClusterError>;
}

/// Cluster version capability, for in-place-resize detection.
#[async_trait]
pub trait VersionProbe: Send + Sync {
    /// Advertised (major, minor) version strings, as returned by the server
    /// (minor may carry a vendor "+" suffix).
    async fn server_version(&self) -> Result<(String, String), ClusterError>;
}

/// Whether the advertised version supports in-place pod resize.
///
/// Available iff major > 1, or major == 1 and minor >= 29. Vendor builds
/// report minors like "29+"; the suffix is stripped before parsing.
pub fn in_place_resize_supported(major: &str, minor: &str) -> bool {
    let parse = |s: &str| s.trim().trim_end_matches('+').parse::<u32>().ok();
    match (parse(major), parse(minor)) {
        (Some(major), _) if major > 1 => true,
        (Some(1), Some(minor)) => minor >= 29,
        _ => false,
    }
}

/// Render a label selector in API list-selector syntax.
pub fn label_selector_string(selector: &LabelSelector) -> String {
    let mut parts: Vec<String> = selector
        .match_labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();

    for expr in &selector.match_expressions {
        use crate::policy::LabelSelectorOperator::*;
        let part = match expr.operator {
            In => format!("{} in ({})", expr.key, expr.values.join(",")),
            NotIn => format!("{} notin ({})", expr.key, expr.values.join(",")),
            Exists => expr.key.clone(),
            DoesNotExist => format!("!{}", expr.key),
        };
        parts.push(part);
    }

    parts.join(",")
}

// ============================================================================
// kube-backed implementation
// ============================================================================

/// Cluster capabilities backed by a shared `kube::Client`.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn list_params(selector: Option<&LabelSelector>) -> ListParams {
        match selector {
            Some(sel) => {
                let s = label_selector_string(sel);
                if s.is_empty() {
                    ListParams::default()
                } else {
                    ListParams::default().labels(&s)
                }
            }
            None => ListParams::default(),
        }
    }

    async fn list_kind<K>(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        params: &ListParams,
    ) -> Result<Vec<Workload>, ClusterError>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + serde::Serialize
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(params).await?;

        let mut workloads = Vec::with_capacity(list.items.len());
        for item in list.items {
            let meta = item.meta();
            let name = meta.name.clone().unwrap_or_default();
            let labels = meta
                .labels
                .clone()
                .map(|m| m.into_iter().collect())
                .unwrap_or_default();
            let body = serde_json::to_value(&item)
                .map_err(|e| ClusterError::Api(format!("serializing {kind} {name}: {e}")))?;
            workloads.push(Workload {
                kind,
                namespace: namespace.to_string(),
                name,
                labels,
                body,
            });
        }
        Ok(workloads)
    }
}

#[async_trait]
impl ClusterReader for KubeCluster {
    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .map(|ns| NamespaceInfo {
                name: ns.metadata.name.unwrap_or_default(),
                labels: ns
                    .metadata
                    .labels
                    .map(|m| m.into_iter().collect())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn list_workloads(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<Workload>, ClusterError> {
        let params = Self::list_params(selector);
        match kind {
            WorkloadKind::Deployment => {
                self.list_kind::<Deployment>(kind, namespace, &params).await
            }
            WorkloadKind::StatefulSet => {
                self.list_kind::<StatefulSet>(kind, namespace, &params).await
            }
            WorkloadKind::DaemonSet => self.list_kind::<DaemonSet>(kind, namespace, &params).await,
        }
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
        limit: u32,
    ) -> Result<Vec<String>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let labels: Vec<String> = selector.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let params = ListParams::default()
            .labels(&labels.join(","))
            .limit(limit);
        let list = api.list(&params).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|p| p.metadata.name)
            .collect())
    }
}

#[async_trait]
impl PolicyReader for KubeCluster {
    async fn get_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<OptimizationPolicy>, ClusterError> {
        let api: Api<OptimizationPolicy> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_policies(&self) -> Result<Vec<OptimizationPolicy>, ClusterError> {
        let api: Api<OptimizationPolicy> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

#[async_trait]
impl ClusterWriter for KubeCluster {
    async fn patch_workload(
        &self,
        workload: &Workload,
        patch: &Value,
        strategy: PatchStrategy,
    ) -> Result<(), ClusterError> {
        let (params, patch) = match strategy {
            PatchStrategy::Apply { force } => {
                let mut params = PatchParams::apply(FIELD_MANAGER);
                if force {
                    params = params.force();
                }
                (params, Patch::Apply(patch.clone()))
            }
            PatchStrategy::StrategicMerge => {
                (PatchParams::default(), Patch::Strategic(patch.clone()))
            }
        };

        match workload.kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), &workload.namespace);
                api.patch(&workload.name, &params, &patch).await?;
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> =
                    Api::namespaced(self.client.clone(), &workload.namespace);
                api.patch(&workload.name, &params, &patch).await?;
            }
            WorkloadKind::DaemonSet => {
                let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), &workload.namespace);
                api.patch(&workload.name, &params, &patch).await?;
            }
        }
        Ok(())
    }

    async fn annotate_workload(
        &self,
        workload: &Workload,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        let patch = serde_json::json!({
            "metadata": {"annotations": annotations}
        });
        self.patch_workload(workload, &patch, PatchStrategy::StrategicMerge)
            .await
    }

    async fn patch_policy_status(
        &self,
        policy: &OptimizationPolicy,
        status: &OptimizationPolicyStatus,
    ) -> Result<(), ClusterError> {
        let namespace = policy
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| ClusterError::Invalid("policy has no namespace".to_string()))?;
        let api: Api<OptimizationPolicy> = Api::namespaced(self.client.clone(), namespace);
        let body = serde_json::json!({"status": status});
        api.patch_status(
            &policy.name_unchecked(),
            &PatchParams::default(),
            &Patch::Merge(&body),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl VersionProbe for KubeCluster {
    async fn server_version(&self) -> Result<(String, String), ClusterError> {
        let info = self.client.apiserver_version().await?;
        Ok((info.major, info.minor))
    }
}
