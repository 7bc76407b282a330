//! Discovered workloads.
//!
//! A workload is an identified pod-producing cluster object (Deployment,
//! StatefulSet or DaemonSet). The body is held as an opaque structured
//! document; accessors poke at the dotted paths the controller cares about
//! (`spec.template.spec.containers[i].resources.{requests,limits}`), so no
//! part of the core depends on the wire encoding of cluster objects.

use crate::policy::WorkloadKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// An identified cluster workload, discovered per reconciliation tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// The full object as returned by the API server.
    pub body: Value,
}

/// Container name plus its current resource request/limit strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub cpu_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_request: Option<String>,
    pub memory_limit: Option<String>,
}

impl Workload {
    /// `{namespace}/{name}` identity.
    pub fn id(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Extract per-container names and current resources from the pod
    /// template. Containers without a resources block come back with all
    /// fields unset; a missing template yields an empty list.
    pub fn containers(&self) -> Vec<ContainerSpec> {
        let Some(containers) = self
            .body
            .pointer("/spec/template/spec/containers")
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };

        containers
            .iter()
            .filter_map(|c| {
                let name = c.get("name")?.as_str()?.to_string();
                let resources = c.get("resources");
                let field = |section: &str, resource: &str| -> Option<String> {
                    resources?
                        .get(section)?
                        .get(resource)?
                        .as_str()
                        .map(str::to_string)
                };
                Some(ContainerSpec {
                    name,
                    cpu_request: field("requests", "cpu"),
                    cpu_limit: field("limits", "cpu"),
                    memory_request: field("requests", "memory"),
                    memory_limit: field("limits", "memory"),
                })
            })
            .collect()
    }

    /// The workload's pod selector (`spec.selector.matchLabels`), used to
    /// locate a running pod for metrics collection.
    pub fn pod_selector(&self) -> BTreeMap<String, String> {
        self.body
            .pointer("/spec/selector/matchLabels")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Annotation lookup on the workload's own metadata.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.body
            .pointer("/metadata/annotations")
            .and_then(Value::as_object)
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn deployment_body(containers: serde_json::Value) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "namespace": "default",
                "annotations": {"team": "payments"}
            },
            "spec": {
                "selector": {"matchLabels": {"app": "web"}},
                "template": {
                    "spec": {"containers": containers}
                }
            }
        })
    }

    fn workload(body: Value) -> Workload {
        Workload {
            kind: WorkloadKind::Deployment,
            namespace: "default".to_string(),
            name: "web".to_string(),
            labels: BTreeMap::new(),
            body,
        }
    }

    #[test]
    fn test_containers_with_resources() {
        let w = workload(deployment_body(json!([
            {
                "name": "app",
                "resources": {
                    "requests": {"cpu": "100m", "memory": "128Mi"},
                    "limits": {"memory": "1Gi"}
                }
            },
            {"name": "sidecar"}
        ])));

        let containers = w.containers();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].name, "app");
        assert_eq!(containers[0].cpu_request.as_deref(), Some("100m"));
        assert_eq!(containers[0].memory_limit.as_deref(), Some("1Gi"));
        assert_eq!(containers[0].cpu_limit, None);
        assert_eq!(containers[1].name, "sidecar");
        assert_eq!(containers[1].memory_request, None);
    }

    #[test]
    fn test_containers_missing_template() {
        let w = workload(json!({"spec": {}}));
        assert!(w.containers().is_empty());
    }

    #[test]
    fn test_pod_selector() {
        let w = workload(deployment_body(json!([])));
        let sel = w.pod_selector();
        assert_eq!(sel.get("app").map(String::as_str), Some("web"));
    }

    #[test]
    fn test_annotation() {
        let w = workload(deployment_body(json!([])));
        assert_eq!(w.annotation("team"), Some("payments"));
        assert_eq!(w.annotation("missing"), None);
    }
}
