/// Pod records as seen by the resolver and the output layer
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;

/// Owner kind that marks a pod as DaemonSet-managed
pub const DAEMON_SET_KIND: &str = "DaemonSet";

/// Weak `(kind, name)` back-reference from a pod to the resource that created it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
}

impl OwnerRef {
    pub fn is_daemon_set(&self) -> bool {
        self.kind == DAEMON_SET_KIND
    }
}

/// Per-container status summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub name: String,
    pub ready: bool,
    pub restart_count: i32,
}

/// Read-only snapshot of one pod, fetched fresh for every invocation
#[derive(Debug, Clone, PartialEq)]
pub struct PodRecord {
    pub name: String,
    pub namespace: String,
    /// Empty when the pod is not scheduled yet
    pub node_name: String,
    /// Owner references in the order the API returned them
    pub owners: Vec<OwnerRef>,
    pub phase: String,
    pub containers: Vec<ContainerRecord>,
    /// Full object, kept for JSON/YAML output and describe
    pub pod: Pod,
}

impl From<Pod> for PodRecord {
    fn from(pod: Pod) -> Self {
        let owners = pod
            .metadata
            .owner_references
            .iter()
            .flatten()
            .map(|owner| OwnerRef {
                kind: owner.kind.clone(),
                name: owner.name.clone(),
            })
            .collect();

        let status = pod.status.as_ref();
        let phase = status
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        let containers = status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| {
                statuses
                    .iter()
                    .map(|c| ContainerRecord {
                        name: c.name.clone(),
                        ready: c.ready,
                        restart_count: c.restart_count,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            node_name: pod
                .spec
                .as_ref()
                .and_then(|s| s.node_name.clone())
                .unwrap_or_default(),
            owners,
            phase,
            containers,
            pod,
        }
    }
}

impl PodRecord {
    /// `(ready, total)` container counts
    pub fn ready_counts(&self) -> (usize, usize) {
        let ready = self.containers.iter().filter(|c| c.ready).count();
        (ready, self.containers.len())
    }

    pub fn restarts(&self) -> i32 {
        self.containers.iter().map(|c| c.restart_count).sum()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.pod.metadata.creation_timestamp.as_ref().map(|t| t.0)
    }

    pub fn pod_ip(&self) -> Option<&str> {
        self.pod.status.as_ref()?.pod_ip.as_deref()
    }

    pub fn nominated_node(&self) -> Option<&str> {
        self.pod
            .status
            .as_ref()?
            .nominated_node_name
            .as_deref()
            .filter(|n| !n.is_empty())
    }

    /// Condition types reported before the pod became Ready, or `None` once it is Ready
    pub fn readiness_gates(&self) -> Option<Vec<String>> {
        let conditions = self.pod.status.as_ref()?.conditions.as_ref()?;
        let mut gates = Vec::new();
        for condition in conditions {
            if condition.type_ == "Ready" && condition.status == "True" {
                return None;
            }
            gates.push(condition.type_.clone());
        }
        if gates.is_empty() {
            None
        } else {
            Some(gates)
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use k8s_openapi::api::core::v1::{Pod, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    use super::PodRecord;

    /// Build a pod record with the given node and `(kind, name)` owners
    pub fn pod(name: &str, node: &str, owners: &[(&str, &str)]) -> PodRecord {
        let owner_references = owners
            .iter()
            .map(|(kind, owner)| OwnerReference {
                api_version: "apps/v1".to_string(),
                kind: kind.to_string(),
                name: owner.to_string(),
                uid: format!("uid-{}", owner),
                ..Default::default()
            })
            .collect();

        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                owner_references: Some(owner_references),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: (!node.is_empty()).then(|| node.to_string()),
                ..Default::default()
            }),
            status: None,
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::pod;
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerStatus, PodCondition, PodStatus};

    #[test]
    fn test_record_from_pod() {
        let record = pod("fluentd-abc", "node-a", &[("DaemonSet", "fluentd")]);
        assert_eq!(record.name, "fluentd-abc");
        assert_eq!(record.node_name, "node-a");
        assert_eq!(record.phase, "Unknown");
        assert_eq!(
            record.owners,
            vec![OwnerRef {
                kind: "DaemonSet".to_string(),
                name: "fluentd".to_string()
            }]
        );
        assert!(record.owners[0].is_daemon_set());
    }

    #[test]
    fn test_unscheduled_pod_has_empty_node() {
        let record = pod("pending", "", &[("DaemonSet", "fluentd")]);
        assert_eq!(record.node_name, "");
    }

    #[test]
    fn test_container_counts() {
        let mut record = pod("p", "a", &[]);
        record.pod.status = Some(PodStatus {
            phase: Some("Running".to_string()),
            container_statuses: Some(vec![
                ContainerStatus {
                    name: "app".to_string(),
                    ready: true,
                    restart_count: 2,
                    ..Default::default()
                },
                ContainerStatus {
                    name: "sidecar".to_string(),
                    ready: false,
                    restart_count: 1,
                    ..Default::default()
                },
            ]),
            ..Default::default()
        });
        let record = PodRecord::from(record.pod);
        assert_eq!(record.phase, "Running");
        assert_eq!(record.ready_counts(), (1, 2));
        assert_eq!(record.restarts(), 3);
    }

    #[test]
    fn test_readiness_gates() {
        let mut record = pod("p", "a", &[]);
        let condition = |type_: &str, status: &str| PodCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            ..Default::default()
        };
        record.pod.status = Some(PodStatus {
            conditions: Some(vec![
                condition("PodScheduled", "True"),
                condition("Initialized", "True"),
            ]),
            ..Default::default()
        });
        assert_eq!(
            record.readiness_gates(),
            Some(vec!["PodScheduled".to_string(), "Initialized".to_string()])
        );

        record.pod.status = Some(PodStatus {
            conditions: Some(vec![condition("Ready", "True")]),
            ..Default::default()
        });
        assert_eq!(record.readiness_gates(), None);
    }
}
