/// DaemonSet pod resolution
///
/// Maps a pod inventory snapshot plus an optional DaemonSet name and node
/// name onto the pods those DaemonSets own, and the DaemonSet names found.
use anyhow::Result;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

use crate::k8s::{PodInventory, PodRecord};

/// Which DaemonSet pods to select. Empty or missing values match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionFilter {
    pub daemon_set_name: Option<String>,
    pub node_name: Option<String>,
}

impl ResolutionFilter {
    pub fn new(daemon_set_name: Option<String>, node_name: Option<String>) -> Self {
        Self {
            daemon_set_name,
            node_name,
        }
    }

    fn daemon_set(&self) -> Option<&str> {
        self.daemon_set_name.as_deref().filter(|n| !n.is_empty())
    }

    fn node(&self) -> Option<&str> {
        self.node_name.as_deref().filter(|n| !n.is_empty())
    }

    /// Name of the first DaemonSet owner of `pod` that this filter accepts.
    ///
    /// Returns `None` when the node filter rejects the pod or no owner matches.
    pub fn attribute<'a>(&self, pod: &'a PodRecord) -> Option<&'a str> {
        if let Some(node) = self.node() {
            if pod.node_name != node {
                return None;
            }
        }

        pod.owners
            .iter()
            .find(|owner| {
                owner.is_daemon_set() && self.daemon_set().map_or(true, |ds| owner.name == ds)
            })
            .map(|owner| owner.name.as_str())
    }
}

/// Matching pods in inventory order plus the distinct DaemonSet names they are attributed to
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionResult {
    pub pods: Vec<PodRecord>,
    pub daemon_set_names: BTreeSet<String>,
}

impl ResolutionResult {
    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    /// The single matched pod, for operations that must not guess
    pub fn single(&self) -> Result<&PodRecord, SelectionError> {
        match self.pods.as_slice() {
            [] => Err(SelectionError::NoPods),
            [pod] => Ok(pod),
            pods => Err(SelectionError::Ambiguous {
                pods: pods.iter().map(|p| p.name.clone()).collect(),
            }),
        }
    }
}

/// Selection outcomes where exactly one pod was required
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("No pods found")]
    NoPods,

    #[error(
        "More than one pod matched ({}): {}. Use --node to pick one",
        .pods.len(),
        .pods.join(", ")
    )]
    Ambiguous { pods: Vec<String> },
}

/// Resolve `filter` against an inventory snapshot
pub fn resolve(inventory: &[PodRecord], filter: &ResolutionFilter) -> ResolutionResult {
    let mut result = ResolutionResult::default();

    for pod in inventory {
        if let Some(owner) = filter.attribute(pod) {
            result.daemon_set_names.insert(owner.to_string());
            result.pods.push(pod.clone());
        }
    }

    result
}

/// List pods in `namespace` and resolve `filter` against them
pub async fn fetch(
    inventory: &dyn PodInventory,
    namespace: &str,
    filter: &ResolutionFilter,
) -> Result<ResolutionResult> {
    let pods = inventory.list_pods(namespace).await?;
    let result = resolve(&pods, filter);
    debug!(
        "Resolved {} of {} pod(s) in {} to {} DaemonSet(s)",
        result.pods.len(),
        pods.len(),
        namespace,
        result.daemon_set_names.len()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::pods::fixtures::pod;
    use async_trait::async_trait;

    fn filter(ds: &str, node: &str) -> ResolutionFilter {
        ResolutionFilter::new(Some(ds.to_string()), Some(node.to_string()))
    }

    fn names(result: &ResolutionResult) -> Vec<&str> {
        result.pods.iter().map(|p| p.name.as_str()).collect()
    }

    fn inventory() -> Vec<PodRecord> {
        vec![
            pod("p1", "A", &[("DaemonSet", "ds1")]),
            pod("p2", "B", &[("DaemonSet", "ds1")]),
            pod("p3", "A", &[("ReplicaSet", "rs1")]),
        ]
    }

    #[test]
    fn test_name_and_node_filter() {
        let result = resolve(&inventory(), &filter("ds1", "A"));
        assert_eq!(names(&result), vec!["p1"]);
        assert_eq!(
            result.daemon_set_names,
            BTreeSet::from(["ds1".to_string()])
        );
    }

    #[test]
    fn test_empty_filter_lists_all_daemon_set_pods() {
        let result = resolve(&inventory(), &ResolutionFilter::default());
        assert_eq!(names(&result), vec!["p1", "p2"]);
        assert_eq!(
            result.daemon_set_names,
            BTreeSet::from(["ds1".to_string()])
        );

        let result = resolve(&inventory(), &filter("", ""));
        assert_eq!(names(&result), vec!["p1", "p2"]);
    }

    #[test]
    fn test_node_filter_applies_before_owner_match() {
        let pods = vec![
            pod("a-1", "A", &[("DaemonSet", "ds1")]),
            pod("b-1", "B", &[("DaemonSet", "ds2")]),
            pod("a-2", "A", &[("DaemonSet", "ds2")]),
        ];
        let result = resolve(&pods, &filter("", "A"));
        assert_eq!(names(&result), vec!["a-1", "a-2"]);
        assert!(result.pods.iter().all(|p| p.node_name == "A"));
        assert_eq!(
            result.daemon_set_names,
            BTreeSet::from(["ds1".to_string(), "ds2".to_string()])
        );
    }

    #[test]
    fn test_unscheduled_pod_only_matches_without_node_filter() {
        let pods = vec![pod("pending", "", &[("DaemonSet", "ds1")])];
        assert!(resolve(&pods, &filter("ds1", "A")).is_empty());
        assert_eq!(names(&resolve(&pods, &filter("ds1", ""))), vec!["pending"]);
    }

    #[test]
    fn test_pod_without_owners_never_matches() {
        let pods = vec![pod("orphan", "A", &[])];
        for f in [filter("", ""), filter("ds1", ""), filter("", "A")] {
            assert!(resolve(&pods, &f).is_empty());
        }
    }

    #[test]
    fn test_first_matching_owner_wins() {
        let pods = vec![pod(
            "odd",
            "A",
            &[
                ("ReplicaSet", "rs1"),
                ("DaemonSet", "first"),
                ("DaemonSet", "second"),
            ],
        )];

        let result = resolve(&pods, &ResolutionFilter::default());
        assert_eq!(names(&result), vec!["odd"]);
        assert_eq!(
            result.daemon_set_names,
            BTreeSet::from(["first".to_string()])
        );

        // A name filter selects which owner the pod is attributed to
        let result = resolve(&pods, &filter("second", ""));
        assert_eq!(
            result.daemon_set_names,
            BTreeSet::from(["second".to_string()])
        );
    }

    #[test]
    fn test_names_match_attributed_owners() {
        let pods = vec![
            pod("a", "A", &[("DaemonSet", "logs")]),
            pod("b", "A", &[("DaemonSet", "metrics")]),
            pod("c", "B", &[("Job", "batch")]),
            pod("d", "B", &[("DaemonSet", "logs")]),
        ];
        let f = ResolutionFilter::default();
        let result = resolve(&pods, &f);

        let attributed: BTreeSet<String> = result
            .pods
            .iter()
            .filter_map(|p| f.attribute(p))
            .map(String::from)
            .collect();
        assert_eq!(result.daemon_set_names, attributed);
        assert_eq!(result.pods.len(), 3);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let pods = inventory();
        let f = filter("ds1", "");
        assert_eq!(resolve(&pods, &f), resolve(&pods, &f));
    }

    #[test]
    fn test_single_selection() {
        let result = resolve(&inventory(), &filter("ds1", "B"));
        assert_eq!(result.single().map(|p| p.name.as_str()), Ok("p2"));

        let result = resolve(&inventory(), &filter("missing", ""));
        assert_eq!(result.single(), Err(SelectionError::NoPods));

        let result = resolve(&inventory(), &filter("ds1", ""));
        let err = result.single().unwrap_err();
        assert_eq!(
            err,
            SelectionError::Ambiguous {
                pods: vec!["p1".to_string(), "p2".to_string()]
            }
        );
        assert!(err.to_string().contains("p1, p2"));
    }

    struct StaticInventory(Vec<PodRecord>);

    #[async_trait]
    impl PodInventory for StaticInventory {
        async fn list_pods(&self, namespace: &str) -> Result<Vec<PodRecord>> {
            if namespace == "forbidden" {
                anyhow::bail!("pods is forbidden");
            }
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_fetch_resolves_listed_pods() {
        let source = StaticInventory(inventory());
        let result = fetch(&source, "default", &filter("ds1", "A")).await.unwrap();
        assert_eq!(names(&result), vec!["p1"]);
    }

    #[tokio::test]
    async fn test_fetch_propagates_inventory_errors() {
        let source = StaticInventory(inventory());
        let err = fetch(&source, "forbidden", &ResolutionFilter::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("forbidden"));
    }
}
