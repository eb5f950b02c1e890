//! Node and cluster lookups against the Kubernetes API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Node};
use kube::api::ListParams;
use kube::{Api, Client};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Node label carrying the ACK node pool id.
pub const NODE_POOL_LABEL: &str = "alibabacloud.com/nodepool-id";

/// Node label carrying the cloud region.
pub const REGION_LABEL: &str = "topology.kubernetes.io/region";

/// Namespace and name of the ConfigMap ACK writes the cluster id to.
pub const CLUSTER_PROFILE_NAMESPACE: &str = "kube-system";
pub const CLUSTER_PROFILE_NAME: &str = "ack-cluster-profile";
pub const CLUSTER_ID_KEY: &str = "clusterid";

/// Finds the node pool that would host a pod with a given node selector.
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    /// Node pool id of any node matching `selector`, or `None` when no node
    /// matches or the matching node is unlabelled. An empty selector matches
    /// every node.
    async fn node_pool_for(&self, selector: &BTreeMap<String, String>) -> Result<Option<String>>;
}

/// Render a node selector as an equality-based label selector.
#[must_use]
pub fn label_selector(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn node_label<'a>(node: &'a Node, label: &str) -> Option<&'a str> {
    node.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(label))
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

async fn first_node(api: &Api<Node>, selector: &str) -> Result<Option<Node>> {
    let mut params = ListParams::default().limit(1);
    if !selector.is_empty() {
        params = params.labels(selector);
    }
    Ok(api.list(&params).await?.items.into_iter().next())
}

/// [`NodeDirectory`] backed by the cluster's node list.
#[derive(Clone)]
pub struct KubeNodeDirectory {
    nodes: Api<Node>,
}

impl KubeNodeDirectory {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            nodes: Api::all(client),
        }
    }
}

#[async_trait]
impl NodeDirectory for KubeNodeDirectory {
    async fn node_pool_for(&self, selector: &BTreeMap<String, String>) -> Result<Option<String>> {
        let selector = label_selector(selector);
        let node = first_node(&self.nodes, &selector).await?;
        let pool = node
            .as_ref()
            .and_then(|n| node_label(n, NODE_POOL_LABEL))
            .map(str::to_string);
        debug!(selector = %selector, node_pool = ?pool, "Resolved node pool");
        Ok(pool)
    }
}

/// Read the ACK cluster id from the cluster profile ConfigMap.
pub async fn discover_cluster_id(client: Client) -> Result<String> {
    let api: Api<ConfigMap> = Api::namespaced(client, CLUSTER_PROFILE_NAMESPACE);
    let profile = api.get_opt(CLUSTER_PROFILE_NAME).await?.ok_or_else(|| {
        Error::Discovery(format!(
            "ConfigMap {CLUSTER_PROFILE_NAMESPACE}/{CLUSTER_PROFILE_NAME} not found"
        ))
    })?;

    let cluster_id = profile
        .data
        .as_ref()
        .and_then(|data| data.get(CLUSTER_ID_KEY))
        .filter(|id| !id.is_empty())
        .cloned()
        .ok_or_else(|| {
            Error::Discovery(format!(
                "ConfigMap {CLUSTER_PROFILE_NAME} has no '{CLUSTER_ID_KEY}' key"
            ))
        })?;

    info!(cluster_id = %cluster_id, "Discovered cluster id");
    Ok(cluster_id)
}

/// Read the cloud region from the first node's topology label.
pub async fn discover_region(client: Client) -> Result<String> {
    let api: Api<Node> = Api::all(client);
    let node = first_node(&api, "")
        .await?
        .ok_or_else(|| Error::Discovery("cluster has no nodes".to_string()))?;

    let region = node_label(&node, REGION_LABEL)
        .map(str::to_string)
        .ok_or_else(|| Error::Discovery(format!("node has no '{REGION_LABEL}' label")))?;

    info!(region = %region, "Discovered region");
    Ok(region)
}
