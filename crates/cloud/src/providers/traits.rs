//! Node pool provider trait and common types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during provider operations.
#[derive(Error, Debug)]
pub enum CloudProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication error.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The response parsed but lacked a field the caller depends on.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

// ============================================================================
// Cluster types
// ============================================================================

/// Managed cluster state as reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterState {
    /// Cluster is being created.
    Initial,
    /// Cluster is running and accepts operations.
    Running,
    /// Cluster configuration is being updated.
    Updating,
    /// Cluster is scaling.
    Scaling,
    /// Cluster is waiting on an operation.
    Waiting,
    /// Cluster lost contact with the control plane.
    Disconnected,
    /// Cluster is stopped.
    Stopped,
    /// Cluster is being deleted.
    Deleting,
    /// Cluster is in an error state.
    Failed,
    /// Unknown state.
    #[serde(other)]
    Unknown,
}

impl ClusterState {
    /// Map a raw state string to a [`ClusterState`].
    #[must_use]
    pub fn from_raw(state: &str) -> Self {
        match state {
            "initial" => Self::Initial,
            "running" => Self::Running,
            "updating" => Self::Updating,
            "scaling" => Self::Scaling,
            "waiting" => Self::Waiting,
            "disconnected" => Self::Disconnected,
            "stopped" => Self::Stopped,
            "deleting" => Self::Deleting,
            "failed" | "updating_failed" | "deleted_failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Running => write!(f, "running"),
            Self::Updating => write!(f, "updating"),
            Self::Scaling => write!(f, "scaling"),
            Self::Waiting => write!(f, "waiting"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Stopped => write!(f, "stopped"),
            Self::Deleting => write!(f, "deleting"),
            Self::Failed => write!(f, "failed"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A managed Kubernetes cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDetail {
    /// Cluster identifier.
    pub id: String,
    /// Cluster name.
    pub name: String,
    /// Current state.
    pub state: ClusterState,
}

// ============================================================================
// Node pool types
// ============================================================================

/// Node pool state as reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePoolState {
    /// Node pool is being created.
    Initial,
    /// Node pool is idle and accepts scale requests.
    Active,
    /// Nodes are being added.
    Scaling,
    /// Nodes are being removed.
    Removing,
    /// Node pool configuration is being updated.
    Updating,
    /// Node pool is being deleted.
    Deleting,
    /// Last operation on the node pool failed.
    Failed,
    /// Unknown state.
    #[serde(other)]
    Unknown,
}

impl NodePoolState {
    /// Map a raw state string to a [`NodePoolState`].
    #[must_use]
    pub fn from_raw(state: &str) -> Self {
        match state {
            "initial" => Self::Initial,
            "active" => Self::Active,
            "scaling" => Self::Scaling,
            "removing" => Self::Removing,
            "updating" => Self::Updating,
            "deleting" => Self::Deleting,
            "failed" | "scaling_failed" | "removing_failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for NodePoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Active => write!(f, "active"),
            Self::Scaling => write!(f, "scaling"),
            Self::Removing => write!(f, "removing"),
            Self::Updating => write!(f, "updating"),
            Self::Deleting => write!(f, "deleting"),
            Self::Failed => write!(f, "failed"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A node pool inside a managed cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePoolDetail {
    /// Node pool identifier.
    pub id: String,
    /// Node pool name.
    pub name: String,
    /// Current state.
    pub state: NodePoolState,
    /// Number of nodes currently in the pool.
    pub total_nodes: u64,
}

/// Handle for an accepted scale-out request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleOutTask {
    /// Opaque task identifier issued by the provider.
    pub task_id: String,
}

/// Trait for providers that manage scalable node pools.
#[async_trait]
pub trait NodePoolProvider: Send + Sync {
    /// Get cluster detail by ID.
    async fn describe_cluster(&self, cluster_id: &str)
        -> Result<ClusterDetail, CloudProviderError>;

    /// Get node pool detail by cluster and node pool ID.
    async fn describe_node_pool(
        &self,
        cluster_id: &str,
        node_pool_id: &str,
    ) -> Result<NodePoolDetail, CloudProviderError>;

    /// Add `count` nodes to a node pool.
    async fn scale_out_node_pool(
        &self,
        cluster_id: &str,
        node_pool_id: &str,
        count: u64,
    ) -> Result<ScaleOutTask, CloudProviderError>;
}
