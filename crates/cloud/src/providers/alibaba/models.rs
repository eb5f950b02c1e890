//! ACK (Container Service for Kubernetes) request and response models.

use serde::{Deserialize, Serialize};

// ============================================================================
// Cluster types
// ============================================================================

/// `DescribeClusterDetail` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct AckCluster {
    /// Cluster ID.
    pub cluster_id: String,
    /// Cluster name.
    #[serde(default)]
    pub name: String,
    /// Cluster state (`running`, `updating`, ...).
    pub state: String,
    /// Region ID.
    pub region_id: Option<String>,
    /// Cluster type (`ManagedKubernetes`, ...).
    pub cluster_type: Option<String>,
    /// Kubernetes version.
    pub current_version: Option<String>,
}

// ============================================================================
// Node pool types
// ============================================================================

/// `DescribeClusterNodePoolDetail` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct AckNodePool {
    /// Node pool metadata.
    pub nodepool_info: NodePoolInfo,
    /// Node pool status.
    pub status: NodePoolStatus,
}

/// Node pool metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct NodePoolInfo {
    /// Node pool ID.
    pub nodepool_id: String,
    /// Node pool name.
    #[serde(default)]
    pub name: String,
    /// Region ID.
    pub region_id: Option<String>,
    /// Node pool type.
    #[serde(rename = "type")]
    pub pool_type: Option<String>,
}

/// Node pool status block.
#[derive(Debug, Clone, Deserialize)]
pub struct NodePoolStatus {
    /// Node pool state (`active`, `scaling`, ...).
    pub state: String,
    /// Total nodes.
    #[serde(default)]
    pub total_nodes: u64,
    /// Healthy nodes.
    #[serde(default)]
    pub healthy_nodes: u64,
    /// Nodes still initializing.
    #[serde(default)]
    pub initial_nodes: u64,
    /// Failed nodes.
    #[serde(default)]
    pub failed_nodes: u64,
}

// ============================================================================
// Scale types
// ============================================================================

/// `ScaleClusterNodePool` request body.
#[derive(Debug, Serialize)]
pub struct ScaleNodePoolRequest {
    /// Number of nodes to add.
    pub count: u64,
}

/// `ScaleClusterNodePool` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct ScaleNodePoolResponse {
    /// Asynchronous task ID.
    pub task_id: Option<String>,
    /// Request ID.
    #[serde(rename = "request_id")]
    pub request_id: Option<String>,
}

/// Error body returned by ROA-style endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct AckErrorBody {
    /// Error code.
    #[serde(default)]
    pub code: String,
    /// Human readable message.
    #[serde(default)]
    pub message: String,
    /// Request ID.
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
}
