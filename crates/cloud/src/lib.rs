//! Managed node pool integrations for the node autoscaler.
//!
//! The autoscaler only needs three things from a cloud control plane: the
//! state of the cluster, the state of a node pool, and a way to add nodes to
//! that pool. [`NodePoolProvider`] captures that surface; [`Ack`] implements it
//! for Alibaba Cloud Container Service for Kubernetes.

pub mod providers;

pub use providers::{
    alibaba, Ack, CloudProviderError, ClusterDetail, ClusterState, NodePoolDetail,
    NodePoolProvider, NodePoolState, ScaleOutTask,
};
