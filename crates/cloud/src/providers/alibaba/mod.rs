//! Alibaba Cloud node pool provider.
//!
//! Implements the [`NodePoolProvider`] trait for ACK (Container Service for
//! Kubernetes) using the `2015-12-15` ROA API.
//!
//! ## Operations
//!
//! - **DescribeClusterDetail** - `GET /clusters/{cluster_id}`
//! - **DescribeClusterNodePoolDetail** - `GET /clusters/{cluster_id}/nodepools/{nodepool_id}`
//! - **ScaleClusterNodePool** - `POST /clusters/{cluster_id}/nodepools/{nodepool_id}`
//!
//! [`NodePoolProvider`]: crate::providers::NodePoolProvider

mod client;
mod models;

pub use client::Ack;
pub use models::*;
