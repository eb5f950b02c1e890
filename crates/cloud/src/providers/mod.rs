//! Node pool provider abstractions.
//!
//! This module defines the common trait and types for providers.

pub mod alibaba;
mod traits;

pub use traits::{
    CloudProviderError, ClusterDetail, ClusterState, NodePoolDetail, NodePoolProvider,
    NodePoolState, ScaleOutTask,
};

// Re-export provider clients
pub use alibaba::Ack;
