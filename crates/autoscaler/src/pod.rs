//! Typed pod snapshots taken at the watch boundary.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::Pod;

use crate::error::{Error, Result};
use crate::resources::{total_demand, ContainerResources, ResourceTotals};

/// Phase reported by pods that have not been bound to a node yet.
pub const PHASE_PENDING: &str = "Pending";

/// Stable pod identity: `namespace/name`, or just `name` for cluster-scoped keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PodKey(String);

impl PodKey {
    #[must_use]
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        match namespace {
            Some(ns) if !ns.is_empty() => Self(format!("{ns}/{name}")),
            _ => Self(name.to_string()),
        }
    }

    /// Key of a pod object. Fails when the pod has no name.
    pub fn from_pod(pod: &Pod) -> Result<Self> {
        let name = pod
            .metadata
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::InvalidPod("pod has no name".to_string()))?;
        Ok(Self::new(pod.metadata.namespace.as_deref(), name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PodKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The first condition a pod reports, usually `PodScheduled`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulingCondition {
    pub condition_type: String,
    pub reason: Option<String>,
    pub message: Option<String>,
}

/// Everything the autoscaler needs to know about one pod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodSnapshot {
    pub key: PodKey,
    pub phase: Option<String>,
    pub first_condition: Option<SchedulingCondition>,
    pub node_selector: BTreeMap<String, String>,
    pub containers: Vec<ContainerResources>,
}

impl PodSnapshot {
    /// Build a snapshot from a pod object.
    ///
    /// Fails when the pod has no name or carries an unparsable resource quantity.
    pub fn from_pod(pod: &Pod) -> Result<Self> {
        let key = PodKey::from_pod(pod)?;

        let status = pod.status.as_ref();
        let phase = status.and_then(|s| s.phase.clone());
        let first_condition = status
            .and_then(|s| s.conditions.as_ref())
            .and_then(|conditions| conditions.first())
            .map(|c| SchedulingCondition {
                condition_type: c.type_.clone(),
                reason: c.reason.clone(),
                message: c.message.clone(),
            });

        let spec = pod.spec.as_ref();
        let node_selector = spec
            .and_then(|s| s.node_selector.clone())
            .unwrap_or_default();
        let containers = spec
            .map(|s| s.containers.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|c| ContainerResources::from_requirements(c.resources.as_ref()))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| Error::InvalidPod(format!("{key}: {e}")))?;

        Ok(Self {
            key,
            phase,
            first_condition,
            node_selector,
            containers,
        })
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.phase.as_deref() == Some(PHASE_PENDING)
    }

    /// Effective CPU and memory across all containers.
    #[must_use]
    pub fn demand(&self) -> ResourceTotals {
        total_demand(&self.containers)
    }
}
