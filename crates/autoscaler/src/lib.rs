//! Node pool autoscaler for ACK clusters.
//!
//! Pods that the scheduler rejects for lack of CPU or memory are tracked in a
//! [`PendingStore`]. A [`BatchTrigger`] groups them into batches, either when
//! enough have accumulated or on a fixed interval, and a [`ScaleCoordinator`]
//! turns each batch into a scale-out request against the node pool the pods
//! select. Dispatched pods become eligible again after a cooldown, so a pod
//! that stays pending keeps driving capacity until it is placed.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod nodes;
pub mod pod;
pub mod resources;
pub mod store;
pub mod trigger;
pub mod watcher;

pub use config::{Config, LogFormat};
pub use coordinator::{BatchOutcome, ScaleCoordinator, ScaleTarget};
pub use error::{Error, Result};
pub use nodes::{KubeNodeDirectory, NodeDirectory};
pub use pod::{PodKey, PodSnapshot};
pub use resources::{ContainerResources, ResourceTotals};
pub use store::{Batch, ItemState, PendingStore};
pub use trigger::BatchTrigger;
pub use watcher::{Classification, EventWatcher, PodEvent};
