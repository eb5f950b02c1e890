//! In-memory tracking of pods that failed scheduling for lack of resources.
//!
//! Every operation takes the single store mutex for the duration of the call
//! and never calls out while holding it. Callers never see a [`WorkItem`],
//! only payloads and states.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::pod::{PodKey, PodSnapshot};

/// Tracked pod payload.
pub type Payload = Arc<PodSnapshot>;

/// A batch of payloads handed from the trigger to the coordinator.
pub type Batch = Vec<Payload>;

/// Lifecycle of a tracked item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// Eligible for the next batch.
    Idle,
    /// Dispatched; waiting for resolution or the cooldown reset.
    Processing,
}

#[derive(Debug)]
struct WorkItem {
    payload: Payload,
    state: ItemState,
}

/// Keyed store of unschedulable pods.
#[derive(Debug, Default)]
pub struct PendingStore {
    items: Mutex<HashMap<PodKey, WorkItem>>,
}

impl PendingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PodKey, WorkItem>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `payload` under `key` as idle. Returns `false` if the key was
    /// already tracked, in which case nothing changes.
    pub fn add(&self, key: PodKey, payload: Payload) -> bool {
        let mut items = self.lock();
        if items.contains_key(&key) {
            return false;
        }
        items.insert(
            key,
            WorkItem {
                payload,
                state: ItemState::Idle,
            },
        );
        true
    }

    #[must_use]
    pub fn exists(&self, key: &PodKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Stop tracking `key`. Returns whether it was tracked.
    pub fn remove(&self, key: &PodKey) -> bool {
        self.lock().remove(key).is_some()
    }

    #[must_use]
    pub fn count_idle(&self) -> usize {
        self.lock()
            .values()
            .filter(|item| item.state == ItemState::Idle)
            .count()
    }

    /// Take every idle item, mark it processing, and return the payloads
    /// ordered by key.
    pub fn drain_idle(&self) -> Batch {
        let mut items = self.lock();
        let mut drained: Vec<(&PodKey, &mut WorkItem)> = items
            .iter_mut()
            .filter(|(_, item)| item.state == ItemState::Idle)
            .collect();
        drained.sort_by(|a, b| a.0.cmp(b.0));

        drained
            .into_iter()
            .map(|(_, item)| {
                item.state = ItemState::Processing;
                Arc::clone(&item.payload)
            })
            .collect()
    }

    /// Return `key` to idle if it is still tracked.
    pub fn reset_if_present(&self, key: &PodKey) -> bool {
        match self.lock().get_mut(key) {
            Some(item) => {
                item.state = ItemState::Idle;
                true
            }
            None => false,
        }
    }

    /// Keep only the payloads whose keys are still tracked.
    #[must_use]
    pub fn retain_present(&self, batch: &[Payload]) -> Batch {
        let items = self.lock();
        batch
            .iter()
            .filter(|payload| items.contains_key(&payload.key))
            .cloned()
            .collect()
    }

    /// Drop every tracked key not in `seen`. Returns the dropped keys.
    pub fn prune_absent(&self, seen: &HashSet<PodKey>) -> Vec<PodKey> {
        let mut items = self.lock();
        let stale: Vec<PodKey> = items
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        for key in &stale {
            items.remove(key);
        }
        stale
    }

    #[must_use]
    pub fn state_of(&self, key: &PodKey) -> Option<ItemState> {
        self.lock().get(key).map(|item| item.state)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
