//! Pod event ingestion.
//!
//! The kube list-watch stream is converted into [`PodEvent`]s at this
//! boundary; [`EventWatcher::handle`] then classifies each one and updates
//! the [`PendingStore`].

use std::collections::HashSet;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::{self, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::pod::{PodKey, PodSnapshot, PHASE_PENDING};
use crate::store::PendingStore;

/// Condition reason the scheduler reports for pods it could not place.
pub const REASON_UNSCHEDULABLE: &str = "Unschedulable";

const INSUFFICIENT_CPU: &str = "Insufficient cpu";
const INSUFFICIENT_MEMORY: &str = "Insufficient memory";

/// A pod notification decided once at the watch boundary.
#[derive(Debug, Clone)]
pub enum PodEvent {
    /// The pod was added, updated or re-delivered by a resync.
    Applied(PodSnapshot),
    /// The pod was deleted.
    Deleted(PodSnapshot),
}

/// What a single event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The pod started being tracked.
    Tracked,
    /// The pod stopped being tracked.
    Released,
    /// Nothing changed.
    Ignored,
}

/// True when the scheduler rejected the pod for lack of CPU or memory.
fn is_resource_shortage(snapshot: &PodSnapshot) -> bool {
    snapshot.first_condition.as_ref().is_some_and(|condition| {
        condition.reason.as_deref() == Some(REASON_UNSCHEDULABLE)
            && condition.message.as_deref().is_some_and(|message| {
                message.contains(INSUFFICIENT_CPU) || message.contains(INSUFFICIENT_MEMORY)
            })
    })
}

/// Applies pod events to the pending store.
#[derive(Clone)]
pub struct EventWatcher {
    store: Arc<PendingStore>,
}

impl EventWatcher {
    #[must_use]
    pub fn new(store: Arc<PendingStore>) -> Self {
        Self { store }
    }

    /// Classify one event and update the store.
    pub fn handle(&self, event: PodEvent) -> Classification {
        match event {
            PodEvent::Applied(snapshot) if !snapshot.is_pending() => self.release(&snapshot.key),
            PodEvent::Applied(snapshot) => self.track(snapshot),
            PodEvent::Deleted(snapshot) => self.release(&snapshot.key),
        }
    }

    fn track(&self, snapshot: PodSnapshot) -> Classification {
        // Not classified by the scheduler yet.
        if snapshot.first_condition.is_none() {
            return Classification::Ignored;
        }
        if !is_resource_shortage(&snapshot) || self.store.exists(&snapshot.key) {
            return Classification::Ignored;
        }

        let key = snapshot.key.clone();
        if self.store.add(key.clone(), Arc::new(snapshot)) {
            debug!(pod = %key, "Tracking unschedulable pod");
            Classification::Tracked
        } else {
            Classification::Ignored
        }
    }

    fn release(&self, key: &PodKey) -> Classification {
        if self.store.remove(key) {
            debug!(pod = %key, "Released pod");
            Classification::Released
        } else {
            Classification::Ignored
        }
    }

    /// Convert a raw pod and handle it. Malformed pods are logged and skipped.
    ///
    /// Releases only need the key, so deleted and non-pending pods are never
    /// rejected for their resource quantities.
    fn ingest(&self, pod: &Pod, deleted: bool) -> Option<PodKey> {
        let key = match PodKey::from_pod(pod) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "Skipping malformed pod event");
                return None;
            }
        };

        let pending = pod
            .status
            .as_ref()
            .and_then(|status| status.phase.as_deref())
            == Some(PHASE_PENDING);
        if deleted || !pending {
            self.release(&key);
            return Some(key);
        }

        match PodSnapshot::from_pod(pod) {
            Ok(snapshot) => {
                self.handle(PodEvent::Applied(snapshot));
            }
            Err(e) => warn!(pod = %key, error = %e, "Skipping pod with invalid resources"),
        }
        Some(key)
    }

    fn on_watch_event(&self, event: watcher::Event<Pod>, relist: &mut Option<HashSet<PodKey>>) {
        match event {
            watcher::Event::Init => {
                debug!("Pod relist started");
                *relist = Some(HashSet::new());
            }
            watcher::Event::InitApply(pod) => {
                if let (Some(key), Some(seen)) = (self.ingest(&pod, false), relist.as_mut()) {
                    seen.insert(key);
                }
            }
            watcher::Event::InitDone => {
                if let Some(seen) = relist.take() {
                    let pruned = self.store.prune_absent(&seen);
                    info!(
                        pods = seen.len(),
                        pruned = pruned.len(),
                        tracked = self.store.len(),
                        "Pod relist complete"
                    );
                }
            }
            watcher::Event::Apply(pod) => {
                self.ingest(&pod, false);
            }
            watcher::Event::Delete(pod) => {
                self.ingest(&pod, true);
            }
        }
    }

    /// Re-deliver every cached pod as an update.
    fn resync(&self, cache: &Store<Pod>) {
        let pods = cache.state();
        debug!(pods = pods.len(), "Periodic pod resync");
        for pod in pods {
            self.ingest(&pod, false);
        }
    }

    /// Watch pods cluster-wide until `shutdown` fires.
    ///
    /// Watch errors are logged and retried with backoff. Every `resync` the
    /// cached pods are re-applied so classification catches up with any
    /// missed transition.
    #[instrument(skip_all, fields(resync_secs = resync.as_secs()))]
    pub async fn run(&self, client: Client, resync: Duration, shutdown: CancellationToken) {
        info!("Starting pod watcher");

        let api: Api<Pod> = Api::all(client);
        let (cache, writer) = reflector::store::<Pod>();
        let stream = reflector::reflector(
            writer,
            watcher::watcher(api, watcher::Config::default()).default_backoff(),
        );
        let mut stream = pin!(stream);

        let mut resync_tick = interval_at(Instant::now() + resync, resync);
        resync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut relist = None;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = resync_tick.tick() => self.resync(&cache),
                next = stream.next() => match next {
                    Some(Ok(event)) => self.on_watch_event(event, &mut relist),
                    Some(Err(e)) => warn!(error = %e, "Pod watch error"),
                    None => {
                        warn!("Pod watch stream ended");
                        break;
                    }
                },
            }
        }

        info!("Pod watcher stopped");
    }
}
