//! Per-batch scale-out workflow.
//!
//! Each batch moves through target resolution, a readiness wait on the
//! cluster and node pool, revalidation against the store, sizing and the
//! scale-out call. Whatever happens, the batch's keys are handed back to the
//! store after the cooldown so pods that are still pending get another try.

use std::sync::Arc;
use std::time::Duration;

use ack_cloud::{ClusterState, NodePoolProvider, NodePoolState};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Error, Result};
use crate::nodes::NodeDirectory;
use crate::pod::PodKey;
use crate::resources::{nodes_needed, ResourceTotals};
use crate::store::{Batch, PendingStore};

/// Default delay between readiness polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default delay before a dispatched batch becomes eligible again.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(600);

/// Where a batch should land and how many nodes it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleTarget {
    pub node_pool: String,
    pub totals: ResourceTotals,
    pub node_count: u64,
}

/// Terminal state of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The batch was abandoned; its pods recycle after the cooldown.
    Dropped { reason: String },
    /// Every pod in the batch was resolved while waiting.
    Resolved,
    /// A scale-out request was accepted.
    Scaled {
        node_pool: String,
        node_count: u64,
        task_id: String,
    },
}

/// Consumes batches and scales node pools for them.
pub struct ScaleCoordinator {
    store: Arc<PendingStore>,
    provider: Arc<dyn NodePoolProvider>,
    nodes: Arc<dyn NodeDirectory>,
    cluster_id: String,
    memory_standard: u64,
    poll_interval: Duration,
    cooldown: Duration,
    shutdown: CancellationToken,
}

impl ScaleCoordinator {
    /// Create a coordinator sizing nodes of `memory_standard` bytes.
    #[must_use]
    pub fn new(
        store: Arc<PendingStore>,
        provider: Arc<dyn NodePoolProvider>,
        nodes: Arc<dyn NodeDirectory>,
        cluster_id: impl Into<String>,
        memory_standard: u64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            provider,
            nodes,
            cluster_id: cluster_id.into(),
            memory_standard: memory_standard.max(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
            cooldown: DEFAULT_COOLDOWN,
            shutdown,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Process batches one at a time until shutdown or the sender is gone.
    pub async fn run(self, mut batches: mpsc::Receiver<Batch>) {
        info!(cluster_id = %self.cluster_id, "Starting scale coordinator");
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                batch = batches.recv() => match batch {
                    Some(batch) => {
                        self.handle_batch(batch).await;
                    }
                    None => break,
                },
            }
        }
        info!("Scale coordinator stopped");
    }

    /// Run one batch to a terminal state and schedule its cooldown.
    #[instrument(skip_all, fields(batch_size = batch.len()))]
    pub async fn handle_batch(&self, batch: Batch) -> BatchOutcome {
        let keys: Vec<PodKey> = batch.iter().map(|payload| payload.key.clone()).collect();

        let outcome = self.process(batch).await;
        match &outcome {
            BatchOutcome::Dropped { reason } => warn!(reason = %reason, "Batch dropped"),
            BatchOutcome::Resolved => info!("Batch resolved without scaling"),
            BatchOutcome::Scaled {
                node_pool,
                node_count,
                task_id,
            } => info!(
                node_pool = %node_pool,
                node_count,
                task_id = %task_id,
                "Scale-out accepted"
            ),
        }

        self.schedule_cooldown(keys);
        outcome
    }

    async fn process(&self, batch: Batch) -> BatchOutcome {
        let node_pool = match self.resolve_target(&batch).await {
            Ok(Some(pool)) => pool,
            Ok(None) => return dropped("no node pool matches the batch's node selectors"),
            Err(e) => return dropped(format!("node pool lookup failed: {e}")),
        };

        let ready = tokio::select! {
            () = self.shutdown.cancelled() => Err(Error::Cancelled),
            ready = self.await_ready(&node_pool) => ready,
        };
        if let Err(e) = ready {
            return dropped(format!("node pool {node_pool} not ready: {e}"));
        }

        let live = self.store.retain_present(&batch);
        if live.is_empty() {
            return BatchOutcome::Resolved;
        }
        debug!(before = batch.len(), after = live.len(), "Revalidated batch");

        let node_pool = match self.resolve_target(&live).await {
            Ok(Some(pool)) if pool != node_pool => {
                info!(from = %node_pool, to = %pool, "Re-targeting batch");
                pool
            }
            Ok(Some(pool)) => pool,
            Ok(None) => return dropped("no node pool matches the revalidated batch"),
            Err(e) => return dropped(format!("node pool lookup failed after revalidation: {e}")),
        };

        let target = self.size(node_pool, &live);
        debug!(
            node_pool = %target.node_pool,
            cpu_cores = target.totals.cpu_cores,
            memory_bytes = target.totals.memory_bytes,
            node_count = target.node_count,
            "Sized batch"
        );

        match self
            .provider
            .scale_out_node_pool(&self.cluster_id, &target.node_pool, target.node_count)
            .await
        {
            Ok(task) => BatchOutcome::Scaled {
                node_pool: target.node_pool,
                node_count: target.node_count,
                task_id: task.task_id,
            },
            Err(e) => {
                error!(node_pool = %target.node_pool, error = %e, "Scale-out failed");
                dropped(format!("scale-out failed: {e}"))
            }
        }
    }

    /// First node pool any pod in `batch` maps to.
    ///
    /// A failed lookup only skips that pod. The error is returned when every
    /// lookup failed.
    async fn resolve_target(&self, batch: &Batch) -> Result<Option<String>> {
        let mut last_error = None;
        let mut answered = false;
        for payload in batch {
            match self.nodes.node_pool_for(&payload.node_selector).await {
                Ok(Some(pool)) => return Ok(Some(pool)),
                Ok(None) => answered = true,
                Err(e) => {
                    warn!(pod = %payload.key, error = %e, "Node pool lookup failed");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if !answered => Err(e),
            _ => Ok(None),
        }
    }

    /// Poll until the cluster is running and `node_pool` is active.
    ///
    /// The first poll happens immediately. Any provider error ends the wait.
    async fn await_ready(&self, node_pool: &str) -> Result<()> {
        loop {
            let cluster = self.provider.describe_cluster(&self.cluster_id).await?;
            if cluster.state == ClusterState::Running {
                let pool = self
                    .provider
                    .describe_node_pool(&self.cluster_id, node_pool)
                    .await?;
                if pool.state == NodePoolState::Active {
                    return Ok(());
                }
                debug!(node_pool, state = %pool.state, "Waiting for node pool");
            } else {
                debug!(state = %cluster.state, "Waiting for cluster");
            }
            sleep(self.poll_interval).await;
        }
    }

    fn size(&self, node_pool: String, live: &Batch) -> ScaleTarget {
        let totals: ResourceTotals = live.iter().map(|payload| payload.demand()).sum();
        let node_count = nodes_needed(totals.memory_bytes, self.memory_standard).max(1);
        ScaleTarget {
            node_pool,
            totals,
            node_count,
        }
    }

    fn schedule_cooldown(&self, keys: Vec<PodKey>) {
        let store = Arc::clone(&self.store);
        let cooldown = self.cooldown;
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => return,
                () = sleep(cooldown) => {}
            }
            for key in keys {
                if store.reset_if_present(&key) {
                    info!(pod = %key, "Cooldown expired; pod eligible for another batch");
                }
            }
        });
    }
}

fn dropped(reason: impl Into<String>) -> BatchOutcome {
    BatchOutcome::Dropped {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::PodSnapshot;
    use crate::resources::ContainerResources;
    use crate::store::ItemState;
    use ack_cloud::{CloudProviderError, ClusterDetail, NodePoolDetail, ScaleOutTask};
    use async_trait::async_trait;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;
    use tokio::time::Instant;

    const GI: u64 = 1 << 30;

    #[derive(Default)]
    struct FakeProvider {
        cluster: Mutex<VecDeque<std::result::Result<ClusterState, CloudProviderError>>>,
        pools: Mutex<VecDeque<NodePoolState>>,
        fail_scale: bool,
        scaled: Mutex<Vec<(String, u64)>>,
    }

    #[async_trait]
    impl NodePoolProvider for FakeProvider {
        async fn describe_cluster(
            &self,
            cluster_id: &str,
        ) -> std::result::Result<ClusterDetail, CloudProviderError> {
            let state = self
                .cluster
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(ClusterState::Running))?;
            Ok(ClusterDetail {
                id: cluster_id.to_string(),
                name: "test".to_string(),
                state,
            })
        }

        async fn describe_node_pool(
            &self,
            _cluster_id: &str,
            node_pool_id: &str,
        ) -> std::result::Result<NodePoolDetail, CloudProviderError> {
            let state = self
                .pools
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(NodePoolState::Active);
            Ok(NodePoolDetail {
                id: node_pool_id.to_string(),
                name: "pool".to_string(),
                state,
                total_nodes: 3,
            })
        }

        async fn scale_out_node_pool(
            &self,
            _cluster_id: &str,
            node_pool_id: &str,
            count: u64,
        ) -> std::result::Result<ScaleOutTask, CloudProviderError> {
            if self.fail_scale {
                return Err(CloudProviderError::Api {
                    status: 400,
                    message: "QuotaExceeded".to_string(),
                });
            }
            self.scaled
                .lock()
                .unwrap()
                .push((node_pool_id.to_string(), count));
            Ok(ScaleOutTask {
                task_id: "T-1".to_string(),
            })
        }
    }

    struct ScriptedDirectory {
        answers: Mutex<VecDeque<Result<Option<String>>>>,
        fallback: Option<String>,
    }

    impl ScriptedDirectory {
        fn always(pool: Option<&str>) -> Self {
            Self::scripted(&[], pool)
        }

        fn scripted(answers: &[Option<&str>], fallback: Option<&str>) -> Self {
            Self {
                answers: Mutex::new(
                    answers
                        .iter()
                        .map(|a| Ok(a.map(str::to_string)))
                        .collect(),
                ),
                fallback: fallback.map(str::to_string),
            }
        }

        /// Fail the next `failures` lookups, then answer normally.
        fn failing(failures: usize, fallback: Option<&str>) -> Self {
            let directory = Self::always(fallback);
            directory.answers.lock().unwrap().extend(
                (0..failures)
                    .map(|_| Err(Error::Discovery("transient list error".to_string()))),
            );
            directory
        }
    }

    #[async_trait]
    impl NodeDirectory for ScriptedDirectory {
        async fn node_pool_for(
            &self,
            _selector: &BTreeMap<String, String>,
        ) -> Result<Option<String>> {
            let next = self.answers.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    fn track(store: &PendingStore, name: &str, cpu_millis: u64, memory: u64) {
        let key = PodKey::from(name);
        let snapshot = PodSnapshot {
            key: key.clone(),
            phase: Some("Pending".to_string()),
            containers: vec![ContainerResources {
                cpu_request_millis: cpu_millis,
                memory_request_bytes: memory,
                ..Default::default()
            }],
            ..Default::default()
        };
        store.add(key, Arc::new(snapshot));
    }

    fn coordinator(
        store: &Arc<PendingStore>,
        provider: &Arc<FakeProvider>,
        nodes: ScriptedDirectory,
    ) -> ScaleCoordinator {
        ScaleCoordinator::new(
            Arc::clone(store),
            Arc::clone(provider) as Arc<dyn NodePoolProvider>,
            Arc::new(nodes),
            "c-123",
            28 * GI,
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_scales_after_pool_becomes_active_then_recycles() {
        let store = Arc::new(PendingStore::new());
        track(&store, "default/big", 2000, 30 * GI);
        let provider = Arc::new(FakeProvider {
            pools: Mutex::new(VecDeque::from([NodePoolState::Scaling])),
            ..Default::default()
        });
        let coordinator =
            coordinator(&store, &provider, ScriptedDirectory::always(Some("np-1")));

        let started = Instant::now();
        let outcome = coordinator.handle_batch(store.drain_idle()).await;

        assert_eq!(
            outcome,
            BatchOutcome::Scaled {
                node_pool: "np-1".to_string(),
                node_count: 2,
                task_id: "T-1".to_string(),
            }
        );
        let waited = started.elapsed();
        assert!(waited >= DEFAULT_POLL_INTERVAL && waited < DEFAULT_POLL_INTERVAL * 2);
        assert_eq!(*provider.scaled.lock().unwrap(), vec![("np-1".to_string(), 2)]);

        let key = PodKey::from("default/big");
        assert_eq!(store.state_of(&key), Some(ItemState::Processing));
        sleep(DEFAULT_COOLDOWN + Duration::from_secs(1)).await;
        assert_eq!(store.state_of(&key), Some(ItemState::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_running_cluster() {
        let store = Arc::new(PendingStore::new());
        track(&store, "default/a", 1000, GI);
        let provider = Arc::new(FakeProvider {
            cluster: Mutex::new(VecDeque::from([
                Ok(ClusterState::Updating),
                Ok(ClusterState::Scaling),
            ])),
            ..Default::default()
        });
        let coordinator =
            coordinator(&store, &provider, ScriptedDirectory::always(Some("np-1")));

        let started = Instant::now();
        let outcome = coordinator.handle_batch(store.drain_idle()).await;

        assert!(matches!(outcome, BatchOutcome::Scaled { node_count: 1, .. }));
        let waited = started.elapsed();
        assert!(waited >= DEFAULT_POLL_INTERVAL * 2 && waited < DEFAULT_POLL_INTERVAL * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failure_drops_batch_without_scaling() {
        let store = Arc::new(PendingStore::new());
        track(&store, "default/a", 1000, GI);
        let provider = Arc::new(FakeProvider {
            cluster: Mutex::new(VecDeque::from([Err(CloudProviderError::Api {
                status: 500,
                message: "InternalError".to_string(),
            })])),
            ..Default::default()
        });
        let coordinator =
            coordinator(&store, &provider, ScriptedDirectory::always(Some("np-1")));

        let outcome = coordinator.handle_batch(store.drain_idle()).await;

        assert!(matches!(outcome, BatchOutcome::Dropped { .. }));
        assert!(provider.scaled.lock().unwrap().is_empty());

        sleep(DEFAULT_COOLDOWN + Duration::from_secs(1)).await;
        assert_eq!(store.count_idle(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolvable_target_still_recycles() {
        let store = Arc::new(PendingStore::new());
        track(&store, "default/a", 1000, GI);
        let provider = Arc::new(FakeProvider::default());
        let coordinator = coordinator(&store, &provider, ScriptedDirectory::always(None));

        let outcome = coordinator.handle_batch(store.drain_idle()).await;
        assert!(matches!(outcome, BatchOutcome::Dropped { .. }));
        assert_eq!(store.count_idle(), 0);

        sleep(DEFAULT_COOLDOWN + Duration::from_secs(1)).await;
        assert_eq!(store.count_idle(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_resolved_while_waiting_is_not_scaled() {
        let store = Arc::new(PendingStore::new());
        track(&store, "default/a", 1000, GI);
        let provider = Arc::new(FakeProvider::default());
        let coordinator =
            coordinator(&store, &provider, ScriptedDirectory::always(Some("np-1")));

        let batch = store.drain_idle();
        store.remove(&PodKey::from("default/a"));
        let outcome = coordinator.handle_batch(batch).await;

        assert_eq!(outcome, BatchOutcome::Resolved);
        assert!(provider.scaled.lock().unwrap().is_empty());

        sleep(DEFAULT_COOLDOWN + Duration::from_secs(1)).await;
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_revalidated_batch_is_retargeted_and_resized() {
        let store = Arc::new(PendingStore::new());
        track(&store, "default/a", 1000, 40 * GI);
        track(&store, "default/b", 4000, 20 * GI);
        let provider = Arc::new(FakeProvider::default());
        let nodes = ScriptedDirectory::scripted(&[Some("np-1"), Some("np-2")], None);
        let coordinator = coordinator(&store, &provider, nodes);

        let batch = store.drain_idle();
        store.remove(&PodKey::from("default/a"));
        let outcome = coordinator.handle_batch(batch).await;

        assert_eq!(
            outcome,
            BatchOutcome::Scaled {
                node_pool: "np-2".to_string(),
                node_count: 1,
                task_id: "T-1".to_string(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_revalidated_batch_without_pool_is_dropped() {
        let store = Arc::new(PendingStore::new());
        track(&store, "default/a", 1000, GI);
        track(&store, "default/b", 1000, GI);
        let provider = Arc::new(FakeProvider::default());
        let nodes = ScriptedDirectory::scripted(&[Some("np-1"), None], None);
        let coordinator = coordinator(&store, &provider, nodes);

        let batch = store.drain_idle();
        store.remove(&PodKey::from("default/a"));
        let outcome = coordinator.handle_batch(batch).await;

        assert!(matches!(outcome, BatchOutcome::Dropped { .. }));
        assert!(provider.scaled.lock().unwrap().is_empty());

        sleep(DEFAULT_COOLDOWN + Duration::from_secs(1)).await;
        assert_eq!(
            store.state_of(&PodKey::from("default/b")),
            Some(ItemState::Idle)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_error_skips_to_next_pod() {
        let store = Arc::new(PendingStore::new());
        track(&store, "default/a", 1000, GI);
        track(&store, "default/b", 1000, GI);
        let provider = Arc::new(FakeProvider::default());
        let coordinator =
            coordinator(&store, &provider, ScriptedDirectory::failing(1, Some("np-1")));

        let outcome = coordinator.handle_batch(store.drain_idle()).await;

        assert!(matches!(outcome, BatchOutcome::Scaled { .. }));
        assert_eq!(*provider.scaled.lock().unwrap(), vec![("np-1".to_string(), 1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_lookup_failing_drops_batch() {
        let store = Arc::new(PendingStore::new());
        track(&store, "default/a", 1000, GI);
        track(&store, "default/b", 1000, GI);
        let provider = Arc::new(FakeProvider::default());
        let coordinator =
            coordinator(&store, &provider, ScriptedDirectory::failing(2, Some("np-1")));

        let outcome = coordinator.handle_batch(store.drain_idle()).await;

        match outcome {
            BatchOutcome::Dropped { reason } => assert!(reason.contains("transient list error")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(provider.scaled.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_memory_still_requests_one_node() {
        let store = Arc::new(PendingStore::new());
        track(&store, "default/cpu-only", 8000, 0);
        let provider = Arc::new(FakeProvider::default());
        let coordinator =
            coordinator(&store, &provider, ScriptedDirectory::always(Some("np-1")));

        let outcome = coordinator.handle_batch(store.drain_idle()).await;
        assert!(matches!(outcome, BatchOutcome::Scaled { node_count: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scale_failure_is_dropped() {
        let store = Arc::new(PendingStore::new());
        track(&store, "default/a", 1000, GI);
        let provider = Arc::new(FakeProvider {
            fail_scale: true,
            ..Default::default()
        });
        let coordinator =
            coordinator(&store, &provider, ScriptedDirectory::always(Some("np-1")));

        let outcome = coordinator.handle_batch(store.drain_idle()).await;
        match outcome {
            BatchOutcome::Dropped { reason } => assert!(reason.contains("QuotaExceeded")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_readiness_wait() {
        let store = Arc::new(PendingStore::new());
        track(&store, "default/a", 1000, GI);
        let provider = Arc::new(FakeProvider {
            pools: Mutex::new(VecDeque::from(vec![NodePoolState::Scaling; 100])),
            ..Default::default()
        });
        let shutdown = CancellationToken::new();
        let coordinator = ScaleCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&provider) as Arc<dyn NodePoolProvider>,
            Arc::new(ScriptedDirectory::always(Some("np-1"))),
            "c-123",
            28 * GI,
            shutdown.clone(),
        );

        let canceller = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                sleep(Duration::from_secs(25)).await;
                shutdown.cancel();
            })
        };
        let outcome = coordinator.handle_batch(store.drain_idle()).await;
        canceller.await.unwrap();

        match outcome {
            BatchOutcome::Dropped { reason } => assert!(reason.contains("cancelled")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(provider.scaled.lock().unwrap().is_empty());
    }
}
