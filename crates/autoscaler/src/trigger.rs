//! Batch dispatch on a count threshold or a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::store::{Batch, PendingStore};

/// How often the idle count is sampled against the threshold.
pub const DEFAULT_SAMPLE_PERIOD: Duration = Duration::from_millis(100);

/// Drains idle items from the store into the batch channel.
pub struct BatchTrigger {
    store: Arc<PendingStore>,
    batches: mpsc::Sender<Batch>,
    threshold: usize,
    interval: Duration,
    sample_period: Duration,
}

enum Dispatch {
    Sent,
    Empty,
    Closed,
}

impl BatchTrigger {
    /// Create a trigger that fires when `threshold` items are idle or every
    /// `interval`, whichever comes first.
    #[must_use]
    pub fn new(
        store: Arc<PendingStore>,
        batches: mpsc::Sender<Batch>,
        threshold: usize,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            batches,
            threshold: threshold.max(1),
            interval,
            sample_period: DEFAULT_SAMPLE_PERIOD,
        }
    }

    #[must_use]
    pub fn with_sample_period(mut self, period: Duration) -> Self {
        self.sample_period = period;
        self
    }

    async fn dispatch(&self, cause: &'static str, shutdown: &CancellationToken) -> Dispatch {
        let batch = self.store.drain_idle();
        if batch.is_empty() {
            return Dispatch::Empty;
        }

        let size = batch.len();
        tokio::select! {
            () = shutdown.cancelled() => Dispatch::Closed,
            sent = self.batches.send(batch) => match sent {
                Ok(()) => {
                    info!(cause, size, "Dispatched batch");
                    Dispatch::Sent
                }
                Err(_) => {
                    warn!(size, "Batch receiver closed");
                    Dispatch::Closed
                }
            },
        }
    }

    /// Run until `shutdown` fires or the receiver goes away.
    #[instrument(
        skip_all,
        fields(threshold = self.threshold, interval_secs = self.interval.as_secs())
    )]
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting batch trigger");

        let mut sample = interval(self.sample_period);
        sample.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick = interval_at(Instant::now() + self.interval, self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let outcome = tokio::select! {
                () = shutdown.cancelled() => break,
                _ = tick.tick() => self.dispatch("interval", &shutdown).await,
                _ = sample.tick() => {
                    if self.store.count_idle() >= self.threshold {
                        self.dispatch("threshold", &shutdown).await
                    } else {
                        Dispatch::Empty
                    }
                }
            };

            match outcome {
                Dispatch::Closed => break,
                Dispatch::Empty | Dispatch::Sent => {}
            }
        }

        debug!(idle = self.store.count_idle(), "Batch trigger stopped");
    }
}
