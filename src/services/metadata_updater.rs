use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::model::MetadataEntry;
use crate::services::metadata::MetadataStore;

pub type MetadataBatch = Vec<MetadataEntry>;

#[derive(Debug, Default)]
pub struct UpdaterStats {
    pub batches_applied: AtomicU64,
    pub batches_failed: AtomicU64,
    pub rows_written: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct UpdaterStatsSnapshot {
    pub batches_applied: u64,
    pub batches_failed: u64,
    pub rows_written: u64,
}

impl UpdaterStats {
    pub fn snapshot(&self) -> UpdaterStatsSnapshot {
        UpdaterStatsSnapshot {
            batches_applied: self.batches_applied.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
        }
    }
}

/// Producer side of the metadata queue, cloned into every ingestion listener.
///
/// The channel is bounded: when the consumer is saturated (all transaction
/// slots busy and the channel full) `enqueue` waits, which holds back the
/// ingestion response. Size `queue_capacity` with that in mind.
#[derive(Clone)]
pub struct MetadataQueue {
    tx: mpsc::Sender<MetadataBatch>,
    stats: Arc<UpdaterStats>,
}

impl MetadataQueue {
    pub async fn enqueue(&self, batch: MetadataBatch) {
        if batch.is_empty() {
            return;
        }
        let rows = batch.len();
        if self.tx.send(batch).await.is_err() {
            tracing::error!(rows, "metadata updater is gone; dropping metadata batch");
        }
    }

    pub fn stats(&self) -> Arc<UpdaterStats> {
        self.stats.clone()
    }
}

pub struct MetadataUpdater {
    store: Arc<dyn MetadataStore>,
    rx: mpsc::Receiver<MetadataBatch>,
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    stats: Arc<UpdaterStats>,
}

impl MetadataUpdater {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        queue_capacity: usize,
        max_concurrency: usize,
    ) -> (MetadataQueue, Self) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let max_concurrency = max_concurrency.max(1);
        let stats = Arc::new(UpdaterStats::default());
        let queue = MetadataQueue {
            tx,
            stats: stats.clone(),
        };
        let updater = Self {
            store,
            rx,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            stats,
        };
        (queue, updater)
    }

    /// Drains the queue until every `MetadataQueue` clone is dropped, then waits
    /// for in-flight transactions before returning.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        while let Some(batch) = self.rx.recv().await {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let store = self.store.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                let _permit = permit;
                apply_batch(store, stats, batch).await;
            });
        }

        match u32::try_from(self.max_concurrency) {
            Ok(all) => {
                let _ = self.semaphore.acquire_many(all).await;
            }
            Err(_) => tracing::warn!("metadata updater concurrency too large to drain"),
        }
        tracing::info!("metadata updater stopped");
    }
}

async fn apply_batch(store: Arc<dyn MetadataStore>, stats: Arc<UpdaterStats>, batch: MetadataBatch) {
    let rows = batch.len();
    let result = tokio::task::spawn_blocking(move || store.upsert(&batch)).await;
    match result {
        Ok(Ok(())) => {
            stats.batches_applied.fetch_add(1, Ordering::Relaxed);
            stats.rows_written.fetch_add(rows as u64, Ordering::Relaxed);
            tracing::debug!(rows, "metadata batch committed");
        }
        Ok(Err(err)) => {
            stats.batches_failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %err, rows, "metadata batch rolled back");
        }
        Err(err) => {
            stats.batches_failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %err, rows, "metadata batch task failed");
        }
    }
}
