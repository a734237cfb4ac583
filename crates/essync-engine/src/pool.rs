//! Fixed-size writer pool with a bounded submission queue.
//!
//! When the submission queue is full the submitting task runs the write
//! itself, which throttles the dispatcher to the pool's pace.

use std::sync::Arc;
use std::time::Duration;

use async_channel::{Sender, TrySendError};
use essync_types::TransferBatch;
use tokio::task::JoinSet;

use crate::writer::BatchWriter;

/// Number of concurrent writers for `task_count` index tasks.
///
/// A single index gets a wide pool of its own; several indices get two
/// writers each plus one.
#[must_use]
pub fn pool_size(task_count: usize) -> usize {
    if task_count == 1 {
        20
    } else {
        task_count.saturating_mul(2).saturating_add(1)
    }
}

/// Where a submitted batch ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// The queue was full (or closed) and the caller wrote the batch inline.
    CallerRan,
}

pub struct WriterPool {
    sender: Sender<TransferBatch>,
    workers: JoinSet<()>,
    writer: Arc<BatchWriter>,
    size: usize,
}

impl WriterPool {
    /// Spawn `size` workers (at least one) sharing one submission queue.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(size: usize, queue_capacity: usize, writer: Arc<BatchWriter>) -> Self {
        let size = size.max(1);
        let (sender, receiver) = async_channel::bounded::<TransferBatch>(queue_capacity.max(1));
        let mut workers = JoinSet::new();
        for worker_id in 0..size {
            let receiver = receiver.clone();
            let writer = writer.clone();
            workers.spawn(async move {
                while let Ok(batch) = receiver.recv().await {
                    writer.write(batch).await;
                }
                tracing::trace!(worker_id, "Writer worker exiting");
            });
        }
        tracing::debug!(workers = size, queue_capacity, "Writer pool started");
        Self {
            sender,
            workers,
            writer,
            size,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Batches waiting for a free worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.sender.len()
    }

    /// Hand `batch` to a worker, or write it on the calling task when the
    /// submission queue is full.
    pub async fn submit(&self, batch: TransferBatch) -> Submission {
        match self.sender.try_send(batch) {
            Ok(()) => Submission::Queued,
            Err(TrySendError::Full(batch)) => {
                self.writer.write(batch).await;
                Submission::CallerRan
            }
            Err(TrySendError::Closed(batch)) => {
                tracing::warn!("Writer pool already shut down; writing batch inline");
                self.writer.write(batch).await;
                Submission::CallerRan
            }
        }
    }

    /// Stop accepting batches and wait up to `timeout` for queued and
    /// in-flight writes. Returns `false` if the wait timed out, in which
    /// case the remaining writers are aborted.
    pub async fn shutdown(mut self, timeout: Duration) -> bool {
        self.sender.close();
        let workers = &mut self.workers;
        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        tracing::error!(error = %e, "Writer worker panicked");
                    }
                }
            }
        })
        .await
        .is_ok();

        if !drained {
            tracing::error!(
                timeout_secs = timeout.as_secs(),
                queued = self.sender.len(),
                "Writer pool did not drain in time; aborting remaining writes"
            );
            self.workers.abort_all();
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatsRegistry;
    use crate::writer::WritePolicy;
    use essync_client::MemoryIndexService;
    use essync_types::DocumentRecord;
    use rstest::rstest;

    #[rstest]
    #[case(0, 1)]
    #[case(1, 20)]
    #[case(2, 5)]
    #[case(3, 7)]
    #[case(10, 21)]
    fn test_pool_size(#[case] tasks: usize, #[case] expected: usize) {
        assert_eq!(pool_size(tasks), expected);
    }

    fn make_writer(dest: &Arc<MemoryIndexService>) -> (Arc<BatchWriter>, Arc<StatsRegistry>) {
        let stats = Arc::new(StatsRegistry::new(["orders"]));
        let writer = Arc::new(BatchWriter::new(
            dest.clone(),
            stats.clone(),
            WritePolicy {
                max_retries: 0,
                backoff: Duration::ZERO,
            },
        ));
        (writer, stats)
    }

    fn batch(i: usize) -> TransferBatch {
        TransferBatch::new(
            "orders",
            "orders",
            None,
            vec![DocumentRecord::new(i.to_string(), "{}")],
        )
    }

    #[tokio::test]
    async fn test_full_queue_runs_on_caller() {
        let dest = Arc::new(MemoryIndexService::new("dest"));
        dest.set_bulk_latency(Duration::from_millis(50));
        let (writer, stats) = make_writer(&dest);
        let pool = WriterPool::start(1, 1, writer);

        let mut outcomes = Vec::new();
        for i in 0..4 {
            outcomes.push(pool.submit(batch(i)).await);
        }
        assert!(outcomes.contains(&Submission::CallerRan), "got: {outcomes:?}");

        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert_eq!(stats.get("orders").unwrap().written, 4);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_batches() {
        let dest = Arc::new(MemoryIndexService::new("dest"));
        let (writer, stats) = make_writer(&dest);
        let pool = WriterPool::start(3, 100, writer);
        for i in 0..30 {
            pool.submit(batch(i)).await;
        }
        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert_eq!(stats.get("orders").unwrap().written, 30);
        assert_eq!(dest.documents("orders").len(), 30);
    }

    #[tokio::test]
    async fn test_shutdown_times_out_and_aborts() {
        let dest = Arc::new(MemoryIndexService::new("dest"));
        dest.set_bulk_latency(Duration::from_secs(30));
        let (writer, _) = make_writer(&dest);
        let pool = WriterPool::start(1, 10, writer);
        pool.submit(batch(0)).await;
        pool.submit(batch(1)).await;

        assert!(!pool.shutdown(Duration::from_millis(50)).await);
    }
}
