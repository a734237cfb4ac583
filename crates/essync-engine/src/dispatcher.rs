//! Dispatcher: drains the transfer queue into the writer pool and decides
//! when the transfer is over.

use std::time::Duration;

use serde::Serialize;

use crate::config::types::CompletionMode;
use crate::pool::{Submission, WriterPool};
use crate::queue::TransferQueue;
use crate::reader::ReaderTracker;

/// What the dispatcher did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    /// Batches handed to the writer pool, including caller-run ones.
    pub batches_dispatched: u64,
    /// Batches the dispatcher wrote itself because the pool was saturated.
    pub batches_caller_ran: u64,
    /// Polls that timed out while readers were still active.
    pub idle_polls: u64,
}

impl DispatchSummary {
    fn record(&mut self, submission: Submission) {
        self.batches_dispatched += 1;
        if submission == Submission::CallerRan {
            self.batches_caller_ran += 1;
        }
    }
}

/// Poll the queue and submit every batch until the transfer is complete.
///
/// With [`CompletionMode::IdleTimeout`] the first poll that waits
/// `idle_timeout` without a batch ends the loop. With
/// [`CompletionMode::ReadersDone`] the loop ends once every reader has
/// finished and the queue is empty; idle polls are only logged.
pub async fn run_dispatcher(
    queue: &TransferQueue,
    pool: &WriterPool,
    tracker: &ReaderTracker,
    mode: CompletionMode,
    idle_timeout: Duration,
) -> DispatchSummary {
    let mut summary = DispatchSummary::default();
    loop {
        if mode == CompletionMode::ReadersDone && tracker.is_done() && queue.is_empty() {
            tracing::debug!("All readers finished and queue drained");
            break;
        }

        let polled = tokio::select! {
            biased;
            polled = queue.poll(idle_timeout) => polled,
            () = tracker.wait_done(), if mode == CompletionMode::ReadersDone && !tracker.is_done() => {
                continue;
            }
        };

        match polled {
            Ok(Some(batch)) => {
                let submission = pool.submit(batch).await;
                summary.record(submission);
            }
            Ok(None) if mode == CompletionMode::IdleTimeout => {
                tracing::info!(
                    idle_timeout_secs = idle_timeout.as_secs(),
                    "No batch arrived within idle timeout; dispatcher stopping"
                );
                break;
            }
            Ok(None) => {
                summary.idle_polls += 1;
                tracing::warn!(
                    idle_timeout_secs = idle_timeout.as_secs(),
                    active_readers = tracker.active(),
                    "No batch arrived within idle timeout; readers still running"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dispatcher stopping");
                break;
            }
        }
    }

    tracing::info!(
        batches_dispatched = summary.batches_dispatched,
        batches_caller_ran = summary.batches_caller_ran,
        "Dispatcher finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::stats::StatsRegistry;
    use crate::writer::{BatchWriter, WritePolicy};
    use essync_client::MemoryIndexService;
    use essync_types::{DocumentRecord, TransferBatch};

    fn pool_for(dest: &Arc<MemoryIndexService>) -> (WriterPool, Arc<StatsRegistry>) {
        let stats = Arc::new(StatsRegistry::new(["orders"]));
        let writer = Arc::new(BatchWriter::new(
            dest.clone(),
            stats.clone(),
            WritePolicy {
                max_retries: 0,
                backoff: Duration::ZERO,
            },
        ));
        (WriterPool::start(2, 10, writer), stats)
    }

    fn batch(i: usize) -> TransferBatch {
        TransferBatch::new(
            "orders",
            "orders",
            None,
            vec![DocumentRecord::new(format!("{i}"), "{}")],
        )
    }

    #[tokio::test]
    async fn test_readers_done_waits_for_slow_reader() {
        let dest = Arc::new(MemoryIndexService::new("dest"));
        let (pool, stats) = pool_for(&dest);
        let queue = Arc::new(TransferQueue::new(4));
        let tracker = ReaderTracker::new();
        let guard = tracker.register();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue.put(batch(0)).await.unwrap();
                // Longer than the idle timeout below.
                tokio::time::sleep(Duration::from_millis(80)).await;
                queue.put(batch(1)).await.unwrap();
                drop(guard);
            })
        };

        let summary = run_dispatcher(
            &queue,
            &pool,
            &tracker,
            CompletionMode::ReadersDone,
            Duration::from_millis(20),
        )
        .await;
        producer.await.unwrap();
        assert!(pool.shutdown(Duration::from_secs(5)).await);

        assert_eq!(summary.batches_dispatched, 2);
        assert!(summary.idle_polls >= 1);
        assert_eq!(stats.get("orders").unwrap().written, 2);
    }

    #[tokio::test]
    async fn test_idle_timeout_stops_at_first_empty_poll() {
        let dest = Arc::new(MemoryIndexService::new("dest"));
        let (pool, _) = pool_for(&dest);
        let queue = TransferQueue::new(4);
        let tracker = ReaderTracker::new();
        let _guard = tracker.register();
        queue.put(batch(0)).await.unwrap();

        let summary = run_dispatcher(
            &queue,
            &pool,
            &tracker,
            CompletionMode::IdleTimeout,
            Duration::from_millis(20),
        )
        .await;
        assert_eq!(summary.batches_dispatched, 1);
        assert_eq!(summary.idle_polls, 0);
        assert!(pool.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_no_readers_and_empty_queue_returns_immediately() {
        let dest = Arc::new(MemoryIndexService::new("dest"));
        let (pool, _) = pool_for(&dest);
        let queue = TransferQueue::new(4);
        let summary = run_dispatcher(
            &queue,
            &pool,
            &ReaderTracker::new(),
            CompletionMode::ReadersDone,
            Duration::from_secs(60),
        )
        .await;
        assert_eq!(summary, DispatchSummary::default());
        assert!(pool.shutdown(Duration::from_secs(5)).await);
    }
}
