//! Reader tasks: one per index, pulling pages through a scroll cursor into
//! the transfer queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use essync_client::IndexService;
use essync_types::{IndexTask, TransferBatch};
use tokio::sync::Notify;

use crate::cursor::ScrollCursor;
use crate::queue::TransferQueue;
use crate::stats::StatsRegistry;

// ---------------------------------------------------------------------------
// Completion tracking
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct TrackerInner {
    active: AtomicUsize,
    notify: Notify,
}

/// Counts readers still running so the dispatcher can tell when no more
/// batches will be produced.
#[derive(Debug, Clone, Default)]
pub struct ReaderTracker {
    inner: Arc<TrackerInner>,
}

/// Held by a running reader; completion is signalled when it drops,
/// including during unwinding.
#[derive(Debug)]
pub struct ReaderGuard {
    inner: Arc<TrackerInner>,
}

impl ReaderTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reader. Call before the dispatcher starts waiting.
    #[must_use]
    pub fn register(&self) -> ReaderGuard {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        ReaderGuard {
            inner: self.inner.clone(),
        }
    }

    #[must_use]
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.active() == 0
    }

    /// Resolve once every registered reader has finished.
    pub async fn wait_done(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_done() {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Paging and retry settings for a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPolicy {
    pub page_size: usize,
    /// Consecutive failed page requests after which the reader gives up.
    pub max_failures: u32,
    pub backoff: Duration,
}

/// Why a reader stopped before its cursor was exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonReason {
    TooManyFailures { failures: u32, last_error: String },
    Fatal(String),
    QueueClosed,
}

impl std::fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooManyFailures {
                failures,
                last_error,
            } => write!(f, "{failures} consecutive read failures, last: {last_error}"),
            Self::Fatal(e) => write!(f, "non-retryable read error: {e}"),
            Self::QueueClosed => f.write_str("transfer queue closed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEnd {
    Exhausted,
    Abandoned(AbandonReason),
}

/// What one reader accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderOutcome {
    pub key: String,
    pub batches: u64,
    pub documents: u64,
    pub end: ReadEnd,
}

impl ReaderOutcome {
    #[must_use]
    pub fn completed(&self) -> bool {
        self.end == ReadEnd::Exhausted
    }
}

/// Read `task`'s source index to the end, enqueueing every non-empty page.
///
/// The cursor is released on every exit path; `guard` is dropped when the
/// reader finishes.
pub async fn run_reader(
    task: IndexTask,
    source: Arc<dyn IndexService>,
    queue: Arc<TransferQueue>,
    stats: Arc<StatsRegistry>,
    policy: ReadPolicy,
    guard: ReaderGuard,
) -> ReaderOutcome {
    let key = task.key();
    let mut cursor = ScrollCursor::new(source, task.source_index.clone(), policy.page_size);
    let mut outcome = ReaderOutcome {
        key: key.clone(),
        batches: 0,
        documents: 0,
        end: ReadEnd::Exhausted,
    };

    let end = read_until_end(&task, &mut cursor, &queue, &stats, policy, &mut outcome).await;
    outcome.end = end;
    cursor.release().await;

    match &outcome.end {
        ReadEnd::Exhausted => tracing::info!(
            index = %key,
            batches = outcome.batches,
            documents = outcome.documents,
            "Reader finished"
        ),
        ReadEnd::Abandoned(reason) => tracing::error!(
            index = %key,
            batches = outcome.batches,
            documents = outcome.documents,
            reason = %reason,
            "Reader abandoned index; transfer is partial"
        ),
    }
    drop(guard);
    outcome
}

async fn read_until_end(
    task: &IndexTask,
    cursor: &mut ScrollCursor,
    queue: &TransferQueue,
    stats: &StatsRegistry,
    policy: ReadPolicy,
    outcome: &mut ReaderOutcome,
) -> ReadEnd {
    let mut failures = 0u32;
    loop {
        match cursor.next_page().await {
            Ok(records) => {
                failures = 0;
                if !records.is_empty() {
                    let n = records.len() as u64;
                    let batch = TransferBatch::new(
                        task.source_index.clone(),
                        task.target_index.clone(),
                        cursor.current_token().cloned(),
                        records,
                    );
                    if queue.put(batch).await.is_err() {
                        return ReadEnd::Abandoned(AbandonReason::QueueClosed);
                    }
                    stats.add_read(&outcome.key, n);
                    outcome.batches += 1;
                    outcome.documents += n;
                    tracing::debug!(index = %outcome.key, batch_size = n, "Enqueued batch");
                }
                if cursor.is_exhausted() {
                    return ReadEnd::Exhausted;
                }
            }
            Err(e) if !e.is_transient() => {
                return ReadEnd::Abandoned(AbandonReason::Fatal(e.to_string()));
            }
            Err(e) => {
                failures += 1;
                if failures >= policy.max_failures {
                    return ReadEnd::Abandoned(AbandonReason::TooManyFailures {
                        failures,
                        last_error: e.to_string(),
                    });
                }
                tracing::warn!(
                    index = %outcome.key,
                    attempt = failures,
                    max_failures = policy.max_failures,
                    error = %e,
                    "Page read failed, retrying"
                );
                tokio::time::sleep(policy.backoff).await;
            }
        }
    }
}
