//! Batch writer: one bulk create-if-absent request per dequeued batch, with
//! fixed-backoff retries.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use essync_client::{IndexService, RejectedRecord};
use essync_types::{IndexTask, TransferBatch};

use crate::stats::StatsRegistry;

/// Retry settings for bulk writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePolicy {
    /// Retries after the first attempt; the batch gets `max_retries + 1` attempts.
    pub max_retries: u32,
    pub backoff: Duration,
}

impl WritePolicy {
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// What happened to one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub written: u64,
    pub dropped: u64,
    pub attempts: u32,
}

/// Writes batches to the destination and records the outcome.
pub struct BatchWriter {
    destination: Arc<dyn IndexService>,
    stats: Arc<StatsRegistry>,
    policy: WritePolicy,
}

impl BatchWriter {
    #[must_use]
    pub fn new(
        destination: Arc<dyn IndexService>,
        stats: Arc<StatsRegistry>,
        policy: WritePolicy,
    ) -> Self {
        Self {
            destination,
            stats,
            policy,
        }
    }

    /// Write `batch`. Never fails: anything that cannot be written is
    /// logged and counted as dropped.
    pub async fn write(&self, batch: TransferBatch) -> WriteOutcome {
        let key = IndexTask::paired(batch.source_index.as_str(), batch.target_index.as_str()).key();
        let target = batch.target_index.clone();
        let (mut pending, oversized) = batch.partition_by_id_limit();
        let mut outcome = WriteOutcome::default();

        if !oversized.is_empty() {
            for doc in &oversized {
                tracing::warn!(
                    index = %key,
                    id_bytes = doc.id_len(),
                    "Dropping document whose id exceeds the size limit"
                );
            }
            self.drop_documents(&key, &mut outcome, oversized.len());
        }

        let max_attempts = self.policy.max_attempts();
        let mut succeeded = false;
        while !pending.is_empty() {
            if outcome.attempts == max_attempts {
                tracing::error!(
                    index = %key,
                    documents = pending.len(),
                    attempts = outcome.attempts,
                    "Bulk write retries exhausted; batch dropped"
                );
                self.drop_documents(&key, &mut outcome, pending.len());
                break;
            }
            if outcome.attempts > 0 {
                tokio::time::sleep(self.policy.backoff).await;
            }
            outcome.attempts += 1;

            match self.destination.bulk_create(&target, &pending).await {
                Ok(result) => {
                    succeeded = true;
                    outcome.written += result.written() as u64;
                    let (throttled, refused): (Vec<RejectedRecord>, Vec<RejectedRecord>) =
                        result.rejected.into_iter().partition(RejectedRecord::is_retryable);

                    for record in &refused {
                        tracing::warn!(
                            index = %key,
                            id = %record.id,
                            status = record.status,
                            reason = %record.reason,
                            "Destination rejected document"
                        );
                    }
                    self.drop_documents(&key, &mut outcome, refused.len());

                    if throttled.is_empty() {
                        pending.clear();
                    } else {
                        let retry: HashSet<&str> = throttled.iter().map(|r| r.id.as_str()).collect();
                        pending.retain(|doc| retry.contains(doc.id.as_str()));
                        // Throttled items whose id matches nothing pending cannot be resent.
                        let unmatched = throttled.len().saturating_sub(pending.len());
                        if unmatched > 0 {
                            tracing::warn!(
                                index = %key,
                                documents = unmatched,
                                "Throttled documents could not be matched to the batch; dropped"
                            );
                            self.drop_documents(&key, &mut outcome, unmatched);
                        }
                        tracing::warn!(
                            index = %key,
                            documents = pending.len(),
                            attempt = outcome.attempts,
                            max_attempts,
                            "Destination throttled documents, retrying"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        index = %key,
                        documents = pending.len(),
                        attempt = outcome.attempts,
                        max_attempts,
                        error = %e,
                        "Bulk write failed"
                    );
                }
            }
        }

        if succeeded {
            self.stats.add_write(&key, outcome.written);
        }
        tracing::debug!(
            index = %key,
            written = outcome.written,
            dropped = outcome.dropped,
            attempts = outcome.attempts,
            "Batch written"
        );
        outcome
    }

    fn drop_documents(&self, key: &str, outcome: &mut WriteOutcome, n: usize) {
        if n > 0 {
            outcome.dropped += n as u64;
            self.stats.add_dropped(key, n as u64);
        }
    }
}
