//! Transfer run result types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::dispatcher::DispatchSummary;
use crate::provision::IndexInspection;
use crate::stats::CounterSnapshot;

/// Per-index counters at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub key: String,
    pub source_index: String,
    pub target_index: String,
    pub source_count: u64,
    #[serde(flatten)]
    pub counters: CounterSnapshot,
    /// The reader reached the end of its cursor.
    pub read_complete: bool,
}

impl IndexReport {
    /// Documents counted at the source that were never read.
    #[must_use]
    pub fn unread(&self) -> u64 {
        self.source_count.saturating_sub(self.counters.read)
    }

    /// Read count differs from the count taken during provisioning.
    #[must_use]
    pub fn has_read_mismatch(&self) -> bool {
        self.counters.read != self.source_count
    }
}

/// Result of a transfer run.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub pipeline: String,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub schema_only: bool,
    pub pool_size: usize,
    pub dispatch: DispatchSummary,
    /// Writers finished within the drain timeout.
    pub pool_drained: bool,
    /// Batches left in the transfer queue at shutdown.
    pub batches_discarded: usize,
    pub indices: Vec<IndexReport>,
}

impl TransferReport {
    #[must_use]
    pub fn totals(&self) -> CounterSnapshot {
        self.indices
            .iter()
            .fold(CounterSnapshot::default(), |acc, index| acc + index.counters)
    }

    /// Every index was read to the end and nothing was dropped.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pool_drained
            && self.batches_discarded == 0
            && self
                .indices
                .iter()
                .all(|i| i.read_complete && i.counters.dropped == 0)
    }
}

/// Result of a pipeline check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub pipeline: String,
    pub source_url: String,
    pub destination_url: String,
    pub indices: Vec<IndexInspection>,
}

impl CheckReport {
    #[must_use]
    pub fn all_ready(&self) -> bool {
        self.indices.iter().all(IndexInspection::is_ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(read: u64, source_count: u64, dropped: u64) -> IndexReport {
        IndexReport {
            key: "orders".into(),
            source_index: "orders".into(),
            target_index: "orders".into(),
            source_count,
            counters: CounterSnapshot {
                read,
                written: read - dropped,
                dropped,
                batches_read: 1,
                batches_written: 1,
            },
            read_complete: true,
        }
    }

    fn report(indices: Vec<IndexReport>) -> TransferReport {
        TransferReport {
            pipeline: "p".into(),
            started_at: Utc::now(),
            duration_secs: 1.5,
            schema_only: false,
            pool_size: 20,
            dispatch: DispatchSummary::default(),
            pool_drained: true,
            batches_discarded: 0,
            indices,
        }
    }

    #[test]
    fn test_read_mismatch() {
        assert!(!index(10, 10, 0).has_read_mismatch());
        let short = index(7, 10, 0);
        assert!(short.has_read_mismatch());
        assert_eq!(short.unread(), 3);
    }

    #[test]
    fn test_totals_and_completeness() {
        let r = report(vec![index(10, 10, 0), index(5, 5, 1)]);
        assert_eq!(r.totals().read, 15);
        assert_eq!(r.totals().written, 14);
        assert!(!r.is_complete());
        assert!(report(vec![index(3, 3, 0)]).is_complete());
    }

    #[test]
    fn test_report_serializes_flat_counters() {
        let json = serde_json::to_value(report(vec![index(2, 2, 0)])).unwrap();
        assert_eq!(json["indices"][0]["read"], 2);
        assert_eq!(json["indices"][0]["key"], "orders");
        assert_eq!(json["pool_size"], 20);
        assert!(json["started_at"].is_string());
    }
}
