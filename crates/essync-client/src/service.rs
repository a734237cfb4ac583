//! The remote index service contract.
//!
//! [`IndexService`] is everything the transfer engine asks of a cluster:
//! existence checks, mapping retrieval, index creation, counting, paginated
//! search with cursor release, and bulk create-if-absent writes.

use async_trait::async_trait;
use essync_types::{CursorToken, DocumentRecord};

use crate::error::Result;

/// One page of a paginated search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub records: Vec<DocumentRecord>,
    /// Continuation token for the next page. `None` once the service has
    /// nothing more to return.
    pub next_token: Option<CursorToken>,
}

/// A record the service refused to store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    pub id: String,
    pub status: u16,
    pub reason: String,
}

impl RejectedRecord {
    /// Rejected because the cluster was saturated; resubmitting may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.status == 429
    }
}

/// Per-record outcome of a bulk create-if-absent request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    /// Records newly created at the destination.
    pub created: usize,
    /// Records skipped because a document with the same id already exists.
    pub already_present: usize,
    pub rejected: Vec<RejectedRecord>,
}

impl BulkOutcome {
    /// Records that are present at the destination after the request.
    #[must_use]
    pub fn written(&self) -> usize {
        self.created + self.already_present
    }
}

/// Operations the transfer engine performs against a cluster.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn IndexService>`
/// from many reader and writer tasks at once.
#[async_trait]
pub trait IndexService: Send + Sync {
    /// Short label for log lines (`source`, `destination`, ...).
    fn name(&self) -> &str;

    async fn exists(&self, index: &str) -> Result<bool>;

    /// The index mapping, exactly as the service reports it.
    async fn get_mapping(&self, index: &str) -> Result<serde_json::Value>;

    async fn create_index(&self, index: &str, mapping: &serde_json::Value) -> Result<()>;

    async fn count(&self, index: &str) -> Result<u64>;

    /// Fetch one page. `cursor == None` opens a new cursor over `index`;
    /// otherwise the page following `cursor` is returned.
    async fn search(
        &self,
        index: &str,
        page_size: usize,
        cursor: Option<&CursorToken>,
    ) -> Result<SearchPage>;

    /// Release server-side cursor state. Idempotent.
    async fn close_cursors(&self, tokens: &[CursorToken]) -> Result<()>;

    /// Create every record whose id does not exist yet in `index`.
    /// Existing documents are never overwritten.
    async fn bulk_create(&self, index: &str, records: &[DocumentRecord]) -> Result<BulkOutcome>;
}
