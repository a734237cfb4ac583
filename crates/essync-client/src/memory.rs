//! In-process [`IndexService`] used by tests and local dry runs.
//!
//! Behaves like a single-node cluster: create-if-absent bulk writes,
//! snapshot scrolls with a fresh token per page, and explicit fault
//! injection for the retry paths.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use essync_types::{CursorToken, DocumentRecord};
use serde_json::Value;

use crate::error::{Result, ServiceError};
use crate::service::{BulkOutcome, IndexService, RejectedRecord, SearchPage};

#[derive(Debug, Default)]
struct StoredIndex {
    mapping: Value,
    docs: BTreeMap<String, String>,
}

#[derive(Debug)]
struct OpenScroll {
    records: Arc<Vec<DocumentRecord>>,
    offset: usize,
}

#[derive(Debug, Default)]
struct Faults {
    failing_searches: usize,
    /// Searches served normally before `failing_searches` starts counting.
    searches_before_failure: usize,
    failing_bulks: usize,
    always_fail_bulks: bool,
    /// Per-id rejections, consumed one per bulk request containing the id.
    rejections: HashMap<String, VecDeque<u16>>,
    /// Report rejections without `_id`, as some proxies do.
    omit_rejected_ids: bool,
    bulk_latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct Inner {
    indices: BTreeMap<String, StoredIndex>,
    scrolls: HashMap<String, OpenScroll>,
    next_scroll: u64,
    closed: BTreeSet<String>,
    calls: Vec<String>,
    faults: Faults,
}

/// Thread-safe in-memory cluster.
#[derive(Debug)]
pub struct MemoryIndexService {
    name: String,
    inner: Mutex<Inner>,
}

impl MemoryIndexService {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Builder form of [`insert_index`](Self::insert_index).
    #[must_use]
    pub fn with_index(self, index: &str, mapping: Value, docs: Vec<DocumentRecord>) -> Self {
        self.insert_index(index, mapping, docs);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- data -------------------------------------------------------------

    pub fn insert_index(&self, index: &str, mapping: Value, docs: Vec<DocumentRecord>) {
        let mut inner = self.lock();
        let stored = inner.indices.entry(index.to_string()).or_default();
        stored.mapping = mapping;
        stored
            .docs
            .extend(docs.into_iter().map(|d| (d.id, d.payload)));
    }

    pub fn insert_documents(&self, index: &str, docs: Vec<DocumentRecord>) {
        let mut inner = self.lock();
        let stored = inner.indices.entry(index.to_string()).or_default();
        stored
            .docs
            .extend(docs.into_iter().map(|d| (d.id, d.payload)));
    }

    /// Documents of `index`, ordered by id. Empty if the index is missing.
    #[must_use]
    pub fn documents(&self, index: &str) -> Vec<DocumentRecord> {
        self.lock()
            .indices
            .get(index)
            .map(|stored| {
                stored
                    .docs
                    .iter()
                    .map(|(id, payload)| DocumentRecord::new(id.clone(), payload.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn mapping(&self, index: &str) -> Option<Value> {
        self.lock().indices.get(index).map(|s| s.mapping.clone())
    }

    #[must_use]
    pub fn has_index(&self, index: &str) -> bool {
        self.lock().indices.contains_key(index)
    }

    // -- fault injection --------------------------------------------------

    /// Fail the next `n` search requests with a transient `503`.
    pub fn fail_next_searches(&self, n: usize) {
        self.fail_searches_after(0, n);
    }

    /// Serve `successes` search requests, then fail the following `n` with
    /// a transient `503`.
    pub fn fail_searches_after(&self, successes: usize, n: usize) {
        let mut inner = self.lock();
        inner.faults.searches_before_failure = successes;
        inner.faults.failing_searches = n;
    }

    /// Fail the next `n` bulk requests with a transient `503`.
    pub fn fail_next_bulks(&self, n: usize) {
        self.lock().faults.failing_bulks = n;
    }

    /// Fail every bulk request from now on.
    pub fn fail_all_bulks(&self) {
        self.lock().faults.always_fail_bulks = true;
    }

    /// Reject `id` with `status` the next time it appears in a bulk request.
    /// Queue several calls to reject it repeatedly.
    pub fn reject_next(&self, id: &str, status: u16) {
        self.lock()
            .faults
            .rejections
            .entry(id.to_string())
            .or_default()
            .push_back(status);
    }

    /// Report every later rejection with an empty id.
    pub fn omit_rejected_ids(&self) {
        self.lock().faults.omit_rejected_ids = true;
    }

    /// Delay every bulk request by `latency`.
    pub fn set_bulk_latency(&self, latency: Duration) {
        self.lock().faults.bulk_latency = Some(latency);
    }

    // -- observation ------------------------------------------------------

    /// Every call made so far, as `"<operation> <index>"`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    #[must_use]
    pub fn call_count(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.split(' ').next() == Some(operation))
            .count()
    }

    /// Scroll contexts that were opened and not released yet.
    #[must_use]
    pub fn open_cursors(&self) -> usize {
        self.lock().scrolls.len()
    }

    #[must_use]
    pub fn closed_tokens(&self) -> Vec<String> {
        self.lock().closed.iter().cloned().collect()
    }

    fn record_call(inner: &mut Inner, operation: &str, target: &str) {
        inner.calls.push(format!("{operation} {target}"));
    }

    fn not_found(operation: &'static str, index: &str) -> ServiceError {
        ServiceError::Status {
            operation,
            status: 404,
            body: format!("no such index [{index}]"),
        }
    }

    /// Serve the page at the scroll's offset and rotate its token.
    fn next_page(inner: &mut Inner, mut scroll: OpenScroll, page_size: usize) -> SearchPage {
        let end = (scroll.offset + page_size).min(scroll.records.len());
        let records = scroll.records[scroll.offset..end].to_vec();
        scroll.offset = end;
        if records.is_empty() {
            return SearchPage {
                records,
                next_token: None,
            };
        }
        inner.next_scroll += 1;
        let token = format!("scroll-{}", inner.next_scroll);
        inner.scrolls.insert(token.clone(), scroll);
        SearchPage {
            records,
            next_token: Some(CursorToken::new(token)),
        }
    }
}

#[async_trait]
impl IndexService for MemoryIndexService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, index: &str) -> Result<bool> {
        let mut inner = self.lock();
        Self::record_call(&mut inner, "exists", index);
        Ok(inner.indices.contains_key(index))
    }

    async fn get_mapping(&self, index: &str) -> Result<Value> {
        let mut inner = self.lock();
        Self::record_call(&mut inner, "get_mapping", index);
        inner
            .indices
            .get(index)
            .map(|s| s.mapping.clone())
            .ok_or_else(|| Self::not_found("get_mapping", index))
    }

    async fn create_index(&self, index: &str, mapping: &Value) -> Result<()> {
        let mut inner = self.lock();
        Self::record_call(&mut inner, "create_index", index);
        if inner.indices.contains_key(index) {
            return Err(ServiceError::Status {
                operation: "create_index",
                status: 400,
                body: format!("resource_already_exists_exception: [{index}]"),
            });
        }
        inner.indices.insert(
            index.to_string(),
            StoredIndex {
                mapping: mapping.clone(),
                docs: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn count(&self, index: &str) -> Result<u64> {
        let mut inner = self.lock();
        Self::record_call(&mut inner, "count", index);
        inner
            .indices
            .get(index)
            .map(|s| s.docs.len() as u64)
            .ok_or_else(|| Self::not_found("count", index))
    }

    async fn search(
        &self,
        index: &str,
        page_size: usize,
        cursor: Option<&CursorToken>,
    ) -> Result<SearchPage> {
        let mut inner = self.lock();
        Self::record_call(&mut inner, "search", index);
        let faults = &mut inner.faults;
        if faults.failing_searches > 0 {
            if faults.searches_before_failure > 0 {
                faults.searches_before_failure -= 1;
            } else {
                faults.failing_searches -= 1;
                return Err(ServiceError::Status {
                    operation: "search",
                    status: 503,
                    body: "injected search failure".into(),
                });
            }
        }

        let scroll = match cursor {
            None => {
                let stored = inner
                    .indices
                    .get(index)
                    .ok_or_else(|| Self::not_found("search", index))?;
                let records = stored
                    .docs
                    .iter()
                    .map(|(id, payload)| DocumentRecord::new(id.clone(), payload.clone()))
                    .collect();
                OpenScroll {
                    records: Arc::new(records),
                    offset: 0,
                }
            }
            Some(token) => inner
                .scrolls
                .remove(token.as_str())
                .ok_or_else(|| ServiceError::Status {
                    operation: "search",
                    status: 404,
                    body: format!("search_context_missing_exception: {token}"),
                })?,
        };
        Ok(Self::next_page(&mut inner, scroll, page_size))
    }

    async fn close_cursors(&self, tokens: &[CursorToken]) -> Result<()> {
        let mut inner = self.lock();
        Self::record_call(&mut inner, "close_cursors", &tokens.len().to_string());
        for token in tokens {
            inner.scrolls.remove(token.as_str());
            inner.closed.insert(token.as_str().to_string());
        }
        Ok(())
    }

    async fn bulk_create(&self, index: &str, records: &[DocumentRecord]) -> Result<BulkOutcome> {
        let latency = {
            let mut inner = self.lock();
            Self::record_call(&mut inner, "bulk_create", index);
            inner.faults.bulk_latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.lock();
        if inner.faults.always_fail_bulks || inner.faults.failing_bulks > 0 {
            inner.faults.failing_bulks = inner.faults.failing_bulks.saturating_sub(1);
            return Err(ServiceError::Status {
                operation: "bulk_create",
                status: 503,
                body: "injected bulk failure".into(),
            });
        }

        let Inner {
            indices, faults, ..
        } = &mut *inner;
        let stored = indices.entry(index.to_string()).or_default();
        let mut outcome = BulkOutcome::default();
        for record in records {
            if let Some(status) = faults
                .rejections
                .get_mut(&record.id)
                .and_then(VecDeque::pop_front)
            {
                let id = if faults.omit_rejected_ids {
                    String::new()
                } else {
                    record.id.clone()
                };
                outcome.rejected.push(RejectedRecord {
                    id,
                    status,
                    reason: "injected rejection".into(),
                });
                continue;
            }
            if stored.docs.contains_key(&record.id) {
                outcome.already_present += 1;
            } else {
                stored
                    .docs
                    .insert(record.id.clone(), record.payload.clone());
                outcome.created += 1;
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs(n: usize) -> Vec<DocumentRecord> {
        (0..n)
            .map(|i| DocumentRecord::new(format!("{i:05}"), format!(r#"{{"n":{i}}}"#)))
            .collect()
    }

    #[tokio::test]
    async fn scroll_walks_all_pages_then_ends() {
        let svc = MemoryIndexService::new("source").with_index("orders", json!({}), docs(5));

        let first = svc.search("orders", 2, None).await.unwrap();
        assert_eq!(first.records.len(), 2);
        let t1 = first.next_token.unwrap();

        let second = svc.search("orders", 2, Some(&t1)).await.unwrap();
        assert_eq!(second.records.len(), 2);
        let t2 = second.next_token.unwrap();
        assert_ne!(t1, t2);

        let third = svc.search("orders", 2, Some(&t2)).await.unwrap();
        assert_eq!(third.records.len(), 1);
        let t3 = third.next_token.unwrap();

        let last = svc.search("orders", 2, Some(&t3)).await.unwrap();
        assert!(last.records.is_empty());
        assert!(last.next_token.is_none());
        assert_eq!(svc.open_cursors(), 0);
    }

    #[tokio::test]
    async fn retired_token_is_not_found() {
        let svc = MemoryIndexService::new("source").with_index("orders", json!({}), docs(5));
        let first = svc.search("orders", 2, None).await.unwrap();
        let token = first.next_token.unwrap();
        svc.search("orders", 2, Some(&token)).await.unwrap();

        let err = svc.search("orders", 2, Some(&token)).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn bulk_create_never_overwrites() {
        let svc = MemoryIndexService::new("dest");
        svc.insert_documents("orders", vec![DocumentRecord::new("1", r#"{"v":"old"}"#)]);

        let outcome = svc
            .bulk_create(
                "orders",
                &[
                    DocumentRecord::new("1", r#"{"v":"new"}"#),
                    DocumentRecord::new("2", r#"{"v":"new"}"#),
                ],
            )
            .await
            .unwrap();
        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.already_present, 1);
        let stored = svc.documents("orders");
        assert_eq!(stored[0].payload, r#"{"v":"old"}"#);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let svc = MemoryIndexService::new("dest");
        svc.fail_next_bulks(2);
        let batch = docs(1);
        assert!(svc.bulk_create("orders", &batch).await.is_err());
        assert!(svc.bulk_create("orders", &batch).await.is_err());
        assert!(svc.bulk_create("orders", &batch).await.is_ok());
        assert_eq!(svc.call_count("bulk_create"), 3);
    }

    #[tokio::test]
    async fn injected_rejection_applies_once() {
        let svc = MemoryIndexService::new("dest");
        svc.reject_next("00000", 429);
        let batch = docs(2);
        let first = svc.bulk_create("orders", &batch).await.unwrap();
        assert_eq!(first.created, 1);
        assert_eq!(first.rejected.len(), 1);
        assert_eq!(first.rejected[0].status, 429);

        let retry = svc.bulk_create("orders", &batch[..1]).await.unwrap();
        assert_eq!(retry.created, 1);
        assert!(retry.rejected.is_empty());
    }

    #[tokio::test]
    async fn delayed_search_failures_start_after_successes() {
        let svc = MemoryIndexService::new("source").with_index("orders", json!({}), docs(4));
        svc.fail_searches_after(1, 2);
        let first = svc.search("orders", 2, None).await.unwrap();
        let token = first.next_token.unwrap();
        assert!(svc.search("orders", 2, Some(&token)).await.is_err());
        assert!(svc.search("orders", 2, Some(&token)).await.is_err());
        assert_eq!(svc.search("orders", 2, Some(&token)).await.unwrap().records.len(), 2);
    }

    #[tokio::test]
    async fn rejections_can_omit_ids() {
        let svc = MemoryIndexService::new("dest");
        svc.omit_rejected_ids();
        svc.reject_next("00000", 429);
        let outcome = svc.bulk_create("orders", &docs(1)).await.unwrap();
        assert_eq!(outcome.rejected.len(), 1);
        assert!(outcome.rejected[0].id.is_empty());
    }

    #[tokio::test]
    async fn create_index_refuses_existing() {
        let svc = MemoryIndexService::new("dest").with_index("orders", json!({}), vec![]);
        let err = svc.create_index("orders", &json!({})).await.unwrap_err();
        assert_eq!(err.status(), Some(400));
    }

    #[tokio::test]
    async fn close_cursors_records_tokens() {
        let svc = MemoryIndexService::new("source").with_index("orders", json!({}), docs(3));
        let page = svc.search("orders", 1, None).await.unwrap();
        let token = page.next_token.unwrap();
        svc.close_cursors(std::slice::from_ref(&token)).await.unwrap();
        assert_eq!(svc.open_cursors(), 0);
        assert_eq!(svc.closed_tokens(), vec![token.as_str().to_string()]);
    }
}
