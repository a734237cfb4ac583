//! Scroll cursor state machine.
//!
//! A cursor walks one source index page by page:
//! `Fresh → Active(token) → Exhausted`. Every token the service hands out is
//! remembered so [`ScrollCursor::release`] can free the server-side context
//! no matter how reading ended.

use std::collections::BTreeSet;
use std::sync::Arc;

use essync_client::{IndexService, ServiceError};
use essync_types::{CursorToken, DocumentRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorState {
    /// No request issued yet.
    Fresh,
    /// More pages may follow; the token continues the scroll.
    Active(CursorToken),
    /// The service has nothing more to return.
    Exhausted,
}

pub struct ScrollCursor {
    service: Arc<dyn IndexService>,
    index: String,
    page_size: usize,
    state: CursorState,
    issued: BTreeSet<CursorToken>,
    released: bool,
}

impl ScrollCursor {
    #[must_use]
    pub fn new(service: Arc<dyn IndexService>, index: impl Into<String>, page_size: usize) -> Self {
        Self {
            service,
            index: index.into(),
            page_size,
            state: CursorState::Fresh,
            issued: BTreeSet::new(),
            released: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> &CursorState {
        &self.state
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    /// Token that continues the scroll, if any.
    #[must_use]
    pub fn current_token(&self) -> Option<&CursorToken> {
        match &self.state {
            CursorState::Active(token) => Some(token),
            CursorState::Fresh | CursorState::Exhausted => None,
        }
    }

    /// Number of distinct tokens issued so far.
    #[must_use]
    pub fn issued_count(&self) -> usize {
        self.issued.len()
    }

    /// Fetch the next page.
    ///
    /// Records of the final page are returned even though the cursor moves
    /// to `Exhausted`. An exhausted cursor returns an empty page without
    /// calling the service.
    ///
    /// # Errors
    ///
    /// Returns the service error unchanged; the cursor state is left as it
    /// was so the same step can be retried.
    pub async fn next_page(&mut self) -> Result<Vec<DocumentRecord>, ServiceError> {
        let page = match &self.state {
            CursorState::Exhausted => return Ok(Vec::new()),
            CursorState::Fresh => self.service.search(&self.index, self.page_size, None).await?,
            CursorState::Active(token) => {
                self.service
                    .search(&self.index, self.page_size, Some(token))
                    .await?
            }
        };

        if let Some(token) = &page.next_token {
            self.issued.insert(token.clone());
        }
        self.state = match page.next_token {
            Some(token) if !page.records.is_empty() => CursorState::Active(token),
            _ => CursorState::Exhausted,
        };
        Ok(page.records)
    }

    /// Release every token issued by this cursor. Runs at most once; a
    /// failure is logged and otherwise ignored.
    pub async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.issued.is_empty() {
            return;
        }

        let tokens: Vec<CursorToken> = self.issued.iter().cloned().collect();
        match self.service.close_cursors(&tokens).await {
            Ok(()) => tracing::debug!(
                index = %self.index,
                tokens = tokens.len(),
                "Released scroll contexts"
            ),
            Err(e) => tracing::warn!(
                index = %self.index,
                tokens = tokens.len(),
                error = %e,
                "Failed to release scroll contexts; they will expire on their own"
            ),
        }
    }
}
