//! Bounded double-ended transfer queue between readers and the dispatcher.
//!
//! Producers suspend while the queue is full; consumers poll with a timeout
//! and treat an elapsed timeout as "nothing arrived", not as an error.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use essync_types::TransferBatch;
use tokio::sync::Semaphore;

/// The queue was closed; no further items will be accepted or handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("transfer queue closed")]
pub struct QueueClosed;

#[derive(Debug, Clone, Copy)]
enum End {
    Front,
    Back,
}

/// Fixed-capacity queue of [`TransferBatch`].
///
/// `slots` holds one permit per free position and `ready` one permit per
/// queued batch; the deque itself is only touched while a permit is held.
pub struct TransferQueue {
    items: Mutex<VecDeque<TransferBatch>>,
    slots: Semaphore,
    ready: Semaphore,
    capacity: usize,
}

impl TransferQueue {
    /// A queue holding at most `capacity` batches (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            slots: Semaphore::new(capacity),
            ready: Semaphore::new(0),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TransferBatch>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Append at the back, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] if the queue is closed before space frees up.
    pub async fn put(&self, batch: TransferBatch) -> Result<(), QueueClosed> {
        self.insert(batch, End::Back).await
    }

    /// Insert at the front, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] if the queue is closed before space frees up.
    pub async fn put_front(&self, batch: TransferBatch) -> Result<(), QueueClosed> {
        self.insert(batch, End::Front).await
    }

    /// Take from the front, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] once the queue has been closed.
    pub async fn poll(&self, timeout: Duration) -> Result<Option<TransferBatch>, QueueClosed> {
        self.take(timeout, End::Front).await
    }

    /// Take from the back, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] once the queue has been closed.
    pub async fn poll_back(&self, timeout: Duration) -> Result<Option<TransferBatch>, QueueClosed> {
        self.take(timeout, End::Back).await
    }

    /// Close the queue, waking every suspended producer and consumer.
    /// Returns the number of batches still queued, which are discarded.
    pub fn close(&self) -> usize {
        self.slots.close();
        self.ready.close();
        let mut items = self.lock();
        let discarded = items.len();
        items.clear();
        discarded
    }

    async fn insert(&self, batch: TransferBatch, end: End) -> Result<(), QueueClosed> {
        let permit = self.slots.acquire().await.map_err(|_| QueueClosed)?;
        permit.forget();
        {
            let mut items = self.lock();
            match end {
                End::Front => items.push_front(batch),
                End::Back => items.push_back(batch),
            }
        }
        self.ready.add_permits(1);
        Ok(())
    }

    async fn take(&self, timeout: Duration, end: End) -> Result<Option<TransferBatch>, QueueClosed> {
        let permit = match tokio::time::timeout(timeout, self.ready.acquire()).await {
            Err(_elapsed) => return Ok(None),
            Ok(acquired) => acquired.map_err(|_| QueueClosed)?,
        };
        permit.forget();
        let batch = {
            let mut items = self.lock();
            match end {
                End::Front => items.pop_front(),
                End::Back => items.pop_back(),
            }
        };
        self.slots.add_permits(1);
        Ok(batch)
    }
}
