use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::Error;
use crate::Result;

/// Default capacity of the receive queue
pub const FIFO_CAPACITY: usize = 100;

/// Entries dropped at once when a full queue receives another entry
pub const FIFO_EVICTION_BATCH: usize = 20;

/// Bounded queue between a receive loop and its reader.
///
/// When full, the oldest `eviction_batch` entries are dropped before the
/// new entry is appended.
pub struct PacketFifo<T> {
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
    capacity: usize,
    eviction_batch: usize,
    closed: Mutex<bool>,
}

impl<T> PacketFifo<T> {
    pub fn new() -> Self {
        Self::with_capacity(FIFO_CAPACITY, FIFO_EVICTION_BATCH)
    }

    pub fn with_capacity(capacity: usize, eviction_batch: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            eviction_batch: eviction_batch.clamp(1, capacity.max(1)),
            closed: Mutex::new(false),
        }
    }

    /// Append an entry, returning how many old entries were evicted
    pub fn push(&self, item: T) -> usize {
        let evicted = {
            let mut queue = self.queue.lock();
            let evicted = if queue.len() >= self.capacity {
                let n = self.eviction_batch.min(queue.len());
                queue.drain(..n);
                n
            } else {
                0
            };
            queue.push_back(item);
            evicted
        };
        self.notify.notify_one();
        evicted
    }

    pub fn try_pop(&self) -> Option<T> {
        self.queue.lock().pop_front()
    }

    /// Wait for the oldest entry. A zero `timeout` waits indefinitely.
    pub async fn pop(&self, timeout: Duration) -> Result<T> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);

        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.try_pop() {
                return Ok(item);
            }
            if self.is_closed() {
                return Err(Error::Closed);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.try_pop().ok_or(Error::Timeout(timeout));
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Wake all readers; entries already queued can still be read
    pub fn close(&self) {
        *self.closed.lock() = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Default for PacketFifo<T> {
    fn default() -> Self {
        Self::new()
    }
}
