//! Bounded FIFO between `push` and the scheduler.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;

use crate::core::StreamItem;

/// A bounded item queue.
///
/// `len()` never exceeds `capacity()`: every insertion path checks the bound
/// under the same lock that performs the insert.
#[derive(Debug)]
pub struct ItemBuffer {
    items: Mutex<VecDeque<StreamItem>>,
    capacity: usize,
    space: Notify,
}

impl ItemBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            space: Notify::new(),
        }
    }

    /// The hard bound.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Appends an item, handing it back if the buffer is full.
    pub fn try_push(&self, item: StreamItem) -> Result<(), StreamItem> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(item);
        }
        items.push_back(item);
        Ok(())
    }

    /// Appends an item, waiting up to `timeout` for space.
    pub async fn push_wait(&self, item: StreamItem, timeout: Duration) -> Result<(), StreamItem> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut item = item;
        loop {
            // Registered before the capacity check so a drain in between is not missed.
            let notified = self.space.notified();
            match self.try_push(item) {
                Ok(()) => return Ok(()),
                Err(back) => item = back,
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_push(item);
            }
        }
    }

    /// Removes up to `max` items from the head.
    pub fn drain(&self, max: usize) -> Vec<StreamItem> {
        let drained: Vec<StreamItem> = {
            let mut items = self.items.lock();
            let n = max.min(items.len());
            items.drain(..n).collect()
        };
        if !drained.is_empty() {
            self.space.notify_waiters();
        }
        drained
    }

    /// Drops every buffered item and returns how many there were.
    pub fn clear(&self) -> usize {
        let n = {
            let mut items = self.items.lock();
            let n = items.len();
            items.clear();
            n
        };
        self.space.notify_waiters();
        n
    }
}
