//! Single-item replacing slots
//!
//! A `Slot` holds at most one item. `put` never blocks: an unconsumed item is
//! silently replaced, so a consumer only ever sees the latest value.
//! `BidirectionalSlot` pairs two slots so a controlling thread and a
//! lower-priority worker can exchange requests and results.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::types::SlotEmpty;

/// Capacity-1 mailbox, latest value wins
pub struct Slot<T> {
    item: Mutex<Option<T>>,
    available: Condvar,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self {
            item: Mutex::new(None),
            available: Condvar::new(),
        }
    }

    /// Store `item`, discarding any unconsumed previous item
    pub fn put(&self, item: T) {
        let mut slot = self.item.lock();
        *slot = Some(item);
        drop(slot);
        self.available.notify_all();
    }

    /// Block until an item is present and take it
    pub fn get(&self) -> T {
        let mut slot = self.item.lock();
        loop {
            if let Some(item) = slot.take() {
                return item;
            }
            self.available.wait(&mut slot);
        }
    }

    /// Take the item, waiting at most `timeout`
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, SlotEmpty> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.item.lock();
        loop {
            if let Some(item) = slot.take() {
                return Ok(item);
            }
            if self.available.wait_until(&mut slot, deadline).timed_out() {
                return slot.take().ok_or(SlotEmpty);
            }
        }
    }

    /// Take the item if one is present
    pub fn try_get(&self) -> Result<T, SlotEmpty> {
        self.item.lock().take().ok_or(SlotEmpty)
    }

    /// Sleep up to `timeout`, waking early when an item is present
    ///
    /// Returns `true` when an item is available. The item is not consumed.
    pub fn slumber(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.item.lock();
        while slot.is_none() {
            if self.available.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.item.lock().is_none()
    }

    pub fn is_full(&self) -> bool {
        !self.is_empty()
    }
}

impl<T: Clone> Slot<T> {
    /// Block until an item is present and return a copy, leaving it in place
    pub fn peek(&self) -> T {
        let mut slot = self.item.lock();
        loop {
            if let Some(item) = slot.as_ref() {
                return item.clone();
            }
            self.available.wait(&mut slot);
        }
    }

    /// Like `peek`, waiting at most `timeout`
    pub fn peek_timeout(&self, timeout: Duration) -> Result<T, SlotEmpty> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.item.lock();
        loop {
            if let Some(item) = slot.as_ref() {
                return Ok(item.clone());
            }
            if self.available.wait_until(&mut slot, deadline).timed_out() {
                return slot.clone().ok_or(SlotEmpty);
            }
        }
    }

    /// Copy of the item if one is present
    pub fn try_peek(&self) -> Result<T, SlotEmpty> {
        self.item.lock().clone().ok_or(SlotEmpty)
    }
}

/// Duplex rendezvous between a controlling thread (above) and a worker (below)
pub struct BidirectionalSlot<Up, Down = Up> {
    up: Slot<Up>,
    down: Slot<Down>,
}

impl<Up, Down> Default for BidirectionalSlot<Up, Down> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Up, Down> BidirectionalSlot<Up, Down> {
    pub fn new() -> Self {
        Self {
            up: Slot::new(),
            down: Slot::new(),
        }
    }

    /// Worker side: deliver a result to the controlling thread
    pub fn put_upwards(&self, item: Up) {
        self.up.put(item);
    }

    /// Controller side: wait for a result from the worker
    pub fn get_from_below(&self) -> Up {
        self.up.get()
    }

    pub fn get_from_below_timeout(&self, timeout: Duration) -> Result<Up, SlotEmpty> {
        self.up.get_timeout(timeout)
    }

    pub fn try_get_from_below(&self) -> Result<Up, SlotEmpty> {
        self.up.try_get()
    }

    /// Controller side: send a request to the worker
    pub fn put_downwards(&self, item: Down) {
        self.down.put(item);
    }

    /// Worker side: wait for a request from the controller
    pub fn get_from_above(&self) -> Down {
        self.down.get()
    }

    pub fn get_from_above_timeout(&self, timeout: Duration) -> Result<Down, SlotEmpty> {
        self.down.get_timeout(timeout)
    }

    pub fn try_get_from_above(&self) -> Result<Down, SlotEmpty> {
        self.down.try_get()
    }

    /// Upward slot, e.g. to check for fresh results without taking them
    pub fn up(&self) -> &Slot<Up> {
        &self.up
    }

    pub fn down(&self) -> &Slot<Down> {
        &self.down
    }
}

// =============================================================================
// TESTS
// =============================================================================
