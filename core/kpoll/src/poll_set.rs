// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use kerrno::{KError, KResult};
use slab::Slab;
use spin::Mutex;

use crate::{IoEvents, PollWaiter, WaitKey};

/// Default number of waiters a [`PollSet`] accepts.
pub const POLL_SET_CAPACITY: usize = 64;

/// A source-side notification list.
///
/// Waiters are notified while the list lock is held, so once
/// [`unregister`](PollSet::unregister) returns the removed waiter is never
/// called again.
pub struct PollSet {
    waiters: Mutex<Slab<Arc<dyn PollWaiter>>>,
    capacity: usize,
    wakes: AtomicUsize,
}

impl PollSet {
    /// Creates an empty set holding up to [`POLL_SET_CAPACITY`] waiters.
    pub fn new() -> Self {
        Self::with_capacity(POLL_SET_CAPACITY)
    }

    /// Creates an empty set holding up to `capacity` waiters.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            waiters: Mutex::new(Slab::new()),
            capacity,
            wakes: AtomicUsize::new(0),
        }
    }

    /// Number of attached waiters.
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Whether no waiter is attached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attaches `waiter`. A full set refuses with [`KError::NoMemory`].
    pub fn register(&self, waiter: Arc<dyn PollWaiter>) -> KResult<WaitKey> {
        let mut waiters = self.waiters.lock();
        if waiters.len() >= self.capacity {
            warn!("poll set full ({} waiters)", waiters.len());
            return Err(KError::NoMemory);
        }
        Ok(WaitKey::new(waiters.insert(waiter)))
    }

    /// Detaches the waiter behind `key`. Returns `false` if it was not
    /// attached.
    pub fn unregister(&self, key: WaitKey) -> bool {
        let mut waiters = self.waiters.lock();
        if waiters.contains(key.slot()) {
            drop(waiters.remove(key.slot()));
            true
        } else {
            false
        }
    }

    /// Reports `events` to every attached waiter and returns how many were
    /// called. Waiters decide themselves whether the events concern them.
    pub fn wake(&self, events: IoEvents) -> usize {
        let waiters = self.waiters.lock();
        for (_, waiter) in waiters.iter() {
            waiter.notify(events);
        }
        self.wakes.fetch_add(1, Ordering::Relaxed);
        trace!("poll set woke {} waiters with {events:?}", waiters.len());
        waiters.len()
    }

    /// Number of [`wake`](Self::wake) calls so far.
    pub fn wake_count(&self) -> usize {
        self.wakes.load(Ordering::Relaxed)
    }
}

impl Default for PollSet {
    fn default() -> Self {
        Self::new()
    }
}
