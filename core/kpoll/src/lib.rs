// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Readiness masks and the contract every pollable source fulfils.
//!
//! A source answers two questions for the multiplexer: "what is ready right
//! now?" ([`Pollable::poll`]) and "tell me when that changes"
//! ([`Pollable::register`] / [`Pollable::unregister`]). Sources that keep a
//! list of interested waiters can embed a [`PollSet`] to do the bookkeeping.
#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;
extern crate alloc;


mod poll_set;

use alloc::sync::Arc;

use bitflags::bitflags;
use kerrno::KResult;
use linux_raw_sys::general::{
    POLLERR, POLLHUP, POLLIN, POLLMSG, POLLNVAL, POLLOUT, POLLPRI, POLLRDBAND, POLLRDHUP,
    POLLRDNORM, POLLWRBAND, POLLWRNORM,
};

pub use self::poll_set::{POLL_SET_CAPACITY, PollSet};

bitflags! {
    /// I/O readiness conditions, bit-compatible with Linux `POLL*`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IoEvents: u32 {
        const IN     = POLLIN;
        const PRI    = POLLPRI;
        const OUT    = POLLOUT;
        const ERR    = POLLERR;
        const HUP    = POLLHUP;
        const NVAL   = POLLNVAL;
        const RDNORM = POLLRDNORM;
        const RDBAND = POLLRDBAND;
        const WRNORM = POLLWRNORM;
        const WRBAND = POLLWRBAND;
        const MSG    = POLLMSG;
        const RDHUP  = POLLRDHUP;

        /// Conditions reported whether or not they were requested.
        const ALWAYS_POLL = POLLERR | POLLHUP;
    }
}

/// Identifies one waiter inside a source's notification list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitKey(usize);

impl WaitKey {
    /// Wraps a source-chosen slot index.
    pub const fn new(slot: usize) -> Self {
        Self(slot)
    }

    /// The slot index this key was created from.
    pub const fn slot(self) -> usize {
        self.0
    }
}

/// Receiver of readiness changes.
///
/// Sources call [`notify`](PollWaiter::notify) from whatever context changed
/// their state, possibly concurrently with the owner tearing the waiter down.
pub trait PollWaiter: Send + Sync {
    /// Reports the conditions that became true. An empty mask means the
    /// source could not tell which conditions changed.
    fn notify(&self, events: IoEvents);
}

/// A source of readiness events: socket, pipe, device, timer...
pub trait Pollable: Send + Sync {
    /// Returns the subset of `events` currently satisfied, together with any
    /// of [`IoEvents::ALWAYS_POLL`] that hold. Never blocks.
    fn poll(&self, events: IoEvents) -> IoEvents;

    /// Attaches `waiter` so it hears about future changes to `events`.
    ///
    /// Fails with [`kerrno::KError::NoMemory`] when no record can be
    /// allocated for the waiter.
    fn register(&self, events: IoEvents, waiter: Arc<dyn PollWaiter>) -> KResult<WaitKey>;

    /// Detaches a waiter previously attached by [`register`](Self::register).
    ///
    /// Called at most once per key. Once this returns the source must not
    /// call the waiter again.
    fn unregister(&self, key: WaitKey);

    /// Whether re-polling without sleeping is expected to see readiness soon.
    fn busy_poll(&self) -> bool {
        false
    }
}

impl<T: Pollable + ?Sized> Pollable for Arc<T> {
    fn poll(&self, events: IoEvents) -> IoEvents {
        self.as_ref().poll(events)
    }

    fn register(&self, events: IoEvents, waiter: Arc<dyn PollWaiter>) -> KResult<WaitKey> {
        self.as_ref().register(events, waiter)
    }

    fn unregister(&self, key: WaitKey) {
        self.as_ref().unregister(key)
    }

    fn busy_poll(&self) -> bool {
        self.as_ref().busy_poll()
    }
}
