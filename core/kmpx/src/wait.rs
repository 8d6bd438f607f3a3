// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Wait registry: the caller's attachments to its sources.
//!
//! A [`PollTable`] lives for one multiplex call. During the first probe pass
//! it attaches a [`PollEntry`] to every source it is asked about; each
//! attachment is held by a [`Registration`] guard that detaches it on drop,
//! so dropping the table on any exit path leaves no waiter behind.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use event_listener::{Event, Listener};
use kerrno::{KError, KResult};
use kpoll::{IoEvents, PollWaiter, Pollable, WaitKey};

use crate::deadline::Deadline;

/// The suspension handle of the calling thread plus its woken flag.
pub(crate) struct PollWake {
    triggered: AtomicBool,
    event: Event,
}

impl PollWake {
    pub(crate) fn new() -> Self {
        Self {
            triggered: AtomicBool::new(false),
            event: Event::new(),
        }
    }

    /// Marks the caller woken and resumes it if it sleeps.
    pub(crate) fn wake(&self) {
        self.triggered.store(true, Ordering::Release);
        self.event.notify(1);
    }

    /// Consumes the woken flag.
    pub(crate) fn take(&self) -> bool {
        self.triggered.swap(false, Ordering::AcqRel)
    }

    /// Blocks until woken or until the deadline's wake time.
    ///
    /// Returns `false` on timeout. The woken flag is clear on return.
    fn sleep(&self, deadline: &Deadline) -> bool {
        let wake_at = deadline.wake_time();
        loop {
            if self.take() {
                return true;
            }
            let listener = self.event.listen();
            // A wake between the check above and `listen` only set the flag.
            if self.take() {
                return true;
            }
            match wake_at {
                None => listener.wait(),
                Some(at) => {
                    if listener.wait_deadline(at).is_none() {
                        self.take();
                        return false;
                    }
                }
            }
        }
    }
}

/// The waiter handed to one source.
struct PollEntry {
    key: IoEvents,
    wake: Arc<PollWake>,
}

impl PollWaiter for PollEntry {
    fn notify(&self, events: IoEvents) {
        if !events.is_empty() && !events.intersects(self.key) {
            return;
        }
        self.wake.wake();
    }
}

/// One live attachment; detached from its source on drop.
struct Registration {
    source: Arc<dyn Pollable>,
    key: WaitKey,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.source.unregister(self.key);
    }
}

/// Per-call registration state owned by the coordinator loop.
pub(crate) struct PollTable {
    wake: Arc<PollWake>,
    registrations: Vec<Registration>,
    limit: usize,
    registering: bool,
    busy_flag: bool,
    can_busy_loop: bool,
}

impl PollTable {
    /// A table for at most `limit` registrations.
    pub(crate) fn new(limit: usize, busy_poll: bool) -> Self {
        Self {
            wake: Arc::new(PollWake::new()),
            registrations: Vec::new(),
            limit,
            registering: true,
            busy_flag: busy_poll,
            can_busy_loop: false,
        }
    }

    pub(crate) fn waker(&self) -> &Arc<PollWake> {
        &self.wake
    }

    /// Number of live registrations.
    pub(crate) fn registered(&self) -> usize {
        self.registrations.len()
    }

    /// Resets the per-pass fast-path flag.
    pub(crate) fn begin_pass(&mut self) {
        self.can_busy_loop = false;
    }

    /// Queries `source` for `key`, attaching to it first if this pass still
    /// registers. The answer is limited to `key` plus the always-on bits.
    pub(crate) fn poll_source(
        &mut self,
        source: &Arc<dyn Pollable>,
        key: IoEvents,
    ) -> KResult<IoEvents> {
        if self.registering {
            self.register(source, key)?;
        }
        if self.busy_flag && source.busy_poll() {
            self.can_busy_loop = true;
        }
        Ok(source.poll(key) & (key | IoEvents::ALWAYS_POLL))
    }

    fn register(&mut self, source: &Arc<dyn Pollable>, key: IoEvents) -> KResult {
        debug_assert!(self.registrations.len() < self.limit);
        self.registrations
            .try_reserve(1)
            .map_err(|_| KError::NoMemory)?;
        let entry = Arc::new(PollEntry {
            key,
            wake: self.wake.clone(),
        });
        let handle = source.register(key, entry)?;
        trace!("registered {key:?} as {handle:?}");
        self.registrations.push(Registration {
            source: source.clone(),
            key: handle,
        });
        Ok(())
    }

    /// Something is ready: stop registering and spinning for this call.
    pub(crate) fn mark_ready(&mut self) {
        self.registering = false;
        self.busy_flag = false;
        self.can_busy_loop = false;
    }

    /// Registration only ever happens on the first pass.
    pub(crate) fn stop_registering(&mut self) {
        self.registering = false;
    }

    /// Whether a source probed on this pass offered a fast path.
    pub(crate) fn can_busy_loop(&self) -> bool {
        self.can_busy_loop
    }

    /// The spin budget is gone; never spin again in this call.
    pub(crate) fn stop_busy_loop(&mut self) {
        self.busy_flag = false;
        self.can_busy_loop = false;
    }

    /// Sleeps until a registration fires or the deadline passes.
    /// Returns `false` on timeout.
    pub(crate) fn sleep(&self, deadline: &Deadline) -> bool {
        self.wake.sleep(deadline)
    }
}

impl Drop for PollTable {
    fn drop(&mut self) {
        if !self.registrations.is_empty() {
            trace!("dropping {} registrations", self.registrations.len());
        }
    }
}
