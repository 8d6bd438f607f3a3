// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use spin::Mutex;

use crate::wait::PollWake;

/// A pending asynchronous cancellation, the multiplexer's view of a signal.
///
/// While a multiplex call waits with this token attached,
/// [`cancel`](CancelToken::cancel) resumes it and the call returns
/// [`KError::Interrupted`](kerrno::KError::Interrupted) unless something was
/// already ready. The token stays pending until [`clear`](CancelToken::clear).
#[derive(Default)]
pub struct CancelToken {
    pending: AtomicBool,
    waiters: Mutex<Vec<Arc<PollWake>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token pending and wakes every call waiting on it.
    pub fn cancel(&self) {
        self.pending.store(true, Ordering::SeqCst);
        for waiter in self.waiters.lock().iter() {
            waiter.wake();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Acknowledges the cancellation.
    pub fn clear(&self) {
        self.pending.store(false, Ordering::SeqCst);
    }

    /// Routes cancellations to `waiter` until the guard drops.
    pub(crate) fn attach(&self, waiter: &Arc<PollWake>) -> CancelGuard<'_> {
        self.waiters.lock().push(waiter.clone());
        CancelGuard {
            token: self,
            waiter: waiter.clone(),
        }
    }
}

/// Detaches one call's waker; other calls sharing the token stay attached.
pub(crate) struct CancelGuard<'a> {
    token: &'a CancelToken,
    waiter: Arc<PollWake>,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        let mut waiters = self.token.waiters.lock();
        if let Some(pos) = waiters.iter().position(|w| Arc::ptr_eq(w, &self.waiter)) {
            waiters.swap_remove(pos);
        }
    }
}
