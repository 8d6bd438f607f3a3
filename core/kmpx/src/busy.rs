// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

use core::{hint, time::Duration};
use std::time::Instant;

use crate::deadline::Deadline;

/// Wall-clock budget for re-probing without sleeping.
pub(crate) struct BusyLoop {
    budget: Option<Duration>,
    start: Option<Instant>,
    spins: usize,
}

impl BusyLoop {
    pub(crate) fn new(budget: Option<Duration>) -> Self {
        Self {
            budget,
            start: None,
            spins: 0,
        }
    }

    /// Whether to probe again right away instead of sleeping.
    ///
    /// The budget starts running on the first call. Once spent, or once the
    /// deadline has passed, this keeps answering `false`.
    pub(crate) fn keep_spinning(&mut self, deadline: &Deadline) -> bool {
        let Some(budget) = self.budget else {
            return false;
        };
        let now = Instant::now();
        let start = *self.start.get_or_insert(now);
        if deadline.expired(now) || now.duration_since(start) >= budget {
            trace!("busy loop over after {} spins", self.spins);
            self.budget = None;
            return false;
        }
        self.spins += 1;
        hint::spin_loop();
        true
    }

    pub(crate) fn spins(&self) -> usize {
        self.spins
    }
}
