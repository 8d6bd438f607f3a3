// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! The coordinator loop shared by both call shapes.
//!
//! ```text
//! INIT -> PROBE -> (READY | SLEEP | BUSY_SPIN) -> (PROBE | DONE)
//! ```
//!
//! The first PROBE registers with every source it queries until something
//! is found ready; later passes only query. A wake, whether from a source or
//! from the deadline, is always followed by one more PROBE.

use kerrno::{KError, KResult};

use crate::{
    busy::BusyLoop, cancel::CancelToken, config::MpxConfig, deadline::Deadline, wait::PollTable,
};

/// A descriptor set the loop can sweep.
pub(crate) trait ProbeSet {
    /// Number of entries, bounding the registrations one call can make.
    fn len(&self) -> usize;

    /// Queries every entry in order through `pt`, recording results, and
    /// returns how many conditions were found ready.
    ///
    /// Implementations call [`PollTable::mark_ready`] on the first match so
    /// later entries of the pass are not registered.
    fn probe(&mut self, pt: &mut PollTable) -> KResult<usize>;
}

/// Runs one multiplex call over `set`. Every registration made is detached
/// before this returns.
pub(crate) fn run<S: ProbeSet>(
    set: &mut S,
    deadline: &Deadline,
    config: &MpxConfig,
    cancel: Option<&CancelToken>,
) -> KResult<usize> {
    let mut pt = PollTable::new(set.len(), config.busy_poll.is_some());
    let _cancel_guard = cancel.map(|token| token.attach(pt.waker()));
    let mut busy = BusyLoop::new(config.busy_poll);

    let mut timed_out = deadline.is_immediate();
    if timed_out {
        pt.stop_registering();
    }

    let mut passes = 0usize;
    let result = loop {
        pt.begin_pass();
        let count = match set.probe(&mut pt) {
            Ok(count) => count,
            Err(err) => break Err(err),
        };
        passes += 1;
        pt.stop_registering();

        if count > 0 || timed_out {
            break Ok(count);
        }
        if cancel.is_some_and(CancelToken::is_pending) {
            break Err(KError::Interrupted);
        }
        if pt.can_busy_loop() && busy.keep_spinning(deadline) {
            continue;
        }
        pt.stop_busy_loop();

        if !pt.sleep(deadline) {
            timed_out = true;
        }
    };

    trace!(
        "multiplex done after {passes} passes, {} spins, {} registrations: {result:?}",
        busy.spins(),
        pt.registered()
    );
    result
}
