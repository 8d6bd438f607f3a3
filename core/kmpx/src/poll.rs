// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Descriptor-list multiplexing (`poll` shape).

use kerrno::{KError, KResult};
use kpoll::IoEvents;

use crate::{
    FdLookup, MpxContext,
    deadline::Timeout,
    engine::{self, ProbeSet},
    list::{PollFd, PollList},
    wait::PollTable,
};

struct ListProbe<'a, T: FdLookup + ?Sized> {
    list: PollList,
    fds: &'a T,
}

impl<T: FdLookup + ?Sized> ListProbe<'_, T> {
    fn poll_one(fds: &T, entry: &PollFd, pt: &mut PollTable) -> KResult<IoEvents> {
        if entry.fd < 0 {
            return Ok(IoEvents::empty());
        }
        let Some(file) = fds.get(entry.fd) else {
            return Ok(IoEvents::NVAL);
        };
        let filter = IoEvents::from_bits_truncate(entry.events as u16 as u32) | IoEvents::ALWAYS_POLL;
        pt.poll_source(&file, filter)
    }
}

impl<T: FdLookup + ?Sized> ProbeSet for ListProbe<'_, T> {
    fn len(&self) -> usize {
        self.list.len()
    }

    fn probe(&mut self, pt: &mut PollTable) -> KResult<usize> {
        let mut count = 0;
        for entry in self.list.iter_mut() {
            let mask = Self::poll_one(self.fds, entry, pt)?;
            entry.revents = mask.bits() as u16 as i16;
            if !mask.is_empty() {
                count += 1;
                pt.mark_ready();
            }
        }
        Ok(count)
    }
}

/// Waits until an entry of `entries` is ready, the timeout passes or the
/// context's cancellation token fires.
///
/// Returns the number of entries with a non-empty result; each entry's
/// `revents` holds its result. Negative handles are skipped and handles not
/// open report [`IoEvents::NVAL`]. On error `entries` is left untouched.
pub fn multiplex_list<T: FdLookup + ?Sized>(
    ctx: &MpxContext<'_, T>,
    entries: &mut [PollFd],
    timeout: Timeout,
) -> KResult<usize> {
    debug!(
        "multiplex_list <= nfds: {}, timeout: {timeout:?}",
        entries.len()
    );
    if entries.len() > ctx.fds.max_fds() {
        warn!(
            "multiplex_list: {} entries exceed the limit of {}",
            entries.len(),
            ctx.fds.max_fds()
        );
        return Err(KError::InvalidInput);
    }
    for entry in entries.iter() {
        entry.interest()?;
    }

    let deadline = ctx.deadline(timeout);
    let list = PollList::build(entries, ctx.config.chunk_entries)?;
    trace!(
        "multiplex_list: {} entries in {} chunks",
        list.len(),
        list.chunk_count()
    );
    let mut probe = ListProbe { list, fds: ctx.fds };
    let count = engine::run(&mut probe, &deadline, &ctx.config, ctx.cancel)?;
    probe.list.copy_revents(entries);
    Ok(count)
}
