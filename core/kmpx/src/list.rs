// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Descriptor lists stored as an arena of fixed-capacity chunks.

use core::mem::size_of;

use kerrno::{KError, KResult};
use kpoll::IoEvents;
use smallvec::SmallVec;

/// Bytes of list storage kept inline before spilling to the heap.
const POLL_STACK_ALLOC: usize = 256;
const PAGE_SIZE: usize = 4096;
/// Per-chunk bookkeeping (link and length) in a page-backed list.
const CHUNK_HEADER: usize = 2 * size_of::<usize>();

/// Entries held inline by the first chunk.
pub const STACK_ENTRIES: usize = (POLL_STACK_ALLOC - CHUNK_HEADER) / size_of::<PollFd>();
/// Entries per page-sized heap chunk.
pub const CHUNK_ENTRIES: usize = (PAGE_SIZE - CHUNK_HEADER) / size_of::<PollFd>();

/// One descriptor-list entry, laid out like `struct pollfd`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollFd {
    /// Handle to watch; negative entries are skipped.
    pub fd: i32,
    /// Requested conditions, `POLL*` bits.
    pub events: i16,
    /// Reported conditions, filled in by the call.
    pub revents: i16,
}

impl PollFd {
    pub fn new(fd: i32, events: IoEvents) -> Self {
        Self {
            fd,
            events: events.bits() as u16 as i16,
            revents: 0,
        }
    }

    /// The requested conditions. Unknown bits make the entry malformed.
    pub fn interest(&self) -> KResult<IoEvents> {
        IoEvents::from_bits(self.events as u16 as u32).ok_or(KError::InvalidInput)
    }

    /// The reported conditions.
    pub fn ready(&self) -> IoEvents {
        IoEvents::from_bits_truncate(self.revents as u16 as u32)
    }
}

/// The caller's entries, copied in once per call.
///
/// The first chunk lives inline; the rest are heap chunks of a fixed
/// capacity. Entries are addressed by `(chunk, offset)`.
pub(crate) struct PollList {
    head: SmallVec<[PollFd; STACK_ENTRIES]>,
    chunks: Vec<Vec<PollFd>>,
    chunk_entries: usize,
}

impl PollList {
    /// Copies `fds` into a new list with heap chunks of `chunk_entries`.
    pub(crate) fn build(fds: &[PollFd], chunk_entries: usize) -> KResult<Self> {
        let chunk_entries = chunk_entries.max(1);
        let split = fds.len().min(STACK_ENTRIES);
        let (head, rest) = fds.split_at(split);

        let mut chunks = Vec::new();
        chunks
            .try_reserve_exact(rest.len().div_ceil(chunk_entries))
            .map_err(|_| KError::NoMemory)?;
        for part in rest.chunks(chunk_entries) {
            let mut chunk = Vec::new();
            chunk
                .try_reserve_exact(chunk_entries)
                .map_err(|_| KError::NoMemory)?;
            chunk.extend_from_slice(part);
            chunks.push(chunk);
        }

        Ok(Self {
            head: SmallVec::from_slice(head),
            chunks,
            chunk_entries,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.head.len() + self.chunks.iter().map(Vec::len).sum::<usize>()
    }

    /// Number of chunks, the inline one included.
    pub(crate) fn chunk_count(&self) -> usize {
        1 + self.chunks.len()
    }

    /// Maps a flat index to `(chunk, offset)`.
    fn locate(&self, index: usize) -> (usize, usize) {
        if index < STACK_ENTRIES {
            (0, index)
        } else {
            let rest = index - STACK_ENTRIES;
            (1 + rest / self.chunk_entries, rest % self.chunk_entries)
        }
    }

    pub(crate) fn get(&self, index: usize) -> Option<&PollFd> {
        match self.locate(index) {
            (0, offset) => self.head.get(offset),
            (chunk, offset) => self.chunks.get(chunk - 1)?.get(offset),
        }
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut PollFd> {
        self.head
            .iter_mut()
            .chain(self.chunks.iter_mut().flat_map(|chunk| chunk.iter_mut()))
    }

    /// Writes every entry's result mask back to the caller's array.
    pub(crate) fn copy_revents(&self, dst: &mut [PollFd]) {
        for (index, out) in dst.iter_mut().enumerate() {
            if let Some(entry) = self.get(index) {
                out.revents = entry.revents;
            }
        }
    }
}
