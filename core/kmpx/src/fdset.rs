// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Dense descriptor bitmaps.

use core::mem::size_of;

use kerrno::{KError, KResult};
use smallvec::SmallVec;

use crate::FdLookup;

pub(crate) const BITS_PER_WORD: usize = usize::BITS as usize;

/// Bytes of bitmap storage kept inline before spilling to the heap.
const SELECT_STACK_ALLOC: usize = 256;
const STACK_WORDS: usize = SELECT_STACK_ALLOC / size_of::<usize>();

/// A caller-owned set of descriptors, like `fd_set` but growable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FdSet {
    words: Vec<usize>,
}

impl FdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `fd` to the set.
    pub fn set(&mut self, fd: usize) {
        let word = fd / BITS_PER_WORD;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1usize << (fd % BITS_PER_WORD);
    }

    /// Removes `fd` from the set.
    pub fn clear(&mut self, fd: usize) {
        if let Some(word) = self.words.get_mut(fd / BITS_PER_WORD) {
            *word &= !(1usize << (fd % BITS_PER_WORD));
        }
    }

    pub fn is_set(&self, fd: usize) -> bool {
        self.words
            .get(fd / BITS_PER_WORD)
            .is_some_and(|word| word & (1usize << (fd % BITS_PER_WORD)) != 0)
    }

    /// Empties the set.
    pub fn zero(&mut self) {
        self.words.fill(0);
    }

    /// Number of descriptors in the set.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// The descriptors in the set, ascending.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(index, &word)| {
            (0..BITS_PER_WORD)
                .filter(move |&bit| word & (1usize << bit) != 0)
                .map(move |bit| index * BITS_PER_WORD + bit)
        })
    }
}

impl FromIterator<usize> for FdSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = Self::new();
        for fd in iter {
            set.set(fd);
        }
        set
    }
}

/// One of the six arrays a bitmap call works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    In = 0,
    Out,
    Ex,
    ResIn,
    ResOut,
    ResEx,
}

/// Interest and result bitmaps of one call, in a single allocation.
pub(crate) struct SelectBits {
    bits: SmallVec<[usize; STACK_WORDS]>,
    words: usize,
}

impl SelectBits {
    /// Zeroed bitmaps for descriptors `0..nfds`.
    pub(crate) fn new(nfds: usize) -> KResult<Self> {
        let words = nfds.div_ceil(BITS_PER_WORD);
        let total = words.checked_mul(6).ok_or(KError::NoMemory)?;
        let mut bits: SmallVec<[usize; STACK_WORDS]> = SmallVec::new();
        bits.try_reserve_exact(total)
            .map_err(|_| KError::NoMemory)?;
        bits.resize(total, 0);
        Ok(Self { bits, words })
    }

    /// Words per bitmap.
    pub(crate) fn words(&self) -> usize {
        self.words
    }

    pub(crate) fn get(&self, slot: Slot) -> &[usize] {
        let start = slot as usize * self.words;
        &self.bits[start..start + self.words]
    }

    pub(crate) fn get_mut(&mut self, slot: Slot) -> &mut [usize] {
        let start = slot as usize * self.words;
        &mut self.bits[start..start + self.words]
    }

    /// Copies the caller's set into `slot`; a missing set is empty.
    pub(crate) fn load(&mut self, slot: Slot, src: Option<&FdSet>) {
        let dst = self.get_mut(slot);
        dst.fill(0);
        if let Some(src) = src {
            let n = dst.len().min(src.words.len());
            dst[..n].copy_from_slice(&src.words[..n]);
        }
    }

    /// Copies `slot` out over the first words of the caller's set.
    pub(crate) fn store(&self, slot: Slot, dst: Option<&mut FdSet>) {
        if let Some(dst) = dst {
            if dst.words.len() < self.words {
                dst.words.resize(self.words, 0);
            }
            dst.words[..self.words].copy_from_slice(self.get(slot));
        }
    }

    /// Checks that every descriptor below `nfds` named by an interest bitmap
    /// is open, and returns how many such descriptors there are.
    pub(crate) fn check_open<T: FdLookup + ?Sized>(&self, nfds: usize, fds: &T) -> KResult<usize> {
        let (ins, outs, exs) = (self.get(Slot::In), self.get(Slot::Out), self.get(Slot::Ex));
        let mut watched = 0;
        for word in 0..self.words {
            let mut all = ins[word] | outs[word] | exs[word];
            while all != 0 {
                let bit = all.trailing_zeros() as usize;
                all &= all - 1;
                let fd = word * BITS_PER_WORD + bit;
                if fd >= nfds {
                    break;
                }
                if fds.get(fd as i32).is_none() {
                    warn!("bitmap names descriptor {fd} which is not open");
                    return Err(KError::BadFileDescriptor);
                }
                watched += 1;
            }
        }
        Ok(watched)
    }
}
