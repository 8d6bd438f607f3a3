// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Bitmap multiplexing (`select` shape).

use kerrno::{KError, KResult};
use kpoll::IoEvents;

use crate::{
    FdLookup, MpxContext,
    deadline::Timeout,
    engine::{self, ProbeSet},
    fdset::{BITS_PER_WORD, FdSet, SelectBits, Slot},
    wait::PollTable,
};

/// Conditions that make a descriptor readable.
const SELECT_IN: IoEvents = IoEvents::RDNORM
    .union(IoEvents::RDBAND)
    .union(IoEvents::IN)
    .union(IoEvents::HUP)
    .union(IoEvents::ERR);
/// Conditions that make a descriptor writable.
const SELECT_OUT: IoEvents = IoEvents::WRBAND
    .union(IoEvents::WRNORM)
    .union(IoEvents::OUT)
    .union(IoEvents::ERR);
/// Conditions reported as exceptional.
const SELECT_EX: IoEvents = IoEvents::PRI;

struct BitmapProbe<'a, T: FdLookup + ?Sized> {
    bits: SelectBits,
    nfds: usize,
    fds: &'a T,
    watched: usize,
}

impl<T: FdLookup + ?Sized> ProbeSet for BitmapProbe<'_, T> {
    fn len(&self) -> usize {
        self.watched
    }

    fn probe(&mut self, pt: &mut PollTable) -> KResult<usize> {
        let mut count = 0;
        for word in 0..self.bits.words() {
            let inw = self.bits.get(Slot::In)[word];
            let outw = self.bits.get(Slot::Out)[word];
            let exw = self.bits.get(Slot::Ex)[word];
            let all = inw | outw | exw;
            if all == 0 {
                continue;
            }

            let (mut res_in, mut res_out, mut res_ex) = (0usize, 0usize, 0usize);
            for bit in 0..BITS_PER_WORD {
                let fd = word * BITS_PER_WORD + bit;
                if fd >= self.nfds {
                    break;
                }
                let flag = 1usize << bit;
                if all & flag == 0 {
                    continue;
                }
                let Some(file) = self.fds.get(fd as i32) else {
                    continue;
                };

                let mut key = SELECT_EX;
                if inw & flag != 0 {
                    key |= SELECT_IN;
                }
                if outw & flag != 0 {
                    key |= SELECT_OUT;
                }
                let mask = pt.poll_source(&file, key)?;

                for (interest, class, res) in [
                    (inw, SELECT_IN, &mut res_in),
                    (outw, SELECT_OUT, &mut res_out),
                    (exw, SELECT_EX, &mut res_ex),
                ] {
                    if interest & flag != 0 && mask.intersects(class) {
                        *res |= flag;
                        count += 1;
                        pt.mark_ready();
                    }
                }
            }

            self.bits.get_mut(Slot::ResIn)[word] = res_in;
            self.bits.get_mut(Slot::ResOut)[word] = res_out;
            self.bits.get_mut(Slot::ResEx)[word] = res_ex;
        }
        Ok(count)
    }
}

/// Waits until a descriptor below `nfds` in one of the three sets is ready,
/// the timeout passes or the context's cancellation token fires.
///
/// Returns the number of (descriptor, condition) pairs found ready; a
/// descriptor both readable and writable counts twice. On success each given
/// set is overwritten with its result bits. On error the sets are untouched.
///
/// `nfds` above the caller's descriptor limit is truncated to it. A set that
/// names a descriptor which is not open fails with
/// [`KError::BadFileDescriptor`].
pub fn multiplex_bitmap<T: FdLookup + ?Sized>(
    ctx: &MpxContext<'_, T>,
    nfds: i32,
    mut read: Option<&mut FdSet>,
    mut write: Option<&mut FdSet>,
    mut except: Option<&mut FdSet>,
    timeout: Timeout,
) -> KResult<usize> {
    debug!("multiplex_bitmap <= nfds: {nfds}, timeout: {timeout:?}");
    if nfds < 0 {
        return Err(KError::InvalidInput);
    }
    let nfds = (nfds as usize).min(ctx.fds.max_fds());

    let mut bits = SelectBits::new(nfds)?;
    bits.load(Slot::In, read.as_deref());
    bits.load(Slot::Out, write.as_deref());
    bits.load(Slot::Ex, except.as_deref());
    let watched = bits.check_open(nfds, ctx.fds)?;

    let deadline = ctx.deadline(timeout);
    let mut probe = BitmapProbe {
        bits,
        nfds,
        fds: ctx.fds,
        watched,
    };
    let count = engine::run(&mut probe, &deadline, &ctx.config, ctx.cancel)?;

    probe.bits.store(Slot::ResIn, read.as_deref_mut());
    probe.bits.store(Slot::ResOut, write.as_deref_mut());
    probe.bits.store(Slot::ResEx, except.as_deref_mut());
    Ok(count)
}

#[cfg(test)]
mod tests_select {
    use kpoll::IoEvents;

    use super::{SELECT_EX, SELECT_IN, SELECT_OUT};

    #[test]
    fn test_condition_classes() {
        assert!(SELECT_IN.contains(IoEvents::HUP | IoEvents::ERR | IoEvents::IN));
        assert!(!SELECT_IN.contains(IoEvents::PRI));
        assert!(SELECT_OUT.contains(IoEvents::OUT | IoEvents::ERR));
        assert!(!SELECT_OUT.contains(IoEvents::HUP));
        assert_eq!(SELECT_EX, IoEvents::PRI);
    }
}
