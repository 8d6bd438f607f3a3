// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Descriptor lookup.

use std::sync::Arc;

use hashbrown::HashMap;
use kerrno::{KError, KResult};
use kpoll::Pollable;
use spin::RwLock;

use crate::config::MpxConfig;

/// Resolves the caller's handles to pollable sources.
pub trait FdLookup {
    /// The source behind `fd`, if the caller owns it.
    fn get(&self, fd: i32) -> Option<Arc<dyn Pollable>>;

    /// The caller's open-handle limit. No handle at or above it is valid.
    fn max_fds(&self) -> usize;
}

/// A descriptor table allocating the lowest free slot.
pub struct FdTable {
    files: RwLock<HashMap<i32, Arc<dyn Pollable>>>,
    limit: usize,
}

impl FdTable {
    /// An empty table accepting descriptors `0..limit`.
    pub fn new(limit: usize) -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            limit: limit.min(i32::MAX as usize),
        }
    }

    /// An empty table sized by [`MpxConfig::max_fds`].
    pub fn from_config(config: &MpxConfig) -> Self {
        Self::new(config.max_fds)
    }

    /// Installs `file` at the lowest free descriptor.
    pub fn add(&self, file: Arc<dyn Pollable>) -> KResult<i32> {
        let mut files = self.files.write();
        let fd = (0..self.limit as i32)
            .find(|fd| !files.contains_key(fd))
            .ok_or(KError::NoMemory)?;
        files.insert(fd, file);
        Ok(fd)
    }

    /// Installs `file` at `fd`, returning what was there before.
    pub fn insert_at(&self, fd: i32, file: Arc<dyn Pollable>) -> KResult<Option<Arc<dyn Pollable>>> {
        if fd < 0 || fd as usize >= self.limit {
            return Err(KError::BadFileDescriptor);
        }
        Ok(self.files.write().insert(fd, file))
    }

    /// Closes `fd`.
    pub fn remove(&self, fd: i32) -> Option<Arc<dyn Pollable>> {
        self.files.write().remove(&fd)
    }

    /// Number of open descriptors.
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FdLookup for FdTable {
    fn get(&self, fd: i32) -> Option<Arc<dyn Pollable>> {
        self.files.read().get(&fd).cloned()
    }

    fn max_fds(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests_fd_table {
    use std::sync::Arc;

    use kerrno::{KError, KResult};
    use kpoll::{IoEvents, PollWaiter, Pollable, WaitKey};

    use super::{FdLookup, FdTable};

    struct Null;

    impl Pollable for Null {
        fn poll(&self, _events: IoEvents) -> IoEvents {
            IoEvents::empty()
        }

        fn register(&self, _events: IoEvents, _waiter: Arc<dyn PollWaiter>) -> KResult<WaitKey> {
            Ok(WaitKey::new(0))
        }

        fn unregister(&self, _key: WaitKey) {}
    }

    #[test]
    fn test_lowest_free_slot() {
        let table = FdTable::new(4);
        assert_eq!(table.add(Arc::new(Null)), Ok(0));
        assert_eq!(table.add(Arc::new(Null)), Ok(1));
        assert!(table.remove(0).is_some());
        assert_eq!(table.add(Arc::new(Null)), Ok(0));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_full_table() {
        let table = FdTable::new(1);
        table.add(Arc::new(Null)).unwrap();
        assert_eq!(table.add(Arc::new(Null)), Err(KError::NoMemory));
    }

    #[test]
    fn test_insert_at_bounds() {
        let table = FdTable::new(8);
        assert!(table.insert_at(7, Arc::new(Null)).unwrap().is_none());
        assert!(table.get(7).is_some());
        assert!(table.get(6).is_none());
        assert_eq!(
            table.insert_at(8, Arc::new(Null)).err(),
            Some(KError::BadFileDescriptor)
        );
        assert_eq!(
            table.insert_at(-1, Arc::new(Null)).err(),
            Some(KError::BadFileDescriptor)
        );
        assert_eq!(table.max_fds(), 8);
    }
}
