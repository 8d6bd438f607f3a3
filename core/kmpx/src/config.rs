// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Tunables of the multiplexer.
//!
//! Defaults follow Linux: busy polling off, 100 ms slack cap, 50 µs timer
//! slack, page-sized list chunks and a 1024 descriptor limit. A TOML
//! document can override them through an `[mpx]` table:
//!
//! ```toml
//! [mpx]
//! busy-poll-us = 50
//! max-slack-ns = 100000000
//! timer-slack-ns = 50000
//! chunk-entries = 510
//! max-fds = 4096
//! ```

use core::time::Duration;

use kerrno::{KError, KResult};
use toml_edit::DocumentMut;

use crate::{
    deadline::{SchedClass, SlackPolicy},
    list::CHUNK_ENTRIES,
};

/// Upper bound of the slack added to any deadline.
pub const MAX_SLACK: Duration = Duration::from_millis(100);
/// Default per-thread minimum timer slack.
pub const DEFAULT_TIMER_SLACK: Duration = Duration::from_micros(50);
/// Default open-descriptor limit.
pub const DEFAULT_MAX_FDS: usize = 1024;

/// Multiplexer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpxConfig {
    /// Spin budget when a source offers a low-latency fast path.
    /// `None` disables busy polling.
    pub busy_poll: Option<Duration>,
    /// Cap on the slack estimate.
    pub max_slack: Duration,
    /// Minimum slack of non-realtime callers.
    pub timer_slack: Duration,
    /// Capacity of each heap chunk of a descriptor list.
    pub chunk_entries: usize,
    /// Open-descriptor limit used by [`FdTable::from_config`](crate::FdTable::from_config).
    pub max_fds: usize,
}

impl Default for MpxConfig {
    fn default() -> Self {
        Self {
            busy_poll: None,
            max_slack: MAX_SLACK,
            timer_slack: DEFAULT_TIMER_SLACK,
            chunk_entries: CHUNK_ENTRIES,
            max_fds: DEFAULT_MAX_FDS,
        }
    }
}

impl MpxConfig {
    /// Parses the `[mpx]` table of a TOML document. Missing keys keep their
    /// defaults; a missing table yields the default configuration.
    pub fn from_toml(src: &str) -> KResult<Self> {
        let doc = src.parse::<DocumentMut>().map_err(|e| {
            warn!("malformed multiplexer config: {e}");
            KError::InvalidInput
        })?;
        let mut config = Self::default();
        let Some(item) = doc.get("mpx") else {
            return Ok(config);
        };
        let table = item.as_table().ok_or(KError::InvalidInput)?;

        for (key, item) in table.iter() {
            let value = item
                .as_integer()
                .and_then(|v| u64::try_from(v).ok())
                .ok_or_else(|| {
                    warn!("mpx.{key}: expected a non-negative integer");
                    KError::InvalidInput
                })?;
            match key {
                "busy-poll-us" => {
                    config.busy_poll = (value > 0).then(|| Duration::from_micros(value));
                }
                "max-slack-ns" => config.max_slack = Duration::from_nanos(value),
                "timer-slack-ns" => config.timer_slack = Duration::from_nanos(value),
                "chunk-entries" if value > 0 => config.chunk_entries = value as usize,
                "max-fds" if value > 0 && value <= i32::MAX as u64 => {
                    config.max_fds = value as usize
                }
                _ => {
                    warn!("mpx.{key} = {value}: unknown key or value out of range");
                    return Err(KError::InvalidInput);
                }
            }
        }
        debug!("multiplexer config: {config:?}");
        Ok(config)
    }

    /// The slack policy for a caller of the given scheduling class.
    pub fn slack_policy(&self, class: SchedClass) -> SlackPolicy {
        SlackPolicy {
            class,
            timer_slack: self.timer_slack,
            max_slack: self.max_slack,
        }
    }
}
