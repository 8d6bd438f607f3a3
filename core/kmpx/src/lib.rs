// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Readiness multiplexing.
//!
//! One calling thread blocks until at least one of many pollable sources is
//! ready, a deadline passes, or a cancellation arrives. Two call shapes feed
//! the same coordinator loop:
//! - [`multiplex_bitmap`]: read/write/exceptional bitmaps, `select` style
//! - [`multiplex_list`]: an array of [`PollFd`] entries, `poll` style
//!
//! Every wait registered with a source during a call is detached before the
//! call returns, whatever the outcome.

#[macro_use]
extern crate log;


mod busy;
mod cancel;
mod config;
mod deadline;
mod engine;
mod fd_table;
mod fdset;
mod list;
mod poll;
mod select;
mod wait;

pub use kpoll::{IoEvents, Pollable};

pub use self::{
    cancel::CancelToken,
    config::MpxConfig,
    deadline::{Deadline, SchedClass, SlackPolicy, Timeout},
    fd_table::{FdLookup, FdTable},
    fdset::FdSet,
    list::{CHUNK_ENTRIES, PollFd, STACK_ENTRIES},
    poll::multiplex_list,
    select::multiplex_bitmap,
};

/// Everything a multiplex call needs besides its descriptors and timeout.
pub struct MpxContext<'a, T: FdLookup + ?Sized> {
    fds: &'a T,
    config: MpxConfig,
    slack: SlackPolicy,
    cancel: Option<&'a CancelToken>,
}

impl<'a, T: FdLookup + ?Sized> MpxContext<'a, T> {
    /// A context with the default configuration for a normal caller.
    pub fn new(fds: &'a T) -> Self {
        let config = MpxConfig::default();
        Self {
            fds,
            slack: config.slack_policy(SchedClass::Normal),
            config,
            cancel: None,
        }
    }

    /// Replaces the configuration, keeping the caller's scheduling class.
    pub fn with_config(mut self, config: MpxConfig) -> Self {
        self.slack = config.slack_policy(self.slack.class);
        self.config = config;
        self
    }

    /// Sets the scheduling class the slack estimate is made for.
    pub fn with_class(mut self, class: SchedClass) -> Self {
        self.slack = self.config.slack_policy(class);
        self
    }

    /// Lets `token` interrupt the call while it waits.
    pub fn with_cancel(mut self, token: &'a CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The descriptor lookup this context resolves handles with.
    pub fn fds(&self) -> &'a T {
        self.fds
    }

    /// The active configuration.
    pub fn config(&self) -> &MpxConfig {
        &self.config
    }

    fn deadline(&self, timeout: Timeout) -> Deadline {
        Deadline::new(timeout, &self.slack, std::time::Instant::now())
    }
}
