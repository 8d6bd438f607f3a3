// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Deadlines and timer slack.

use core::time::Duration;
use std::time::Instant;

use kerrno::{KError, KResult};

const NANOS_PER_SEC: i64 = 1_000_000_000;
const MICROS_PER_SEC: i64 = 1_000_000;
const NANOS_PER_MICRO: i64 = 1_000;

/// Reference point wake instants are aligned against.
static EPOCH: spin::Lazy<Instant> = spin::Lazy::new(Instant::now);

/// How long a caller is willing to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Block until something is ready.
    Infinite,
    /// Wait at most this long. Zero polls once without blocking.
    After(Duration),
    /// Wait until this instant. Used to restart an interrupted call.
    At(Instant),
}

impl Timeout {
    /// Poll once and return.
    pub const IMMEDIATE: Self = Self::After(Duration::ZERO);

    /// `poll` convention: negative means infinite.
    pub fn from_millis(ms: i32) -> Self {
        match u64::try_from(ms) {
            Ok(ms) => Self::After(Duration::from_millis(ms)),
            Err(_) => Self::Infinite,
        }
    }

    /// `ppoll`/`pselect6` convention; fields must form a valid timespec.
    pub fn from_timespec(sec: i64, nsec: i64) -> KResult<Self> {
        if sec < 0 || !(0..NANOS_PER_SEC).contains(&nsec) {
            return Err(KError::InvalidInput);
        }
        Ok(Self::After(Duration::new(sec as u64, nsec as u32)))
    }

    /// `select` convention; excess microseconds carry into seconds.
    pub fn from_timeval(sec: i64, usec: i64) -> KResult<Self> {
        if sec < 0 || usec < 0 {
            return Err(KError::InvalidInput);
        }
        let sec = sec.saturating_add(usec / MICROS_PER_SEC);
        let nsec = (usec % MICROS_PER_SEC) * NANOS_PER_MICRO;
        Ok(Self::After(Duration::new(sec as u64, nsec as u32)))
    }

    /// Pins a relative timeout to an absolute instant so a retry waits for
    /// the remainder only.
    pub fn to_absolute(self, now: Instant) -> Self {
        match self {
            Self::After(d) => now.checked_add(d).map_or(Self::Infinite, Self::At),
            other => other,
        }
    }
}

/// Scheduling class of the waiting thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedClass {
    /// Always woken exactly on time.
    RealTime,
    /// Tolerates 0.1% of the wait as slack.
    #[default]
    Normal,
    /// Niced callers tolerate 0.5%.
    Background,
}

/// Slack estimator inputs for one caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlackPolicy {
    pub class: SchedClass,
    /// Floor for non-realtime callers.
    pub timer_slack: Duration,
    /// Ceiling for everyone.
    pub max_slack: Duration,
}

impl SlackPolicy {
    /// Slack to grant a wait that has `remaining` left.
    pub fn estimate(&self, remaining: Duration) -> Duration {
        let divisor = match self.class {
            SchedClass::RealTime => return Duration::ZERO,
            SchedClass::Normal => 1000,
            SchedClass::Background => 200,
        };
        (remaining / divisor)
            .min(self.max_slack)
            .max(self.timer_slack)
    }
}

/// When a multiplex call must give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Probe once and return.
    Immediate,
    /// No deadline.
    Never,
    /// Expire at `expires`; waking anywhere up to `expires + slack` is fine.
    At { expires: Instant, slack: Duration },
}

impl Deadline {
    /// Computes the deadline of a call starting at `now`.
    pub fn new(timeout: Timeout, policy: &SlackPolicy, now: Instant) -> Self {
        let expires = match timeout {
            Timeout::Infinite => return Self::Never,
            Timeout::After(d) if d.is_zero() => return Self::Immediate,
            Timeout::After(d) => match now.checked_add(d) {
                Some(expires) => expires,
                None => return Self::Never,
            },
            Timeout::At(expires) if expires <= now => return Self::Immediate,
            Timeout::At(expires) => expires,
        };
        Self::At {
            expires,
            slack: policy.estimate(expires - now),
        }
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::Immediate)
    }

    /// Whether the deadline has passed at `now`.
    pub fn expired(&self, now: Instant) -> bool {
        match *self {
            Self::Immediate => true,
            Self::Never => false,
            Self::At { expires, .. } => now >= expires,
        }
    }

    /// Time left at `now`; `None` without a deadline.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        match *self {
            Self::Immediate => Some(Duration::ZERO),
            Self::Never => None,
            Self::At { expires, .. } => Some(expires.saturating_duration_since(now)),
        }
    }

    /// The instant a sleeping caller should be woken, `None` for never.
    ///
    /// The expiry is rounded up to the largest power-of-two nanosecond
    /// granule that fits in the slack, so nearby deadlines share a wake
    /// instant. The result never exceeds `expires + slack`.
    pub(crate) fn wake_time(&self) -> Option<Instant> {
        match *self {
            Self::Immediate => Some(Instant::now()),
            Self::Never => None,
            Self::At { expires, slack } => Some(coalesce(expires, slack)),
        }
    }
}

fn coalesce(expires: Instant, slack: Duration) -> Instant {
    let slack_ns = u64::try_from(slack.as_nanos()).unwrap_or(u64::MAX);
    if slack_ns == 0 {
        return expires;
    }
    let granule = 1u64 << (u64::BITS - 1 - slack_ns.leading_zeros());
    let epoch = *EPOCH;
    let Ok(since) = u64::try_from(expires.saturating_duration_since(epoch).as_nanos()) else {
        return expires;
    };
    if since == 0 {
        return expires;
    }
    since
        .div_ceil(granule)
        .checked_mul(granule)
        .map_or(expires, |aligned| epoch + Duration::from_nanos(aligned))
}
