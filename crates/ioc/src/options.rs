// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-call options: timeout and delivery mode.
//!
//! Every blocking operation takes an [`Options`]. A [`Timeout::Immediate`]
//! call never waits and reports "nothing there right now" with its own code
//! (`NoEventPending`, `NoData`, `NoCmdPending`, `BufferFull`); a call that
//! actually waited and saw nothing reports [`Error::Timeout`](crate::Error).

use std::time::{Duration, Instant};

/// How long a blocking operation may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Do not wait at all (non-blocking).
    Immediate,
    /// Wait at most this long.
    After(Duration),
    /// Wait forever.
    Infinite,
}

impl Timeout {
    /// Resolve into an absolute deadline starting now.
    pub fn deadline(self) -> Deadline {
        match self {
            Timeout::Immediate => Deadline::Immediate,
            Timeout::After(d) if d.is_zero() => Deadline::Immediate,
            Timeout::After(d) => match Instant::now().checked_add(d) {
                Some(at) => Deadline::At(at),
                None => Deadline::Never,
            },
            Timeout::Infinite => Deadline::Never,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::After(d)
    }
}

/// Absolute deadline derived from a [`Timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Non-blocking; treat as already expired but distinguishable.
    Immediate,
    /// Expires at this instant.
    At(Instant),
    /// Never expires.
    Never,
}

impl Deadline {
    /// True for non-blocking calls.
    pub fn is_immediate(self) -> bool {
        matches!(self, Deadline::Immediate)
    }

    /// Time left, `None` when unbounded. Zero once expired.
    pub fn remaining(self) -> Option<Duration> {
        match self {
            Deadline::Immediate => Some(Duration::ZERO),
            Deadline::At(at) => Some(at.saturating_duration_since(Instant::now())),
            Deadline::Never => None,
        }
    }

    /// True once the deadline has passed (always true for `Immediate`).
    pub fn expired(self) -> bool {
        match self {
            Deadline::Immediate => true,
            Deadline::At(at) => Instant::now() >= at,
            Deadline::Never => false,
        }
    }

    /// Remaining time capped to `slice`, for poll loops.
    pub fn slice(self, slice: Duration) -> Duration {
        self.remaining().map_or(slice, |left| left.min(slice))
    }

    /// Remaining milliseconds for frames (`u64::MAX` = never).
    pub(crate) fn to_wire_ms(self) -> u64 {
        match self.remaining() {
            None => WIRE_NEVER,
            Some(left) => u64::try_from(left.as_millis()).unwrap_or(WIRE_NEVER - 1),
        }
    }

    /// Inverse of [`Deadline::to_wire_ms`], relative to now.
    pub(crate) fn from_wire_ms(ms: u64) -> Deadline {
        match ms {
            WIRE_NEVER => Deadline::Never,
            ms => Timeout::After(Duration::from_millis(ms)).deadline(),
        }
    }
}

const WIRE_NEVER: u64 = u64::MAX;

/// Options accepted by blocking IOC operations.
///
/// ```
/// use ioc::{Options, Timeout};
/// use std::time::Duration;
///
/// let opts = Options::with_timeout(Duration::from_millis(50)).sync();
/// assert_eq!(opts.timeout, Some(Timeout::After(Duration::from_millis(50))));
/// assert!(opts.sync);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    /// Timeout; `None` uses the operation default (descriptor or config).
    pub timeout: Option<Timeout>,
    /// Synchronous delivery (events): block until the consumer returned.
    pub sync: bool,
}

impl Options {
    /// Options with defaults (async, default timeout).
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking options.
    pub fn immediate() -> Self {
        Self {
            timeout: Some(Timeout::Immediate),
            sync: false,
        }
    }

    /// Alias for [`Options::immediate`].
    pub fn non_blocking() -> Self {
        Self::immediate()
    }

    /// Options waiting at most `d`.
    pub fn with_timeout(d: Duration) -> Self {
        Self {
            timeout: Some(Timeout::After(d)),
            sync: false,
        }
    }

    /// Builder: wait forever
    pub fn infinite(mut self) -> Self {
        self.timeout = Some(Timeout::Infinite);
        self
    }

    /// Builder: synchronous delivery
    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }

    /// Resolve the timeout, falling back to `default`.
    pub fn timeout_or(&self, default: Timeout) -> Timeout {
        self.timeout.unwrap_or(default)
    }
}
