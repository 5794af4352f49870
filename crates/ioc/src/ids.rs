// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Opaque identifiers: links, services, events, commands.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle of one link.
///
/// [`LinkId::CONLES_AUTO`] is the reserved handle of the connectionless
/// event scope and is never allocated for a real link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub(crate) u64);

impl LinkId {
    /// Connectionless-mode auto link (process-wide event bus).
    pub const CONLES_AUTO: LinkId = LinkId(0);

    /// Raw value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// True for the connectionless auto link.
    pub fn is_conles(self) -> bool {
        self == Self::CONLES_AUTO
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_conles() {
            write!(f, "link#auto")
        } else {
            write!(f, "link#{}", self.0)
        }
    }
}

/// Handle of one online service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(pub(crate) u64);

impl ServiceId {
    /// Raw value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "srv#{}", self.0)
    }
}

/// Event identifier (application-defined).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EvtId(pub u64);

impl EvtId {
    /// Liveness probe.
    pub const KEEPALIVE: EvtId = EvtId(1);
    /// Generic "hello" test event.
    pub const HELLO: EvtId = EvtId(2);
    /// Move started.
    pub const MOVE_STARTED: EvtId = EvtId(0x1001);
    /// Move keeping.
    pub const MOVE_KEEPING: EvtId = EvtId(0x1002);
    /// Move stopped.
    pub const MOVE_STOPPED: EvtId = EvtId(0x1003);
}

/// Command identifier (application-defined).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CmdId(pub u64);

impl CmdId {
    /// Reply with "PONG".
    pub const PING: CmdId = CmdId(1);
    /// Reply with the input payload.
    pub const ECHO: CmdId = CmdId(2);
    /// Sleep for the input's milliseconds, then succeed.
    pub const DELAY: CmdId = CmdId(3);
}

/// Monotonic allocator; starts at 1 so 0 stays reserved.
#[derive(Debug)]
pub(crate) struct IdAllocator(AtomicU64);

impl IdAllocator {
    pub(crate) fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub(crate) fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}
