// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Link usages (roles) and capability sets.
//!
//! A service declares a [`Usage`] set of capabilities. A client connects
//! with exactly one usage; the service end of the resulting link carries the
//! complementary usage.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bit set over the six link roles.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Usage(u8);

impl Usage {
    /// Empty set
    pub const NONE: Usage = Usage(0);
    /// Posts events
    pub const EVT_PRODUCER: Usage = Usage(1 << 0);
    /// Subscribes to events
    pub const EVT_CONSUMER: Usage = Usage(1 << 1);
    /// Calls `exec_cmd`
    pub const CMD_INITIATOR: Usage = Usage(1 << 2);
    /// Executes commands
    pub const CMD_EXECUTOR: Usage = Usage(1 << 3);
    /// Sends data
    pub const DAT_SENDER: Usage = Usage(1 << 4);
    /// Receives data
    pub const DAT_RECEIVER: Usage = Usage(1 << 5);

    const ALL_BITS: u8 = 0b0011_1111;

    /// Raw bits (wire encoding).
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Rebuild from raw bits, `None` if unknown bits are set.
    pub fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::ALL_BITS == 0 {
            Some(Usage(bits))
        } else {
            None
        }
    }

    /// True for the empty set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when exactly one role is set.
    pub fn is_single(self) -> bool {
        self.0.count_ones() == 1
    }

    /// True when every role of `other` is in `self`.
    pub fn contains(self, other: Usage) -> bool {
        !other.is_empty() && self.0 & other.0 == other.0
    }

    /// The role the other end of a link carries.
    ///
    /// Only meaningful for single roles; sets map role by role.
    pub fn complement(self) -> Usage {
        let mut out = 0u8;
        for (a, b) in [
            (Self::EVT_PRODUCER, Self::EVT_CONSUMER),
            (Self::CMD_INITIATOR, Self::CMD_EXECUTOR),
            (Self::DAT_SENDER, Self::DAT_RECEIVER),
        ] {
            if self.0 & a.0 != 0 {
                out |= b.0;
            }
            if self.0 & b.0 != 0 {
                out |= a.0;
            }
        }
        Usage(out)
    }

    /// Single roles contained in this set, in declaration order.
    pub fn roles(self) -> impl Iterator<Item = Usage> {
        (0..6)
            .map(|bit| Usage(1 << bit))
            .filter(move |role| self.0 & role.0 != 0)
    }

    fn name(self) -> &'static str {
        match self {
            Self::EVT_PRODUCER => "EvtProducer",
            Self::EVT_CONSUMER => "EvtConsumer",
            Self::CMD_INITIATOR => "CmdInitiator",
            Self::CMD_EXECUTOR => "CmdExecutor",
            Self::DAT_SENDER => "DatSender",
            Self::DAT_RECEIVER => "DatReceiver",
            _ => "?",
        }
    }
}

impl BitOr for Usage {
    type Output = Usage;

    fn bitor(self, rhs: Usage) -> Usage {
        Usage(self.0 | rhs.0)
    }
}

impl BitOrAssign for Usage {
    fn bitor_assign(&mut self, rhs: Usage) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "Usage(None)");
        }
        let names: Vec<&str> = self.roles().map(Usage::name).collect();
        write!(f, "Usage({})", names.join("|"))
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
