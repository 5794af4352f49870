// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Link state machine.
//!
//! ```text
//!      +-----------+
//!      | Undefined |
//!      +-----+-----+
//!            | activate (accept/connect handshake done)
//!            v
//!      +-----------+   acquire    +------------------+
//!      |   Ready   |------------->| Busy{ExecCmd,..} |
//!      |           |<-------------|                  |
//!      +-----+-----+   release    +--------+---------+
//!            |                             |
//!            | transport fault             | transport fault
//!            v                             v
//!      +-----------+                +-----------+
//!      |  Broken   |  (terminal)    |  Closed   |  (handle removed)
//!      +-----------+                +-----------+
//! ```
//!
//! The [`StateCell`] is the single serialization point for one link: every
//! sub-state change is a compare-and-set under its mutex, and waiters park
//! on its condition variable until the expected state comes back.

use crate::error::{Error, Result};
use crate::options::Deadline;
use crate::usage::Usage;
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Coarse link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkMainState {
    /// Created, handshake not finished
    Undefined,
    /// Idle, accepting operations
    Ready,
    /// One unit of work owns the link
    Busy,
    /// Transport fault detected (terminal)
    Broken,
}

/// Role-and-activity refinement of [`LinkMainState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkSubState {
    /// Undefined, Broken, or a scope without sub-states
    Default,
    EvtProducerReady,
    EvtConsumerReady,
    CmdInitiatorReady,
    CmdInitiatorBusyExecCmd,
    CmdExecutorReady,
    CmdExecutorBusyExecCmd,
    CmdExecutorBusyWaitCmd,
    DatSenderReady,
    DatSenderBusySendDat,
    DatReceiverReady,
    DatReceiverBusyRecvDat,
    DatReceiverBusyCbRecvDat,
}

impl LinkSubState {
    /// The Ready sub-state of a single-role usage.
    pub fn ready_for(usage: Usage) -> LinkSubState {
        match usage {
            Usage::EVT_PRODUCER => LinkSubState::EvtProducerReady,
            Usage::EVT_CONSUMER => LinkSubState::EvtConsumerReady,
            Usage::CMD_INITIATOR => LinkSubState::CmdInitiatorReady,
            Usage::CMD_EXECUTOR => LinkSubState::CmdExecutorReady,
            Usage::DAT_SENDER => LinkSubState::DatSenderReady,
            Usage::DAT_RECEIVER => LinkSubState::DatReceiverReady,
            _ => LinkSubState::Default,
        }
    }

    /// Main state implied by this sub-state (`Default` maps to `None`).
    pub fn main_state(self) -> Option<LinkMainState> {
        use LinkSubState::*;
        match self {
            Default => None,
            EvtProducerReady | EvtConsumerReady | CmdInitiatorReady | CmdExecutorReady
            | DatSenderReady | DatReceiverReady => Some(LinkMainState::Ready),
            CmdInitiatorBusyExecCmd
            | CmdExecutorBusyExecCmd
            | CmdExecutorBusyWaitCmd
            | DatSenderBusySendDat
            | DatReceiverBusyRecvDat
            | DatReceiverBusyCbRecvDat => Some(LinkMainState::Busy),
        }
    }

    /// The role this sub-state belongs to.
    pub fn role(self) -> Usage {
        use LinkSubState::*;
        match self {
            Default => Usage::NONE,
            EvtProducerReady => Usage::EVT_PRODUCER,
            EvtConsumerReady => Usage::EVT_CONSUMER,
            CmdInitiatorReady | CmdInitiatorBusyExecCmd => Usage::CMD_INITIATOR,
            CmdExecutorReady | CmdExecutorBusyExecCmd | CmdExecutorBusyWaitCmd => {
                Usage::CMD_EXECUTOR
            }
            DatSenderReady | DatSenderBusySendDat => Usage::DAT_SENDER,
            DatReceiverReady | DatReceiverBusyRecvDat | DatReceiverBusyCbRecvDat => {
                Usage::DAT_RECEIVER
            }
        }
    }
}

/// Main state plus sub-state, always consistent with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkState {
    pub main: LinkMainState,
    pub sub: LinkSubState,
}

impl LinkState {
    pub const UNDEFINED: LinkState = LinkState {
        main: LinkMainState::Undefined,
        sub: LinkSubState::Default,
    };

    pub const BROKEN: LinkState = LinkState {
        main: LinkMainState::Broken,
        sub: LinkSubState::Default,
    };

    /// Build the state a sub-state implies.
    pub fn of(sub: LinkSubState) -> LinkState {
        LinkState {
            main: sub.main_state().unwrap_or(LinkMainState::Undefined),
            sub,
        }
    }

    /// Ready state of a single-role usage.
    pub fn ready(usage: Usage) -> LinkState {
        Self::of(LinkSubState::ready_for(usage))
    }

    /// Check main/sub and role consistency.
    pub fn is_consistent_with(&self, usage: Usage) -> bool {
        match self.main {
            LinkMainState::Undefined | LinkMainState::Broken => self.sub == LinkSubState::Default,
            LinkMainState::Ready | LinkMainState::Busy => {
                self.sub.main_state() == Some(self.main) && self.sub.role() == usage
            }
        }
    }
}

struct Cell {
    state: LinkState,
    closed: bool,
}

/// Compare-and-set gate over one link's state.
pub struct StateCell {
    inner: Mutex<Cell>,
    changed: Condvar,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Cell {
                state: LinkState::UNDEFINED,
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Snapshot, never blocks beyond the short critical section.
    pub fn snapshot(&self) -> LinkState {
        self.inner.lock().state
    }

    /// Fail with the terminal error if the link is closed or broken.
    pub fn check_alive(&self) -> Result<()> {
        let cell = self.inner.lock();
        if cell.closed {
            Err(Error::NotExistLink)
        } else if cell.state.main == LinkMainState::Broken {
            Err(Error::LinkBroken)
        } else {
            Ok(())
        }
    }

    /// Atomic compare-and-set.
    pub fn transition(&self, expected: LinkState, next: LinkState) -> Result<()> {
        let mut cell = self.inner.lock();
        if cell.closed {
            return Err(Error::NotExistLink);
        }
        if cell.state != expected {
            return Err(Error::StateConflict);
        }
        cell.state = next;
        drop(cell);
        self.changed.notify_all();
        Ok(())
    }

    /// Compare-and-set, waiting for `expected` to come back until `deadline`.
    ///
    /// Lost races are retried here and never surface; only `NotExistLink`,
    /// `LinkBroken` and `Timeout` do.
    pub fn acquire(&self, expected: LinkState, next: LinkState, deadline: Deadline) -> Result<()> {
        let mut cell = self.inner.lock();
        loop {
            if cell.closed {
                return Err(Error::NotExistLink);
            }
            if cell.state.main == LinkMainState::Broken {
                return Err(Error::LinkBroken);
            }
            if cell.state == expected {
                cell.state = next;
                drop(cell);
                self.changed.notify_all();
                return Ok(());
            }
            match deadline {
                Deadline::Immediate => return Err(Error::Timeout),
                Deadline::Never => self.changed.wait(&mut cell),
                Deadline::At(at) => {
                    if self.changed.wait_until(&mut cell, at).timed_out() && cell.state != expected
                    {
                        return Err(Error::Timeout);
                    }
                }
            }
        }
    }

    /// Force the terminal Broken state. Returns false if already broken/closed.
    pub fn mark_broken(&self) -> bool {
        let mut cell = self.inner.lock();
        if cell.closed || cell.state.main == LinkMainState::Broken {
            return false;
        }
        cell.state = LinkState::BROKEN;
        drop(cell);
        self.changed.notify_all();
        true
    }

    /// Mark closed; every later operation sees `NotExistLink`.
    pub fn mark_closed(&self) -> bool {
        let mut cell = self.inner.lock();
        if cell.closed {
            return false;
        }
        cell.closed = true;
        drop(cell);
        self.changed.notify_all();
        true
    }

    /// Park until any state change or `slice` elapsed.
    pub fn wait_change(&self, slice: Duration) {
        let mut cell = self.inner.lock();
        if cell.closed || cell.state.main == LinkMainState::Broken {
            return;
        }
        let _ = self.changed.wait_for(&mut cell, slice);
    }

    /// Wake every waiter (used when data/queues change, not the state).
    pub fn notify(&self) {
        self.changed.notify_all();
    }
}

/// An immediate call that found the link Busy reports the operation's
/// "nothing right now" code; `Timeout` stays reserved for waits that ran out.
pub(crate) fn busy_error(err: Error, deadline: Deadline, immediate: Error) -> Error {
    if err == Error::Timeout && deadline.is_immediate() {
        immediate
    } else {
        err
    }
}

/// RAII Busy window: returns the link to Ready when dropped.
///
/// If the link went Broken or was closed in the meantime the release is a
/// no-op; the terminal state wins.
pub struct BusyGuard<'a> {
    cell: &'a StateCell,
    ready: LinkState,
    busy: LinkState,
    armed: bool,
}

impl<'a> BusyGuard<'a> {
    /// Enter `busy` from `ready`, waiting up to `deadline`.
    pub fn acquire(
        cell: &'a StateCell,
        ready: LinkSubState,
        busy: LinkSubState,
        deadline: Deadline,
    ) -> Result<Self> {
        let ready = LinkState::of(ready);
        let busy = LinkState::of(busy);
        cell.acquire(ready, busy, deadline)?;
        Ok(Self {
            cell,
            ready,
            busy,
            armed: true,
        })
    }

    /// Move to another Busy sub-state while keeping ownership.
    pub fn switch(&mut self, busy: LinkSubState) -> Result<()> {
        let next = LinkState::of(busy);
        self.cell.transition(self.busy, next)?;
        self.busy = next;
        Ok(())
    }

    /// Leave the link Busy past the guard's lifetime (released elsewhere).
    pub fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            // Conflict here means Broken/Closed won the race.
            let _ = self.cell.transition(self.busy, self.ready);
        }
    }
}
