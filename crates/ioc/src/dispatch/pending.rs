// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sequence-keyed reply slots (command replies, sync event acks).
//!
//! A caller registers a sequence number before sending its request and then
//! waits on the returned receiver. Replies for sequence numbers nobody waits
//! for any more (timed out) are dropped.

use crate::error::{Error, Result};
use crate::options::Deadline;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::collections::HashMap;

pub(crate) struct PendingReplies<T> {
    slots: Mutex<HashMap<u64, Sender<T>>>,
}

impl<T> Default for PendingReplies<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> PendingReplies<T> {
    /// Open a slot for `seq`.
    pub(crate) fn register(&self, seq: u64) -> Receiver<T> {
        let (tx, rx) = channel::bounded(1);
        self.slots.lock().insert(seq, tx);
        rx
    }

    /// Deliver a reply. Returns false when nobody waits for `seq`.
    pub(crate) fn complete(&self, seq: u64, value: T) -> bool {
        let Some(tx) = self.slots.lock().remove(&seq) else {
            return false;
        };
        tx.send(value).is_ok()
    }

    /// Forget a slot (caller gave up).
    pub(crate) fn cancel(&self, seq: u64) {
        self.slots.lock().remove(&seq);
    }

    /// Drop every slot; waiters observe a disconnect.
    pub(crate) fn fail_all(&self) {
        self.slots.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Wait for a registered reply until `deadline`.
///
/// A disconnected slot means the link failed while waiting.
pub(crate) fn wait_reply<T>(rx: &Receiver<T>, deadline: Deadline) -> Result<T> {
    match deadline {
        Deadline::Immediate => match rx.try_recv() {
            Ok(v) => Ok(v),
            Err(TryRecvError::Empty) => Err(Error::Timeout),
            Err(TryRecvError::Disconnected) => Err(Error::LinkBroken),
        },
        Deadline::Never => rx.recv().map_err(|_| Error::LinkBroken),
        Deadline::At(at) => match rx.recv_deadline(at) {
            Ok(v) => Ok(v),
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(Error::LinkBroken),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Timeout;
    use std::time::Duration;

    #[test]
    fn reply_reaches_waiter() {
        let pending = PendingReplies::<i32>::default();
        let rx = pending.register(7);
        assert!(pending.complete(7, 42));
        assert_eq!(wait_reply(&rx, Deadline::Never), Ok(42));
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn late_reply_is_dropped() {
        let pending = PendingReplies::<i32>::default();
        let rx = pending.register(1);
        let res = wait_reply(&rx, Timeout::After(Duration::from_millis(5)).deadline());
        assert_eq!(res, Err(Error::Timeout));
        pending.cancel(1);
        assert!(!pending.complete(1, 5));
    }

    #[test]
    fn fail_all_disconnects_waiters() {
        let pending = PendingReplies::<i32>::default();
        let rx = pending.register(3);
        pending.fail_all();
        assert_eq!(wait_reply(&rx, Deadline::Never), Err(Error::LinkBroken));
    }
}
