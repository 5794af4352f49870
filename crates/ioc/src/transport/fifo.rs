// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process binding: frames go straight to the peer link.

use super::{FaultKind, Frame, Protocol, Transport, TransportError};
use crate::link::LinkRecord;
use crate::options::Deadline;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// One direction of a FIFO link pair.
///
/// Holds only a weak reference so the two ends of a pair never keep each
/// other alive.
pub(crate) struct FifoPipe {
    peer: Weak<LinkRecord>,
    closed: AtomicBool,
}

impl FifoPipe {
    pub(crate) fn new(peer: &Arc<LinkRecord>) -> Self {
        Self {
            peer: Arc::downgrade(peer),
            closed: AtomicBool::new(false),
        }
    }

    fn peer(&self) -> Result<Arc<LinkRecord>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Broken(FaultKind::LocalClosed));
        }
        self.peer
            .upgrade()
            .ok_or(TransportError::Broken(FaultKind::PeerGone))
    }
}

impl Transport for FifoPipe {
    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let peer = self.peer()?;
        peer.on_frame(frame)
    }

    fn flush(&self, _deadline: Deadline) -> Result<(), TransportError> {
        self.peer().map(|_| ())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn protocol(&self) -> Protocol {
        Protocol::Fifo
    }
}

/// Wire two fresh links to each other.
pub(crate) fn pair(a: &Arc<LinkRecord>, b: &Arc<LinkRecord>) -> crate::error::Result<()> {
    a.attach(Arc::new(FifoPipe::new(b)))?;
    b.attach(Arc::new(FifoPipe::new(a)))?;
    Ok(())
}
