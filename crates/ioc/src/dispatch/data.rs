// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ordered byte streaming.
//!
//! The sender end keeps a bounded buffer of chunks and pumps it into the
//! transport on every call; the receiver end either hands each chunk to a
//! [`DataReceiver`] callback or buffers it for `recv_dat`.
//!
//! Byte order is preserved end to end; chunk boundaries are not.

use super::Mailbox;
use crate::config::POLL_INTERVAL;
use crate::error::{Error, Result};
use crate::ids::LinkId;
use crate::link::state::{busy_error, BusyGuard, LinkSubState};
use crate::link::LinkRecord;
use crate::options::{Deadline, Options, Timeout};
use crate::transport::{Frame, TransportError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

/// A run of stream bytes.
///
/// `len` bytes of `payload` are sent. A descriptor without payload is only
/// valid with `len == 0` (an accepted no-op).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatDesc {
    payload: Option<Vec<u8>>,
    len: usize,
}

impl DatDesc {
    pub fn new(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self {
            payload: Some(bytes),
            len,
        }
    }

    /// Raw constructor; validated when sent.
    pub fn from_parts(payload: Option<Vec<u8>>, len: usize) -> Self {
        Self { payload, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The bytes to send, or `InvalidParam` for an inconsistent descriptor.
    pub fn bytes(&self) -> Result<&[u8]> {
        match &self.payload {
            None if self.len == 0 => Ok(&[]),
            None => Err(Error::InvalidParam),
            Some(p) => p.get(..self.len).ok_or(Error::InvalidParam),
        }
    }
}

/// Callback receiving stream chunks in order.
pub trait DataReceiver: Send + Sync {
    fn on_data(&self, link: LinkId, data: &DatDesc) -> Result<()>;
}

impl<F> DataReceiver for F
where
    F: Fn(LinkId, &DatDesc) -> Result<()> + Send + Sync,
{
    fn on_data(&self, link: LinkId, data: &DatDesc) -> Result<()> {
        self(link, data)
    }
}

struct SendBuffer {
    chunks: VecDeque<Vec<u8>>,
    bytes: usize,
}

/// Sender end of a data link.
pub(crate) struct SenderSide {
    buf: Mutex<SendBuffer>,
    capacity: usize,
    chunk: usize,
}

impl SenderSide {
    pub(crate) fn new(capacity: usize, chunk: usize) -> Self {
        Self {
            buf: Mutex::new(SendBuffer {
                chunks: VecDeque::new(),
                bytes: 0,
            }),
            capacity,
            chunk: chunk.max(1),
        }
    }

    pub(crate) fn buffered(&self) -> usize {
        self.buf.lock().bytes
    }

    pub(crate) fn send(&self, link: &LinkRecord, desc: &DatDesc, opts: Options) -> Result<()> {
        let data = desc.bytes()?;
        let deadline = opts
            .timeout_or(Timeout::After(link.config().default_timeout))
            .deadline();
        let _busy = BusyGuard::acquire(
            link.state(),
            LinkSubState::DatSenderReady,
            LinkSubState::DatSenderBusySendDat,
            deadline,
        )
        .map_err(|e| busy_error(e, deadline, Error::BufferFull))?;
        if data.is_empty() {
            return Ok(());
        }

        let mut rest = data;
        loop {
            self.pump(link)?;
            {
                let mut buf = self.buf.lock();
                let free = self.capacity - buf.bytes;
                if deadline.is_immediate() && rest.len() > free {
                    return Err(Error::BufferFull);
                }
                let take = rest.len().min(free);
                for piece in rest[..take].chunks(self.chunk) {
                    buf.chunks.push_back(piece.to_vec());
                }
                buf.bytes += take;
                rest = &rest[take..];
            }
            self.pump(link)?;
            if rest.is_empty() {
                return Ok(());
            }
            if deadline.expired() {
                log::debug!(
                    "[IOC] data: {} send timed out with {} bytes unbuffered",
                    link.id(),
                    rest.len()
                );
                return Err(Error::Timeout);
            }
            link.state().wait_change(deadline.slice(POLL_INTERVAL));
        }
    }

    pub(crate) fn flush(&self, link: &LinkRecord, opts: Options) -> Result<()> {
        let deadline = opts
            .timeout_or(Timeout::After(link.config().default_timeout))
            .deadline();
        let _busy = BusyGuard::acquire(
            link.state(),
            LinkSubState::DatSenderReady,
            LinkSubState::DatSenderBusySendDat,
            deadline,
        )
        .map_err(|e| busy_error(e, deadline, Error::BufferFull))?;

        loop {
            self.pump(link)?;
            if self.buffered() == 0 {
                return link.flush_transport(deadline).map_err(|e| match e {
                    TransportError::WouldBlock if deadline.is_immediate() => Error::BufferFull,
                    other => other.into(),
                });
            }
            if deadline.is_immediate() {
                return Err(Error::BufferFull);
            }
            if deadline.expired() {
                return Err(Error::Timeout);
            }
            link.state().wait_change(deadline.slice(POLL_INTERVAL));
        }
    }

    /// Move buffered chunks into the transport until it pushes back.
    fn pump(&self, link: &LinkRecord) -> Result<()> {
        link.state().check_alive()?;
        let mut buf = self.buf.lock();
        while let Some(front) = buf.chunks.front() {
            let bytes = front.clone();
            let n = bytes.len();
            match link.send_frame(Frame::Data { bytes }) {
                Ok(()) => {
                    buf.chunks.pop_front();
                    buf.bytes -= n;
                }
                // Not taken; retried on the next pump.
                Err(TransportError::WouldBlock) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

struct RecvQueue {
    chunks: VecDeque<Vec<u8>>,
    bytes: usize,
    closed: bool,
}

/// Receiver end of a data link.
pub(crate) struct ReceiverSide {
    receiver: Option<Arc<dyn DataReceiver>>,
    mailbox: Option<Arc<Mailbox>>,
    queue: Mutex<RecvQueue>,
    ready: Condvar,
    capacity: usize,
}

impl ReceiverSide {
    pub(crate) fn new(
        receiver: Option<Arc<dyn DataReceiver>>,
        mailbox: Option<Arc<Mailbox>>,
        capacity: usize,
    ) -> Self {
        Self {
            receiver,
            mailbox,
            queue: Mutex::new(RecvQueue {
                chunks: VecDeque::new(),
                bytes: 0,
                closed: false,
            }),
            ready: Condvar::new(),
            capacity,
        }
    }

    pub(crate) fn buffered(&self) -> usize {
        self.queue.lock().bytes
    }

    /// Inbound `Data` frame; `WouldBlock` asks the transport to retry.
    pub(crate) fn on_data(
        &self,
        link: &Arc<LinkRecord>,
        bytes: Vec<u8>,
    ) -> std::result::Result<(), TransportError> {
        if bytes.is_empty() {
            return Ok(());
        }
        if let (Some(receiver), Some(mailbox)) = (&self.receiver, &self.mailbox) {
            if !mailbox.reserve() {
                return Err(TransportError::WouldBlock);
            }
            let weak = Arc::downgrade(link);
            let receiver = Arc::clone(receiver);
            mailbox.push_reserved(Box::new(move || {
                if let Some(link) = weak.upgrade() {
                    deliver(&link, receiver.as_ref(), DatDesc::new(bytes));
                }
            }));
            return Ok(());
        }

        let mut queue = self.queue.lock();
        if queue.bytes + bytes.len() > self.capacity {
            return Err(TransportError::WouldBlock);
        }
        queue.bytes += bytes.len();
        queue.chunks.push_back(bytes);
        drop(queue);
        self.ready.notify_all();
        Ok(())
    }

    /// Copy buffered bytes into `out`.
    ///
    /// Bytes already buffered are still handed out after the link broke;
    /// `LinkBroken` is reported once they are drained.
    pub(crate) fn recv(&self, link: &LinkRecord, out: &mut [u8], opts: Options) -> Result<usize> {
        if self.receiver.is_some() {
            return Err(Error::NotSupported);
        }
        if out.is_empty() {
            return Err(Error::InvalidParam);
        }
        let deadline = opts
            .timeout_or(Timeout::After(link.config().default_timeout))
            .deadline();
        let _busy = match link.state().check_alive() {
            Ok(()) => Some(
                BusyGuard::acquire(
                    link.state(),
                    LinkSubState::DatReceiverReady,
                    LinkSubState::DatReceiverBusyRecvDat,
                    deadline,
                )
                .map_err(|e| busy_error(e, deadline, Error::NoData))?,
            ),
            Err(Error::LinkBroken) => None,
            Err(e) => return Err(e),
        };

        let mut queue = self.queue.lock();
        loop {
            if queue.bytes > 0 {
                return Ok(drain_into(&mut queue, out));
            }
            if queue.closed {
                return Err(Error::LinkBroken);
            }
            match deadline {
                Deadline::Immediate => return Err(Error::NoData),
                Deadline::Never => self.ready.wait(&mut queue),
                Deadline::At(at) => {
                    if self.ready.wait_until(&mut queue, at).timed_out() && queue.bytes == 0 {
                        return Err(if queue.closed {
                            Error::LinkBroken
                        } else {
                            Error::Timeout
                        });
                    }
                }
            }
        }
    }

    /// Wake pollers; the stream has no more bytes coming.
    pub(crate) fn close(&self) {
        self.queue.lock().closed = true;
        self.ready.notify_all();
    }
}

fn drain_into(queue: &mut RecvQueue, out: &mut [u8]) -> usize {
    let mut copied = 0;
    while copied < out.len() {
        let Some(front) = queue.chunks.front_mut() else {
            break;
        };
        let n = front.len().min(out.len() - copied);
        out[copied..copied + n].copy_from_slice(&front[..n]);
        copied += n;
        if n == front.len() {
            queue.chunks.pop_front();
        } else {
            front.drain(..n);
        }
    }
    queue.bytes -= copied;
    copied
}

fn deliver(link: &LinkRecord, receiver: &dyn DataReceiver, data: DatDesc) {
    let _busy = match BusyGuard::acquire(
        link.state(),
        LinkSubState::DatReceiverReady,
        LinkSubState::DatReceiverBusyCbRecvDat,
        Deadline::Never,
    ) {
        Ok(guard) => guard,
        Err(e) => {
            log::debug!("[IOC] data: {} chunk dropped: {}", link.id(), e);
            return;
        }
    };
    if let Err(e) = receiver.on_data(link.id(), &data) {
        log::debug!("[IOC] data: {} receiver returned {}", link.id(), e);
    }
}
