// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Established TCP link: buffered writer plus a reader thread.

use super::frame_codec::FrameCodec;
use crate::config::{TcpConfig, POLL_INTERVAL};
use crate::error::Error;
use crate::link::LinkRecord;
use crate::options::Deadline;
use crate::transport::{FaultKind, Frame, Protocol, Transport, TransportError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Reader wake-up to flush queued writes and observe shutdown.
const READ_TICK: Duration = Duration::from_millis(20);

struct Writer {
    stream: TcpStream,
    queue: VecDeque<Vec<u8>>,
    /// Partially written frame and the offset reached
    pending: Option<(Vec<u8>, usize)>,
    queued_bytes: usize,
}

impl Writer {
    /// Write queued frames until done (`true`) or the socket stalls (`false`).
    fn drain(&mut self) -> io::Result<bool> {
        loop {
            if let Some((buf, mut offset)) = self.pending.take() {
                while offset < buf.len() {
                    match self.stream.write(&buf[offset..]) {
                        Ok(0) => {
                            return Err(io::Error::new(
                                io::ErrorKind::WriteZero,
                                "connection closed",
                            ));
                        }
                        Ok(n) => offset += n,
                        Err(e)
                            if matches!(
                                e.kind(),
                                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                            ) =>
                        {
                            self.pending = Some((buf, offset));
                            return Ok(false);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }
                self.queued_bytes = self.queued_bytes.saturating_sub(buf.len());
            }
            match self.queue.pop_front() {
                Some(frame) => self.pending = Some((frame, 0)),
                None => return Ok(true),
            }
        }
    }
}

/// Transport over one TCP stream.
pub(crate) struct TcpBinding {
    writer: Mutex<Writer>,
    control: TcpStream,
    peer: SocketAddr,
    shutdown: AtomicBool,
    max_queued: usize,
    max_message: usize,
}

impl TcpBinding {
    /// Wrap a connected stream; `max_queued` bounds buffered data bytes.
    pub(crate) fn new(stream: TcpStream, cfg: &TcpConfig, max_queued: usize) -> io::Result<Arc<Self>> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(cfg.nodelay)?;
        stream.set_write_timeout(Some(cfg.write_timeout))?;
        let peer = stream.peer_addr()?;
        let control = stream.try_clone()?;
        Ok(Arc::new(Self {
            writer: Mutex::new(Writer {
                stream,
                queue: VecDeque::new(),
                pending: None,
                queued_bytes: 0,
            }),
            control,
            peer,
            shutdown: AtomicBool::new(false),
            max_queued,
            max_message: cfg.max_message_size,
        }))
    }

    pub(crate) fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn drain(&self) -> Result<bool, TransportError> {
        self.writer.lock().drain().map_err(TransportError::from)
    }

    /// Start the reader thread feeding `link`.
    pub(crate) fn spawn_reader(self: &Arc<Self>, link: Weak<LinkRecord>) -> io::Result<JoinHandle<()>> {
        let stream = self.control.try_clone()?;
        stream.set_read_timeout(Some(READ_TICK))?;
        let binding = Arc::clone(self);
        let name = match link.upgrade() {
            Some(l) => format!("ioc-tcp-{}", l.id().as_u64()),
            None => "ioc-tcp".to_string(),
        };
        thread::Builder::new()
            .name(name)
            .spawn(move || binding.reader_loop(stream, link))
    }

    fn reader_loop(&self, mut stream: TcpStream, link: Weak<LinkRecord>) {
        let mut codec = FrameCodec::new(self.max_message);
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            match codec.decode(&mut stream) {
                Ok(Some(body)) => {
                    let frame = match Frame::decode(&body) {
                        Ok(frame) => frame,
                        Err(e) => {
                            log::warn!("[IOC] tcp: {} sent a malformed frame: {}", self.peer, e);
                            self.fail(&link, FaultKind::Protocol);
                            break;
                        }
                    };
                    if !self.deliver(&link, frame) {
                        break;
                    }
                }
                Ok(None) => {
                    if let Err(TransportError::Broken(kind)) = self.drain() {
                        self.fail(&link, kind);
                        break;
                    }
                }
                Err(e) => {
                    if !self.shutdown.load(Ordering::Acquire) {
                        log::debug!("[IOC] tcp: {} read ended: {}", self.peer, e);
                        let kind = match TransportError::from(e) {
                            TransportError::Broken(kind) => kind,
                            _ => FaultKind::PeerClosed,
                        };
                        self.fail(&link, kind);
                    }
                    break;
                }
            }
        }
        log::debug!("[IOC] tcp: reader for {} stopped", self.peer);
    }

    /// Hand one frame to the link, retrying while its receiver is full.
    fn deliver(&self, link: &Weak<LinkRecord>, frame: Frame) -> bool {
        loop {
            let Some(record) = link.upgrade() else {
                return false;
            };
            match record.on_frame(frame.clone()) {
                Ok(()) => return true,
                Err(TransportError::WouldBlock) => {
                    drop(record);
                    if self.shutdown.load(Ordering::Acquire) {
                        return false;
                    }
                    let _ = self.drain();
                    thread::sleep(POLL_INTERVAL);
                }
                Err(TransportError::Rejected(e)) => {
                    log::debug!(
                        "[IOC] tcp: {} frame from {} dropped: {}",
                        frame.kind_name(),
                        self.peer,
                        e
                    );
                    return true;
                }
                Err(TransportError::Broken(_)) => return false,
            }
        }
    }

    fn fail(&self, link: &Weak<LinkRecord>, kind: FaultKind) {
        if let Some(record) = link.upgrade() {
            record.mark_broken(kind);
        }
    }
}

impl Transport for TcpBinding {
    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(TransportError::Broken(FaultKind::LocalClosed));
        }
        let is_data = matches!(frame, Frame::Data { .. });
        let body = frame.encode();
        // The peer's reader would drop the connection on it.
        if body.len() > self.max_message {
            log::debug!(
                "[IOC] tcp: {} frame of {} bytes exceeds {} for {}",
                frame.kind_name(),
                body.len(),
                self.max_message,
                self.peer
            );
            return Err(TransportError::Rejected(Error::InvalidParam));
        }
        let bytes = FrameCodec::encode(&body);

        let mut writer = self.writer.lock();
        if is_data && writer.queued_bytes >= self.max_queued {
            writer.drain()?;
            if writer.queued_bytes >= self.max_queued {
                return Err(TransportError::WouldBlock);
            }
        }
        writer.queued_bytes += bytes.len();
        writer.queue.push_back(bytes);
        writer.drain()?;
        Ok(())
    }

    fn flush(&self, deadline: Deadline) -> Result<(), TransportError> {
        loop {
            if self.drain()? {
                let _ = self.writer.lock().stream.flush();
                return Ok(());
            }
            if deadline.expired() {
                return Err(TransportError::WouldBlock);
            }
            thread::sleep(deadline.slice(POLL_INTERVAL));
        }
    }

    fn close(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        // Best effort: push out the close frame queued just before.
        let _ = self.drain();
        let _ = self.control.shutdown(Shutdown::Both);
    }

    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }
}
