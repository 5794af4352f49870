// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport bindings.
//!
//! The link core only talks to a [`Transport`]: it hands over [`Frame`]s
//! and learns about inbound frames through
//! [`LinkRecord::on_frame`](crate::link::LinkRecord). Two bindings exist:
//!
//! - [`fifo`]: in-process, the peer link's `on_frame` is called directly
//! - [`tcp`]: length-prefixed frames over a socket, one reader thread per link
//!
//! A binding never interprets frames beyond encoding them.

pub mod fifo;
pub mod frame;
pub mod tcp;

pub use frame::Frame;

use crate::error::Error;
use crate::options::Deadline;
use std::fmt;
use std::io;

/// Which binding a service or link runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// In-process
    Fifo,
    /// TCP socket
    Tcp,
}

impl Protocol {
    /// URI scheme.
    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Fifo => "fifo",
            Protocol::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Why a transport is considered dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The peer sent a close frame or the stream hit EOF.
    PeerClosed,
    /// The peer link no longer exists.
    PeerGone,
    /// This side closed the transport.
    LocalClosed,
    /// Malformed frame received.
    Protocol,
    /// Socket error.
    Io(io::ErrorKind),
}

/// Outcome of a failed transport operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Transient: the peer cannot take more right now.
    WouldBlock,
    /// The peer refused the frame with this error (FIFO only).
    Rejected(Error),
    /// Permanent fault; the link must go Broken.
    Broken(FaultKind),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::WouldBlock,
            io::ErrorKind::UnexpectedEof => TransportError::Broken(FaultKind::PeerClosed),
            io::ErrorKind::InvalidData => TransportError::Broken(FaultKind::Protocol),
            kind => TransportError::Broken(FaultKind::Io(kind)),
        }
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::WouldBlock => Error::Timeout,
            TransportError::Rejected(e) => e,
            TransportError::Broken(_) => Error::LinkBroken,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::WouldBlock => write!(f, "transport would block"),
            TransportError::Rejected(e) => write!(f, "frame rejected by peer: {}", e),
            TransportError::Broken(kind) => write!(f, "transport broken: {:?}", kind),
        }
    }
}

/// Frame carrier bound to exactly one link.
pub trait Transport: Send + Sync {
    /// Hand one frame to the peer.
    ///
    /// `WouldBlock` must leave no partial state visible to the peer beyond
    /// what a later send or flush completes.
    fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Push out anything the binding buffered, until `deadline`.
    fn flush(&self, deadline: Deadline) -> Result<(), TransportError>;

    /// Stop the binding; later sends report `Broken(LocalClosed)`.
    fn close(&self);

    /// Binding kind.
    fn protocol(&self) -> Protocol;
}
