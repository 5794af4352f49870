// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP binding.
//!
//! One listening socket per online service, one stream per link. The
//! handshake is a single `Hello` from the client answered by `Welcome` or
//! `Reject { code }` once the service accepts or refuses it.
//!
//! ```text
//! client                          service
//!   | ---- Hello{usage, path} ---->  |  acceptor thread: capability check
//!   |                                |  queued until accept_client
//!   | <--- Welcome / Reject{code} -- |
//!   | <========= frames =========>   |  one reader thread per end
//! ```

mod binding;
pub mod frame_codec;

pub(crate) use binding::TcpBinding;
pub use frame_codec::FrameCodec;

use super::frame::Frame;
use crate::config::TcpConfig;
use crate::error::{Error, Result};
use crate::options::Deadline;
use socket2::{Domain, Socket, Type};
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Read slice used while waiting for a handshake frame.
const HANDSHAKE_TICK: Duration = Duration::from_millis(20);

/// Bind a non-blocking listener; `AddrInUse` becomes `PortInUse`.
pub(crate) fn bind_listener(host: &str, port: u16, cfg: &TcpConfig) -> Result<TcpListener> {
    let addr = resolve(host, port)?;
    let socket = Socket::new(
        Domain::for_address(addr),
        Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(|e| Error::from_io(&e))?;
    #[cfg(unix)]
    socket
        .set_reuse_address(true)
        .map_err(|e| Error::from_io(&e))?;
    socket.bind(&addr.into()).map_err(|e| {
        log::debug!("[IOC] tcp: bind {} failed: {}", addr, e);
        Error::from_io(&e)
    })?;
    socket
        .listen(cfg.listen_backlog)
        .map_err(|e| Error::from_io(&e))?;

    let listener: TcpListener = socket.into();
    listener
        .set_nonblocking(true)
        .map_err(|e| Error::from_io(&e))?;
    Ok(listener)
}

/// Connect to `host:port` within the connect timeout.
pub(crate) fn connect(host: &str, port: u16, cfg: &TcpConfig, deadline: Deadline) -> Result<TcpStream> {
    let addr = resolve(host, port)?;
    let timeout = match deadline {
        Deadline::At(_) => deadline.slice(cfg.connect_timeout),
        Deadline::Immediate | Deadline::Never => cfg.connect_timeout,
    };
    if timeout.is_zero() {
        return Err(Error::Timeout);
    }
    let socket = Socket::new(
        Domain::for_address(addr),
        Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(|e| Error::from_io(&e))?;
    #[cfg(target_vendor = "apple")]
    socket.set_nosigpipe(true).map_err(|e| Error::from_io(&e))?;
    socket.connect_timeout(&addr.into(), timeout).map_err(|e| {
        log::debug!("[IOC] tcp: connect {} failed: {}", addr, e);
        Error::from_io(&e)
    })?;
    let stream: TcpStream = socket.into();
    stream
        .set_nodelay(cfg.nodelay)
        .map_err(|e| Error::from_io(&e))?;
    Ok(stream)
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| {
            log::debug!("[IOC] tcp: cannot resolve {}:{}: {}", host, port, e);
            Error::NotExistService
        })?
        .next()
        .ok_or(Error::NotExistService)
}

/// Blocking write of one frame (handshake only).
pub(crate) fn write_frame(stream: &mut TcpStream, frame: &Frame) -> Result<()> {
    stream
        .write_all(&FrameCodec::encode(&frame.encode()))
        .map_err(|e| Error::from_io(&e))
}

/// Read one frame, giving up at `deadline` (handshake only).
pub(crate) fn read_frame(
    stream: &mut TcpStream,
    codec: &mut FrameCodec,
    deadline: Deadline,
) -> Result<Frame> {
    loop {
        let tick = deadline.slice(HANDSHAKE_TICK).max(Duration::from_millis(1));
        stream
            .set_read_timeout(Some(tick))
            .map_err(|e| Error::from_io(&e))?;
        match codec.decode(stream) {
            Ok(Some(body)) => {
                return Frame::decode(&body).map_err(|e| {
                    log::debug!("[IOC] tcp: bad handshake frame: {}", e);
                    Error::LinkBroken
                });
            }
            Ok(None) if deadline.expired() => return Err(Error::Timeout),
            Ok(None) => continue,
            Err(e) => return Err(Error::from_io(&e)),
        }
    }
}
