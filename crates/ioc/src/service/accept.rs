// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection admission.
//!
//! Clients queue a [`PendingConn`] on the service; `accept_client` (or the
//! auto-accept thread) turns it into a link pair. FIFO clients wait on a
//! [`FifoRendezvous`]; TCP clients wait for `Welcome` on their socket.

use super::ServiceRecord;
use crate::config::IocConfig;
use crate::context::Context;
use crate::error::{Error, Limit, Result};
use crate::ids::LinkId;
use crate::link::{LinkRecord, UsageArgs};
use crate::options::{Deadline, Timeout};
use crate::transport::tcp::{self, FrameCodec, TcpBinding};
use crate::transport::{fifo, Frame, Protocol};
use crate::usage::Usage;
use parking_lot::{Condvar, Mutex};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Wake-up period of blocking accept loops.
pub(crate) const ACCEPT_TICK: Duration = Duration::from_millis(100);

/// Listener poll interval when no client is knocking.
const LISTEN_IDLE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rendezvous {
    Waiting,
    Accepted(LinkId),
    Rejected(Error),
    Abandoned,
}

/// Meeting point of a FIFO client and the accepting side.
pub(crate) struct FifoRendezvous {
    slot: Mutex<Rendezvous>,
    settled: Condvar,
}

impl FifoRendezvous {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Rendezvous::Waiting),
            settled: Condvar::new(),
        })
    }

    pub(crate) fn reject(&self, err: Error) {
        let mut slot = self.slot.lock();
        if *slot == Rendezvous::Waiting {
            *slot = Rendezvous::Rejected(err);
            self.settled.notify_all();
        }
    }

    /// Client side: wait for the outcome; on timeout the request is abandoned.
    pub(crate) fn wait(&self, deadline: Deadline) -> Result<LinkId> {
        let mut slot = self.slot.lock();
        loop {
            match *slot {
                Rendezvous::Accepted(id) => return Ok(id),
                Rendezvous::Rejected(e) => return Err(e),
                Rendezvous::Abandoned => return Err(Error::Timeout),
                Rendezvous::Waiting => {}
            }
            let timed_out = match deadline {
                Deadline::Immediate => true,
                Deadline::Never => {
                    self.settled.wait(&mut slot);
                    false
                }
                Deadline::At(at) => self.settled.wait_until(&mut slot, at).timed_out(),
            };
            if timed_out && *slot == Rendezvous::Waiting {
                *slot = Rendezvous::Abandoned;
                return Err(Error::Timeout);
            }
        }
    }
}

/// A client waiting in the service's accept queue.
pub(crate) enum PendingConn {
    Fifo {
        client: Arc<LinkRecord>,
        rendezvous: Arc<FifoRendezvous>,
    },
    Tcp {
        stream: TcpStream,
        usage: Usage,
        peer: SocketAddr,
    },
}

impl PendingConn {
    /// Refuse the client (service going offline, limits hit).
    pub(crate) fn reject(self, err: Error) {
        match self {
            PendingConn::Fifo { rendezvous, .. } => rendezvous.reject(err),
            PendingConn::Tcp {
                mut stream, peer, ..
            } => {
                if let Err(e) = tcp::write_frame(&mut stream, &Frame::Reject { code: err.code() }) {
                    log::debug!("[IOC] accept: reject to {} not sent: {}", peer, e);
                }
            }
        }
    }
}

/// Turn one pending connection into a service-side link.
///
/// Returns `Ok(None)` when a FIFO client gave up before being accepted.
pub(crate) fn admit(ctx: &Context, svc: &ServiceRecord, conn: PendingConn) -> Result<Option<LinkId>> {
    let config = ctx.config();
    match conn {
        PendingConn::Fifo { client, rendezvous } => {
            let mut slot = rendezvous.slot.lock();
            if *slot != Rendezvous::Waiting {
                log::debug!("[IOC] accept: {} gave up before accept", client.id());
                return Ok(None);
            }
            match admit_fifo(ctx, svc, &client, config) {
                Ok(id) => {
                    *slot = Rendezvous::Accepted(client.id());
                    rendezvous.settled.notify_all();
                    Ok(Some(id))
                }
                Err(e) => {
                    *slot = Rendezvous::Rejected(e);
                    rendezvous.settled.notify_all();
                    Err(e)
                }
            }
        }
        PendingConn::Tcp {
            mut stream,
            usage,
            peer,
        } => {
            let id = match ctx.links().allocate(config.max_links, 1) {
                Ok(ids) => ids[0],
                Err(e) => {
                    if let Err(io_err) = tcp::write_frame(&mut stream, &Frame::Reject { code: e.code() }) {
                        log::debug!("[IOC] accept: reject to {} not sent: {}", peer, io_err);
                    }
                    return Err(e);
                }
            };
            tcp::write_frame(&mut stream, &Frame::Welcome).map_err(|e| {
                log::debug!("[IOC] accept: {} left before welcome", peer);
                e
            })?;
            let link = LinkRecord::new(
                id,
                usage.complement(),
                Protocol::Tcp,
                svc.usage_args(),
                ctx.pool(),
                Arc::clone(&config),
            )?;
            link.set_owner(Some(svc.id()));
            bind_tcp(ctx, &link, stream, &config)?;
            svc.add_link(id);
            log::info!("[IOC] accept: {} accepted {} from {}", svc.id(), id, peer);
            Ok(Some(id))
        }
    }
}

fn admit_fifo(
    ctx: &Context,
    svc: &ServiceRecord,
    client: &Arc<LinkRecord>,
    config: Arc<IocConfig>,
) -> Result<LinkId> {
    // The client end is not in the table yet; both ends need a slot.
    let id = ctx.links().allocate(config.max_links, 2)?[0];
    let max_links = config.max_links;
    let server = LinkRecord::new(
        id,
        client.usage().complement(),
        Protocol::Fifo,
        svc.usage_args(),
        ctx.pool(),
        config,
    )?;
    ctx.links().insert(&[client, &server], max_links)?;
    if let Err(e) = fifo::pair(client, &server) {
        ctx.links().remove(client.id());
        ctx.links().remove(id);
        return Err(e);
    }
    server.set_owner(Some(svc.id()));
    client.activate()?;
    server.activate()?;
    svc.add_link(id);
    log::info!(
        "[IOC] accept: {} accepted {} (client {})",
        svc.id(),
        id,
        client.id()
    );
    Ok(id)
}

/// Client side of a FIFO connect.
pub(crate) fn connect_fifo(
    ctx: &Context,
    svc: &ServiceRecord,
    usage: Usage,
    args: &UsageArgs,
    deadline: Deadline,
) -> Result<LinkId> {
    let config = ctx.config();
    let id = ctx.links().allocate(config.max_links, 1)?[0];
    let client = LinkRecord::new(id, usage, Protocol::Fifo, args, ctx.pool(), config)?;
    let rendezvous = FifoRendezvous::new();
    let conn = PendingConn::Fifo {
        client,
        rendezvous: Arc::clone(&rendezvous),
    };
    if svc.push_pending(conn).is_err() {
        return Err(Error::TooManyItems(Limit::PendingConnections));
    }
    rendezvous.wait(deadline)
}

/// Client side of a TCP connect: Hello, wait for Welcome, bind.
pub(crate) fn connect_tcp(
    ctx: &Context,
    host: &str,
    port: u16,
    path: &str,
    usage: Usage,
    args: &UsageArgs,
    deadline: Deadline,
) -> Result<LinkId> {
    let config = ctx.config();
    let id = ctx.links().allocate(config.max_links, 1)?[0];
    let mut stream = tcp::connect(host, port, &config.tcp, deadline)?;
    tcp::write_frame(
        &mut stream,
        &Frame::Hello {
            usage,
            path: path.to_string(),
        },
    )?;
    let mut codec = FrameCodec::new(config.tcp.max_message_size);
    match tcp::read_frame(&mut stream, &mut codec, deadline)? {
        Frame::Welcome => {}
        Frame::Reject { code } => {
            let err = Error::from_code(code);
            log::debug!("[IOC] connect: tcp://{}:{}/{} refused: {}", host, port, path, err);
            return Err(err);
        }
        other => {
            log::warn!("[IOC] connect: unexpected {} during handshake", other.kind_name());
            return Err(Error::LinkBroken);
        }
    }
    let link = LinkRecord::new(id, usage, Protocol::Tcp, args, ctx.pool(), Arc::clone(&config))?;
    bind_tcp(ctx, &link, stream, &config)?;
    log::info!("[IOC] connect: {} linked to tcp://{}:{}/{}", id, host, port, path);
    Ok(id)
}

/// Finish a TCP link after the handshake: the producer end reads the
/// consumer's initial interest before any event can be posted.
fn bind_tcp(ctx: &Context, link: &Arc<LinkRecord>, mut stream: TcpStream, config: &IocConfig) -> Result<()> {
    if link.usage() == Usage::EVT_PRODUCER {
        let deadline = Timeout::After(config.tcp.handshake_timeout).deadline();
        let mut codec = FrameCodec::new(config.tcp.max_message_size);
        let frame = tcp::read_frame(&mut stream, &mut codec, deadline)?;
        if !matches!(frame, Frame::Subscriptions { .. }) {
            log::warn!(
                "[IOC] connect: {} expected subscriptions, got {}",
                link.id(),
                frame.kind_name()
            );
            return Err(Error::LinkBroken);
        }
        link.on_frame(frame).map_err(Error::from)?;
    }
    let binding = TcpBinding::new(stream, &config.tcp, config.dat_send_buffer)
        .map_err(|e| Error::from_io(&e))?;
    link.attach(binding.clone())?;
    if let Err(e) = ctx.links().insert(&[link], config.max_links) {
        log::debug!("[IOC] tcp: {} refused, link table full", link.id());
        link.close();
        return Err(e);
    }
    if let Err(e) = binding.spawn_reader(Arc::downgrade(link)) {
        log::error!("[IOC] tcp: cannot spawn reader for {}: {}", link.id(), e);
        ctx.links().remove(link.id());
        link.close();
        return Err(Error::ResourceUnavailable);
    }
    link.activate()?;
    log::debug!("[IOC] tcp: {} bound to {}", link.id(), binding.peer_addr());
    Ok(())
}

/// Start the listener thread of a TCP service.
pub(crate) fn spawn_listener(
    svc: &Arc<ServiceRecord>,
    listener: TcpListener,
    config: Arc<IocConfig>,
) -> io::Result<JoinHandle<()>> {
    let svc = Arc::clone(svc);
    let stop = svc.shutdown_flag();
    thread::Builder::new()
        .name(format!("ioc-srv-{}-listen", svc.id().as_u64()))
        .spawn(move || listen_loop(&svc, &listener, &stop, &config))
}

fn listen_loop(svc: &ServiceRecord, listener: &TcpListener, stop: &AtomicBool, config: &IocConfig) {
    while !stop.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = greet(svc, stream, peer, config) {
                    log::debug!("[IOC] accept: handshake with {} failed: {}", peer, e);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(LISTEN_IDLE),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("[IOC] accept: {} listener error: {}", svc.id(), e);
                thread::sleep(LISTEN_IDLE);
            }
        }
    }
    log::debug!("[IOC] accept: {} listener stopped", svc.id());
}

/// Read the client's Hello and queue it, or refuse it right away.
fn greet(svc: &ServiceRecord, mut stream: TcpStream, peer: SocketAddr, config: &IocConfig) -> Result<()> {
    stream.set_nonblocking(false).map_err(|e| Error::from_io(&e))?;
    let deadline = Timeout::After(config.tcp.handshake_timeout).deadline();
    let mut codec = FrameCodec::new(config.tcp.max_message_size);
    let Frame::Hello { usage, path } = tcp::read_frame(&mut stream, &mut codec, deadline)? else {
        return Err(Error::LinkBroken);
    };
    let verdict = if path != svc.uri().path() {
        Err(Error::NotExistService)
    } else {
        svc.check_client_usage(usage)
    };
    if let Err(e) = verdict {
        tcp::write_frame(&mut stream, &Frame::Reject { code: e.code() })?;
        return Err(e);
    }
    let conn = PendingConn::Tcp {
        stream,
        usage,
        peer,
    };
    if let Err(conn) = svc.push_pending(conn) {
        conn.reject(Error::TooManyItems(Limit::PendingConnections));
        return Err(Error::TooManyItems(Limit::PendingConnections));
    }
    log::debug!("[IOC] accept: {} queued {:?} client {}", svc.id(), usage, peer);
    Ok(())
}

/// Start the auto-accept thread of a service.
pub(crate) fn spawn_auto_accept(ctx: Weak<Context>, svc: &Arc<ServiceRecord>) -> io::Result<JoinHandle<()>> {
    let svc = Arc::clone(svc);
    thread::Builder::new()
        .name(format!("ioc-srv-{}-accept", svc.id().as_u64()))
        .spawn(move || auto_accept_loop(&ctx, &svc))
}

fn auto_accept_loop(ctx: &Weak<Context>, svc: &ServiceRecord) {
    while !svc.is_stopping() {
        let conn = match svc.next_pending(Deadline::At(Instant::now() + ACCEPT_TICK)) {
            Ok(conn) => conn,
            Err(Error::Timeout) => continue,
            Err(_) => break,
        };
        let Some(ctx) = ctx.upgrade() else {
            conn.reject(Error::NotExistService);
            break;
        };
        match admit(&ctx, svc, conn) {
            Ok(Some(link)) => {
                if let Some(hook) = svc.hook() {
                    hook(svc.id(), link);
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("[IOC] accept: {} auto-accept failed: {}", svc.id(), e),
        }
    }
    log::debug!("[IOC] accept: {} auto-accept stopped", svc.id());
}
