// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Services: named endpoints that accept client connections into links.
//!
//! A service declares its capabilities (a [`Usage`] set). A client connects
//! with exactly one usage whose complement must be among them; the accepted
//! link on the service side carries that complement.

pub(crate) mod accept;
mod uri;

pub use uri::{ServiceUri, FIFO_HOST};

use crate::error::{Error, Limit, Result};
use crate::ids::{IdAllocator, LinkId, ServiceId};
use crate::link::UsageArgs;
use crate::options::Deadline;
use crate::usage::Usage;
use accept::PendingConn;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Hook invoked after the service auto-accepted a client.
pub type AutoAcceptHook = Arc<dyn Fn(ServiceId, LinkId) + Send + Sync>;

/// Service behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceFlags {
    /// Accept clients on a background thread; `accept_client` is refused.
    pub auto_accept: bool,
    /// Links survive `offline_service` (detached from the service).
    pub keep_accepted_link: bool,
    /// Allow `broadcast_event` over every accepted producer link.
    pub broadcast_event: bool,
}

/// Arguments of `online_service`.
#[derive(Clone)]
pub struct ServiceArgs {
    pub uri: ServiceUri,
    pub capabilities: Usage,
    pub flags: ServiceFlags,
    /// Applied to every accepted link (subscriptions, executor, receiver).
    pub usage_args: UsageArgs,
    pub on_auto_accepted: Option<AutoAcceptHook>,
}

impl ServiceArgs {
    pub fn new(uri: ServiceUri, capabilities: Usage) -> Self {
        Self {
            uri,
            capabilities,
            flags: ServiceFlags::default(),
            usage_args: UsageArgs::default(),
            on_auto_accepted: None,
        }
    }

    /// Builder: accept clients automatically
    pub fn auto_accept(mut self) -> Self {
        self.flags.auto_accept = true;
        self
    }

    /// Builder: keep accepted links when going offline
    pub fn keep_accepted_link(mut self) -> Self {
        self.flags.keep_accepted_link = true;
        self
    }

    /// Builder: enable broadcast_event
    pub fn broadcast_event(mut self) -> Self {
        self.flags.broadcast_event = true;
        self
    }

    /// Builder: per-link usage arguments
    pub fn with_usage_args(mut self, args: UsageArgs) -> Self {
        self.usage_args = args;
        self
    }

    /// Builder: callback after each auto-accepted link
    pub fn on_auto_accepted<F>(mut self, hook: F) -> Self
    where
        F: Fn(ServiceId, LinkId) + Send + Sync + 'static,
    {
        self.on_auto_accepted = Some(Arc::new(hook));
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.uri.validate()?;
        if self.capabilities.is_empty() {
            return Err(Error::InvalidParam);
        }
        if self.flags.broadcast_event && !self.capabilities.contains(Usage::EVT_PRODUCER) {
            return Err(Error::InvalidParam);
        }
        Ok(())
    }
}

impl fmt::Debug for ServiceArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceArgs")
            .field("uri", &self.uri)
            .field("capabilities", &self.capabilities)
            .field("flags", &self.flags)
            .field("usage_args", &self.usage_args)
            .field("on_auto_accepted", &self.on_auto_accepted.is_some())
            .finish()
    }
}

/// Arguments of `connect_service`.
#[derive(Debug, Clone)]
pub struct ConnArgs {
    pub uri: ServiceUri,
    /// Exactly one role.
    pub usage: Usage,
    pub usage_args: UsageArgs,
}

impl ConnArgs {
    pub fn new(uri: ServiceUri, usage: Usage) -> Self {
        Self {
            uri,
            usage,
            usage_args: UsageArgs::default(),
        }
    }

    /// Builder: usage arguments for the client link
    pub fn with_usage_args(mut self, args: UsageArgs) -> Self {
        self.usage_args = args;
        self
    }
}

/// One online service.
pub(crate) struct ServiceRecord {
    id: ServiceId,
    uri: ServiceUri,
    args: ServiceArgs,
    links: Mutex<Vec<LinkId>>,
    pending_tx: Sender<PendingConn>,
    pending_rx: Receiver<PendingConn>,
    shutdown: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    local_addr: Option<SocketAddr>,
}

impl ServiceRecord {
    pub(crate) fn new(
        id: ServiceId,
        args: ServiceArgs,
        backlog: usize,
        local_addr: Option<SocketAddr>,
    ) -> Self {
        let (pending_tx, pending_rx) = channel::bounded(backlog);
        let uri = match local_addr {
            Some(addr) => args.uri.clone().with_port(addr.port()),
            None => args.uri.clone(),
        };
        Self {
            id,
            uri,
            args,
            links: Mutex::new(Vec::new()),
            pending_tx,
            pending_rx,
            shutdown: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
            local_addr,
        }
    }

    pub(crate) fn id(&self) -> ServiceId {
        self.id
    }

    /// URI with the bound port filled in.
    pub(crate) fn uri(&self) -> &ServiceUri {
        &self.uri
    }

    pub(crate) fn capabilities(&self) -> Usage {
        self.args.capabilities
    }

    pub(crate) fn flags(&self) -> ServiceFlags {
        self.args.flags
    }

    pub(crate) fn usage_args(&self) -> &UsageArgs {
        &self.args.usage_args
    }

    pub(crate) fn hook(&self) -> Option<&AutoAcceptHook> {
        self.args.on_auto_accepted.as_ref()
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub(crate) fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Whether a client with `usage` may connect.
    pub(crate) fn check_client_usage(&self, usage: Usage) -> Result<()> {
        if !usage.is_single() {
            return Err(Error::InvalidParam);
        }
        if self.capabilities().contains(usage.complement()) {
            Ok(())
        } else {
            Err(Error::IncompatibleUsage)
        }
    }

    /// Links accepted by this service, in acceptance order.
    pub(crate) fn link_ids(&self) -> Vec<LinkId> {
        self.links.lock().clone()
    }

    pub(crate) fn add_link(&self, id: LinkId) {
        self.links.lock().push(id);
    }

    pub(crate) fn remove_link(&self, id: LinkId) {
        self.links.lock().retain(|l| *l != id);
    }

    pub(crate) fn take_links(&self) -> Vec<LinkId> {
        std::mem::take(&mut *self.links.lock())
    }

    pub(crate) fn push_pending(&self, conn: PendingConn) -> std::result::Result<(), PendingConn> {
        match self.pending_tx.try_send(conn) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(conn) | TrySendError::Disconnected(conn)) => Err(conn),
        }
    }

    /// Next queued connection, waiting until `deadline`.
    pub(crate) fn next_pending(&self, deadline: Deadline) -> Result<PendingConn> {
        match deadline {
            Deadline::Immediate => self.pending_rx.try_recv().map_err(|e| match e {
                TryRecvError::Empty => Error::Timeout,
                TryRecvError::Disconnected => Error::NotExistService,
            }),
            Deadline::At(at) => self.pending_rx.recv_deadline(at).map_err(|e| match e {
                RecvTimeoutError::Timeout => Error::Timeout,
                RecvTimeoutError::Disconnected => Error::NotExistService,
            }),
            Deadline::Never => loop {
                if self.is_stopping() {
                    return Err(Error::NotExistService);
                }
                match self.pending_rx.recv_timeout(accept::ACCEPT_TICK) {
                    Ok(conn) => return Ok(conn),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return Err(Error::NotExistService),
                }
            },
        }
    }

    pub(crate) fn add_thread(&self, handle: JoinHandle<()>) {
        self.threads.lock().push(handle);
    }

    /// Stop background threads and return connections still queued.
    pub(crate) fn stop(&self) -> Vec<PendingConn> {
        self.shutdown.store(true, Ordering::Release);
        let me = thread::current().id();
        let handles: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in handles {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                log::warn!("[IOC] service: {} background thread panicked", self.id);
            }
        }
        self.pending_rx.try_iter().collect()
    }
}

/// Online services of one context.
pub(crate) struct ServiceRegistry {
    map: DashMap<ServiceId, Arc<ServiceRecord>>,
    fifo_names: DashMap<String, ServiceId>,
    ids: IdAllocator,
    // Serializes the limit check with the insert.
    admit: Mutex<()>,
}

impl ServiceRegistry {
    pub(crate) fn new() -> Self {
        Self {
            map: DashMap::new(),
            fifo_names: DashMap::new(),
            ids: IdAllocator::new(),
            admit: Mutex::new(()),
        }
    }

    pub(crate) fn allocate(&self, max_services: usize) -> Result<ServiceId> {
        if self.map.len() >= max_services {
            return Err(Error::TooManyItems(Limit::Services));
        }
        Ok(ServiceId(self.ids.next()))
    }

    /// Claim a FIFO path; `ConflictingArgs` if already online.
    pub(crate) fn claim_fifo(&self, path: &str, id: ServiceId) -> Result<()> {
        match self.fifo_names.entry(path.to_string()) {
            Entry::Occupied(_) => Err(Error::ConflictingArgs),
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }

    pub(crate) fn release_fifo(&self, path: &str, id: ServiceId) {
        self.fifo_names.remove_if(path, |_, owner| *owner == id);
    }

    pub(crate) fn find_fifo(&self, path: &str) -> Result<Arc<ServiceRecord>> {
        let id = self
            .fifo_names
            .get(path)
            .map(|e| *e.value())
            .ok_or(Error::NotExistService)?;
        self.get(id)
    }

    /// Register an online service, within `max_services`.
    pub(crate) fn insert(&self, svc: Arc<ServiceRecord>, max_services: usize) -> Result<()> {
        let _admit = self.admit.lock();
        if self.map.len() >= max_services {
            return Err(Error::TooManyItems(Limit::Services));
        }
        self.map.insert(svc.id(), svc);
        Ok(())
    }

    pub(crate) fn get(&self, id: ServiceId) -> Result<Arc<ServiceRecord>> {
        self.map
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(Error::NotExistService)
    }

    pub(crate) fn remove(&self, id: ServiceId) -> Result<Arc<ServiceRecord>> {
        self.map
            .remove(&id)
            .map(|(_, svc)| svc)
            .ok_or(Error::NotExistService)
    }

    pub(crate) fn ids(&self) -> Vec<ServiceId> {
        self.map.iter().map(|e| *e.key()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}
