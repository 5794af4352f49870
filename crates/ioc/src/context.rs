// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The IOC context: every public operation is a method on [`Context`].
//!
//! A context owns the dispatch pool, the link table, the service registry
//! and the connection-less event scope. Contexts are independent; several
//! can live in one process (and talk to each other over TCP).
//!
//! # Example
//!
//! ```no_run
//! use ioc::{CmdDesc, CmdId, ConnArgs, Context, Options, ServiceArgs, ServiceUri, Usage, UsageArgs};
//!
//! let ctx = Context::new()?;
//! let uri = ServiceUri::fifo("echo");
//! let args = ServiceArgs::new(uri.clone(), Usage::CMD_EXECUTOR)
//!     .auto_accept()
//!     .with_usage_args(UsageArgs::new().with_executor(|_link, cmd: &mut CmdDesc| {
//!         let input = cmd.input().to_vec();
//!         cmd.set_output(input);
//!         Ok(())
//!     }));
//! let _srv = ctx.online_service(args)?;
//!
//! let link = ctx.connect_service(&ConnArgs::new(uri, Usage::CMD_INITIATOR), Options::new())?;
//! let mut cmd = CmdDesc::new(CmdId::ECHO).with_input(b"hi".to_vec());
//! ctx.exec_cmd(link, &mut cmd, Options::new())?;
//! assert_eq!(cmd.output(), b"hi");
//! # Ok::<(), ioc::Error>(())
//! ```

use crate::capability::{Capability, CapabilityId};
use crate::config::IocConfig;
use crate::dispatch::command::CmdDesc;
use crate::dispatch::data::DatDesc;
use crate::dispatch::event::{Consumer, EventHub, EvtDesc, EvtSubscription};
use crate::dispatch::DispatchPool;
use crate::error::{Error, Result};
use crate::ids::{LinkId, ServiceId};
use crate::link::state::LinkState;
use crate::link::{LinkRecord, LinkTable, RoleState};
use crate::options::{Deadline, Options, Timeout};
use crate::service::accept::{self, PendingConn};
use crate::service::{ConnArgs, ServiceArgs, ServiceRecord, ServiceRegistry, ServiceUri};
use crate::transport::{tcp, Protocol};
use crate::usage::Usage;
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Builder for [`Context`].
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    config: IocConfig,
}

impl ContextBuilder {
    /// Replace the whole configuration.
    pub fn config(mut self, config: IocConfig) -> Self {
        self.config = config;
        self
    }

    /// Number of dispatch worker threads.
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n;
        self
    }

    /// Validate the configuration, start the worker pool.
    pub fn build(self) -> Result<Arc<Context>> {
        self.config.validate()?;
        let pool = DispatchPool::new(self.config.worker_threads)?;
        let conles = EventHub::new(
            LinkId::CONLES_AUTO,
            &pool,
            self.config.max_evt_consumers,
            self.config.evt_queue_depth,
        );
        log::info!(
            "[IOC] context: started ({} workers)",
            self.config.worker_threads
        );
        Ok(Arc::new_cyclic(|me| Context {
            me: me.clone(),
            config: ArcSwap::from_pointee(self.config),
            pool,
            links: LinkTable::new(),
            services: ServiceRegistry::new(),
            conles,
            conles_seq: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One IOC instance.
pub struct Context {
    me: Weak<Context>,
    config: ArcSwap<IocConfig>,
    pool: Arc<DispatchPool>,
    links: LinkTable,
    services: ServiceRegistry,
    conles: EventHub,
    conles_seq: AtomicU64,
    closed: AtomicBool,
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Context with the default configuration.
    pub fn new() -> Result<Arc<Context>> {
        Self::builder().build()
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<IocConfig> {
        self.config.load_full()
    }

    /// Swap the configuration; applies to links and services created later.
    ///
    /// The worker pool keeps its size.
    pub fn update_config(&self, config: IocConfig) -> Result<()> {
        config.validate()?;
        self.config.store(Arc::new(config));
        Ok(())
    }

    pub(crate) fn pool(&self) -> &Arc<DispatchPool> {
        &self.pool
    }

    pub(crate) fn links(&self) -> &LinkTable {
        &self.links
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::NotSupported);
        }
        Ok(())
    }

    fn default_timeout(&self) -> Timeout {
        Timeout::After(self.config.load().default_timeout)
    }

    /// Existence, liveness and usage, in that order.
    fn live_link(&self, id: LinkId, usage: Usage) -> Result<Arc<LinkRecord>> {
        let link = self.links.get(id)?;
        link.state().check_alive()?;
        link.require(usage)?;
        Ok(link)
    }

    // ========================================================================
    // Services
    // ========================================================================

    /// Put a service online.
    pub fn online_service(&self, args: ServiceArgs) -> Result<ServiceId> {
        self.ensure_open()?;
        args.validate()?;
        let config = self.config();
        let id = self.services.allocate(config.max_services)?;

        let svc = match args.uri.protocol() {
            Protocol::Fifo => {
                let path = args.uri.path().to_string();
                self.services.claim_fifo(&path, id)?;
                let svc = Arc::new(ServiceRecord::new(id, args, config.accept_backlog, None));
                if let Err(e) = self.start_threads(&svc, None) {
                    self.services.release_fifo(&path, id);
                    return Err(e);
                }
                svc
            }
            Protocol::Tcp => {
                let listener = tcp::bind_listener(args.uri.host(), args.uri.port(), &config.tcp)?;
                let local = listener.local_addr().map_err(|e| Error::from_io(&e))?;
                let svc = Arc::new(ServiceRecord::new(
                    id,
                    args,
                    config.accept_backlog,
                    Some(local),
                ));
                self.start_threads(&svc, Some(listener))?;
                svc
            }
        };
        if let Err(e) = self.services.insert(Arc::clone(&svc), config.max_services) {
            if svc.uri().protocol() == Protocol::Fifo {
                self.services.release_fifo(svc.uri().path(), id);
            }
            for conn in svc.stop() {
                conn.reject(e);
            }
            return Err(e);
        }
        log::info!("[IOC] service: {} online at {}", id, svc.uri());
        Ok(id)
    }

    fn start_threads(&self, svc: &Arc<ServiceRecord>, listener: Option<std::net::TcpListener>) -> Result<()> {
        let spawn_failed = |e: std::io::Error| {
            log::error!("[IOC] service: cannot spawn thread for {}: {}", svc.id(), e);
            Error::ResourceUnavailable
        };
        if let Some(listener) = listener {
            let handle = accept::spawn_listener(svc, listener, self.config()).map_err(spawn_failed)?;
            svc.add_thread(handle);
        }
        if svc.flags().auto_accept {
            match accept::spawn_auto_accept(self.me.clone(), svc) {
                Ok(handle) => svc.add_thread(handle),
                Err(e) => {
                    let err = spawn_failed(e);
                    svc.stop();
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Take a service offline.
    ///
    /// Queued clients are refused. Accepted links are closed, or detached
    /// when the service was onlined with `keep_accepted_link`.
    pub fn offline_service(&self, id: ServiceId) -> Result<()> {
        let svc = self.services.remove(id)?;
        if svc.uri().protocol() == Protocol::Fifo {
            self.services.release_fifo(svc.uri().path(), id);
        }
        for conn in svc.stop() {
            conn.reject(Error::NotExistService);
        }
        let keep = svc.flags().keep_accepted_link;
        for link_id in svc.take_links() {
            if keep {
                if let Ok(link) = self.links.get(link_id) {
                    link.set_owner(None);
                }
            } else if let Some(link) = self.links.remove(link_id) {
                link.close();
            }
        }
        log::info!("[IOC] service: {} offline", id);
        Ok(())
    }

    /// Accept one queued client.
    pub fn accept_client(&self, id: ServiceId, opts: Options) -> Result<LinkId> {
        let svc = self.services.get(id)?;
        if svc.flags().auto_accept {
            return Err(Error::NotSupported);
        }
        let deadline = opts.timeout_or(self.default_timeout()).deadline();
        loop {
            let conn = svc.next_pending(deadline)?;
            if let Some(link) = self.admit(&svc, conn)? {
                return Ok(link);
            }
        }
    }

    fn admit(&self, svc: &ServiceRecord, conn: PendingConn) -> Result<Option<LinkId>> {
        let admitted = accept::admit(self, svc, conn)?;
        if let Some(link_id) = admitted {
            // Offline raced with this accept: the link missed the sweep.
            if svc.is_stopping() && !svc.flags().keep_accepted_link {
                svc.remove_link(link_id);
                if let Some(link) = self.links.remove(link_id) {
                    link.close();
                }
                return Err(Error::NotExistService);
            }
        }
        Ok(admitted)
    }

    /// Connect to a service with a single usage.
    ///
    /// An immediate timeout is treated as the default timeout: a connect
    /// always needs the service side to answer.
    pub fn connect_service(&self, args: &ConnArgs, opts: Options) -> Result<LinkId> {
        self.ensure_open()?;
        args.uri.validate()?;
        if !args.usage.is_single() {
            return Err(Error::InvalidParam);
        }
        let deadline = match opts.timeout_or(self.default_timeout()) {
            Timeout::Immediate => self.default_timeout().deadline(),
            t => t.deadline(),
        };
        match args.uri.protocol() {
            Protocol::Fifo => {
                let svc = self.services.find_fifo(args.uri.path())?;
                svc.check_client_usage(args.usage)?;
                accept::connect_fifo(self, &svc, args.usage, &args.usage_args, deadline)
            }
            Protocol::Tcp => accept::connect_tcp(
                self,
                args.uri.host(),
                args.uri.port(),
                args.uri.path(),
                args.usage,
                &args.usage_args,
                deadline,
            ),
        }
    }

    /// Close a link; the peer end becomes Broken.
    pub fn close_link(&self, id: LinkId) -> Result<()> {
        let link = self.links.remove(id).ok_or(Error::NotExistLink)?;
        if let Some(owner) = link.owner() {
            if let Ok(svc) = self.services.get(owner) {
                svc.remove_link(id);
            }
        }
        link.close();
        Ok(())
    }

    /// Copy the service's link ids into `out`.
    ///
    /// Returns how many were written; `BufferTooSmall` when there were more
    /// (the buffer is then full).
    pub fn get_service_link_ids(&self, id: ServiceId, out: &mut [LinkId]) -> Result<usize> {
        let ids = self.services.get(id)?.link_ids();
        let n = ids.len().min(out.len());
        out[..n].copy_from_slice(&ids[..n]);
        if ids.len() > out.len() {
            return Err(Error::BufferTooSmall);
        }
        Ok(n)
    }

    pub fn service_link_ids(&self, id: ServiceId) -> Result<Vec<LinkId>> {
        Ok(self.services.get(id)?.link_ids())
    }

    /// URI of an online service (bound port filled in for `tcp://…:0`).
    pub fn service_uri(&self, id: ServiceId) -> Result<ServiceUri> {
        Ok(self.services.get(id)?.uri().clone())
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Post an event on a producer link or the connection-less scope.
    pub fn post_event(&self, link: LinkId, evt: EvtDesc, opts: Options) -> Result<()> {
        if link.is_conles() {
            return self.post_conles(evt, opts);
        }
        let link = self.live_link(link, Usage::EVT_PRODUCER)?;
        match link.role() {
            RoleState::EvtProducer(producer) => producer.post(&link, evt, opts),
            _ => Err(Error::InternalBug),
        }
    }

    fn post_conles(&self, mut evt: EvtDesc, opts: Options) -> Result<()> {
        self.ensure_open()?;
        evt.set_seq_id(self.conles_seq.fetch_add(1, Ordering::Relaxed));
        let deadline = if opts.sync {
            opts.timeout_or(self.default_timeout()).deadline()
        } else {
            Deadline::Immediate
        };
        self.conles.dispatch(evt, opts.sync, deadline)
    }

    /// Subscribe on a consumer link or the connection-less scope.
    pub fn subscribe_event(&self, link: LinkId, sub: EvtSubscription) -> Result<()> {
        if link.is_conles() {
            self.ensure_open()?;
            return self.conles.subscribe(sub);
        }
        let link = self.live_link(link, Usage::EVT_CONSUMER)?;
        match link.role() {
            RoleState::EvtConsumer(hub) => hub.subscribe(sub)?,
            _ => return Err(Error::InternalBug),
        }
        link.push_interest();
        Ok(())
    }

    pub fn unsubscribe_event(&self, link: LinkId, consumer: &Consumer) -> Result<()> {
        if link.is_conles() {
            return self.conles.unsubscribe(consumer);
        }
        let link = self.live_link(link, Usage::EVT_CONSUMER)?;
        match link.role() {
            RoleState::EvtConsumer(hub) => hub.unsubscribe(consumer)?,
            _ => return Err(Error::InternalBug),
        }
        link.push_interest();
        Ok(())
    }

    /// Take the oldest event queued for a pull subscription.
    pub fn pull_event(&self, link: LinkId, opts: Options) -> Result<EvtDesc> {
        let deadline = opts.timeout_or(self.default_timeout()).deadline();
        if link.is_conles() {
            return self.conles.pull(deadline);
        }
        let link = self.live_link(link, Usage::EVT_CONSUMER)?;
        match link.role() {
            RoleState::EvtConsumer(hub) => hub.pull(deadline),
            _ => Err(Error::InternalBug),
        }
    }

    /// Post on every producer link accepted by the service.
    ///
    /// Succeeds when at least one link took the event.
    pub fn broadcast_event(&self, id: ServiceId, evt: EvtDesc, opts: Options) -> Result<()> {
        let svc = self.services.get(id)?;
        if !svc.flags().broadcast_event {
            return Err(Error::NotSupportedBroadcast);
        }
        let mut delivered = false;
        let mut first_err: Option<Error> = None;
        for link_id in svc.link_ids() {
            let Ok(link) = self.links.get(link_id) else {
                continue;
            };
            if link.usage() != Usage::EVT_PRODUCER {
                continue;
            }
            match self.post_event(link_id, evt.clone(), opts) {
                Ok(()) => delivered = true,
                Err(Error::NoEventConsumer) => {}
                Err(e) => {
                    log::debug!("[IOC] event: broadcast on {} failed: {}", link_id, e);
                    first_err.get_or_insert(e);
                }
            }
        }
        if delivered {
            Ok(())
        } else {
            Err(first_err.unwrap_or(Error::NoEventConsumer))
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Run a command on the peer executor and wait for its result.
    pub fn exec_cmd(&self, link: LinkId, desc: &mut CmdDesc, opts: Options) -> Result<()> {
        let link = self.live_link(link, Usage::CMD_INITIATOR)?;
        match link.role() {
            RoleState::CmdInitiator(initiator) => initiator.exec(&link, desc, opts),
            _ => Err(Error::InternalBug),
        }
    }

    /// Take the next command (poll-mode executor links).
    pub fn wait_cmd(&self, link: LinkId, opts: Options) -> Result<CmdDesc> {
        let link = self.live_link(link, Usage::CMD_EXECUTOR)?;
        match link.role() {
            RoleState::CmdExecutor(executor) => executor.wait(&link, opts),
            _ => Err(Error::InternalBug),
        }
    }

    /// Send the outcome of a command taken with `wait_cmd`.
    pub fn ack_cmd(&self, link: LinkId, desc: &CmdDesc) -> Result<()> {
        let link = self.live_link(link, Usage::CMD_EXECUTOR)?;
        match link.role() {
            RoleState::CmdExecutor(executor) => executor.ack(&link, desc),
            _ => Err(Error::InternalBug),
        }
    }

    // ========================================================================
    // Data
    // ========================================================================

    pub fn send_dat(&self, link: LinkId, desc: &DatDesc, opts: Options) -> Result<()> {
        let link = self.live_link(link, Usage::DAT_SENDER)?;
        match link.role() {
            RoleState::DatSender(sender) => sender.send(&link, desc, opts),
            _ => Err(Error::InternalBug),
        }
    }

    /// Push every buffered byte to the transport.
    pub fn flush_dat(&self, link: LinkId, opts: Options) -> Result<()> {
        let link = self.live_link(link, Usage::DAT_SENDER)?;
        match link.role() {
            RoleState::DatSender(sender) => sender.flush(&link, opts),
            _ => Err(Error::InternalBug),
        }
    }

    /// Copy received bytes into `out`.
    ///
    /// Bytes that arrived before the link broke are still handed out.
    pub fn recv_dat(&self, link: LinkId, out: &mut [u8], opts: Options) -> Result<usize> {
        let record = self.links.get(link)?;
        if record.buffered_recv() == 0 {
            record.state().check_alive()?;
        }
        record.require(Usage::DAT_RECEIVER)?;
        match record.role() {
            RoleState::DatReceiver(receiver) => receiver.recv(&record, out, opts),
            _ => Err(Error::InternalBug),
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn get_link_state(&self, link: LinkId) -> Result<LinkState> {
        Ok(self.links.get(link)?.state().snapshot())
    }

    pub fn get_link_usage(&self, link: LinkId) -> Result<Usage> {
        Ok(self.links.get(link)?.usage())
    }

    pub fn get_capability(&self, id: CapabilityId) -> Capability {
        Capability::describe(id, &self.config.load())
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Offline every service, close every link, stop the workers.
    ///
    /// Idempotent; also run on drop.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for id in self.services.ids() {
            if let Err(e) = self.offline_service(id) {
                log::debug!("[IOC] context: offline {} during shutdown: {}", id, e);
            }
        }
        for link in self.links.drain() {
            link.close();
        }
        self.conles.close();
        self.pool.shutdown();
        log::info!("[IOC] context: shut down");
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("services", &self.services.len())
            .field("links", &self.links.len())
            .field("conles_consumers", &self.conles.consumer_count())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
