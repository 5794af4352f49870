// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Links: one end of an established connection.
//!
//! A [`LinkRecord`] carries a single usage, its state cell, the transport it
//! was bound to and the role-specific state (event hub, command slots, data
//! buffers). All inbound traffic enters through [`LinkRecord::on_frame`].

pub mod state;

use crate::config::IocConfig;
use crate::dispatch::command::{CommandExecutor, ExecutorSide, InitiatorSide};
use crate::dispatch::data::{DataReceiver, ReceiverSide, SenderSide};
use crate::dispatch::event::{EventHub, EvtDesc, EvtSubscription, ProducerSide};
use crate::dispatch::{DispatchPool, Mailbox};
use crate::error::{Error, Limit, Result};
use crate::ids::{IdAllocator, LinkId, ServiceId};
use crate::options::Deadline;
use crate::transport::{FaultKind, Frame, Protocol, Transport, TransportError};
use crate::usage::Usage;
use dashmap::DashMap;
use parking_lot::Mutex;
use state::{LinkState, StateCell};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Per-usage arguments applied when a link is created.
///
/// Only the part matching the link's usage is used: subscriptions for an
/// event consumer, the executor for a command executor, the receiver for a
/// data receiver. Without an executor/receiver the link works in poll mode.
#[derive(Clone, Default)]
pub struct UsageArgs {
    pub evt_subscriptions: Vec<EvtSubscription>,
    pub cmd_executor: Option<Arc<dyn CommandExecutor>>,
    pub dat_receiver: Option<Arc<dyn DataReceiver>>,
}

impl UsageArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: subscribe on link creation
    pub fn with_subscription(mut self, sub: EvtSubscription) -> Self {
        self.evt_subscriptions.push(sub);
        self
    }

    /// Builder: run commands through this executor
    pub fn with_executor<E: CommandExecutor + 'static>(mut self, executor: E) -> Self {
        self.cmd_executor = Some(Arc::new(executor));
        self
    }

    /// Builder: deliver data chunks to this receiver
    pub fn with_receiver<R: DataReceiver + 'static>(mut self, receiver: R) -> Self {
        self.dat_receiver = Some(Arc::new(receiver));
        self
    }
}

impl fmt::Debug for UsageArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsageArgs")
            .field("evt_subscriptions", &self.evt_subscriptions)
            .field("cmd_executor", &self.cmd_executor.is_some())
            .field("dat_receiver", &self.dat_receiver.is_some())
            .finish()
    }
}

pub(crate) enum RoleState {
    EvtProducer(ProducerSide),
    EvtConsumer(EventHub),
    CmdInitiator(InitiatorSide),
    CmdExecutor(ExecutorSide),
    DatSender(SenderSide),
    DatReceiver(ReceiverSide),
}

pub(crate) struct LinkRecord {
    id: LinkId,
    usage: Usage,
    protocol: Protocol,
    state: StateCell,
    owner: Mutex<Option<ServiceId>>,
    transport: OnceLock<Arc<dyn Transport>>,
    role: RoleState,
    seq: AtomicU64,
    config: Arc<IocConfig>,
}

impl LinkRecord {
    pub(crate) fn new(
        id: LinkId,
        usage: Usage,
        protocol: Protocol,
        args: &UsageArgs,
        pool: &Arc<DispatchPool>,
        config: Arc<IocConfig>,
    ) -> Result<Arc<Self>> {
        if !usage.is_single() {
            return Err(Error::InvalidParam);
        }
        let role = match usage {
            Usage::EVT_PRODUCER => RoleState::EvtProducer(ProducerSide::new()),
            Usage::EVT_CONSUMER => {
                let hub = EventHub::new(id, pool, config.max_evt_consumers, config.evt_queue_depth);
                for sub in &args.evt_subscriptions {
                    hub.subscribe(sub.clone())?;
                }
                RoleState::EvtConsumer(hub)
            }
            Usage::CMD_INITIATOR => RoleState::CmdInitiator(InitiatorSide::new()),
            Usage::CMD_EXECUTOR => {
                let mailbox = args
                    .cmd_executor
                    .as_ref()
                    .map(|_| Mailbox::new(pool, config.cmd_queue_depth));
                RoleState::CmdExecutor(ExecutorSide::new(
                    args.cmd_executor.clone(),
                    mailbox,
                    config.cmd_queue_depth,
                ))
            }
            Usage::DAT_SENDER => RoleState::DatSender(SenderSide::new(
                config.dat_send_buffer,
                config.dat_chunk_size,
            )),
            Usage::DAT_RECEIVER => {
                let slots = (config.dat_recv_buffer / config.dat_chunk_size).max(1);
                let mailbox = args.dat_receiver.as_ref().map(|_| Mailbox::new(pool, slots));
                RoleState::DatReceiver(ReceiverSide::new(
                    args.dat_receiver.clone(),
                    mailbox,
                    config.dat_recv_buffer,
                ))
            }
            _ => return Err(Error::InvalidParam),
        };
        Ok(Arc::new(Self {
            id,
            usage,
            protocol,
            state: StateCell::new(),
            owner: Mutex::new(None),
            transport: OnceLock::new(),
            role,
            seq: AtomicU64::new(1),
            config,
        }))
    }

    pub(crate) fn id(&self) -> LinkId {
        self.id
    }

    pub(crate) fn usage(&self) -> Usage {
        self.usage
    }

    pub(crate) fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub(crate) fn state(&self) -> &StateCell {
        &self.state
    }

    pub(crate) fn config(&self) -> &IocConfig {
        &self.config
    }

    pub(crate) fn role(&self) -> &RoleState {
        &self.role
    }

    pub(crate) fn owner(&self) -> Option<ServiceId> {
        *self.owner.lock()
    }

    pub(crate) fn set_owner(&self, owner: Option<ServiceId>) {
        *self.owner.lock() = owner;
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Bind the transport (once).
    pub(crate) fn attach(&self, transport: Arc<dyn Transport>) -> Result<()> {
        self.transport.set(transport).map_err(|_| Error::InternalBug)
    }

    /// Handshake done: Undefined -> Ready, then publish consumer interest.
    pub(crate) fn activate(&self) -> Result<()> {
        self.state
            .transition(LinkState::UNDEFINED, LinkState::ready(self.usage))?;
        self.push_interest();
        log::debug!(
            "[IOC] link: {} ready ({:?} over {})",
            self.id,
            self.usage,
            self.protocol
        );
        Ok(())
    }

    /// Usage gate; callers check liveness first.
    pub(crate) fn require(&self, usage: Usage) -> Result<()> {
        if self.usage == usage {
            Ok(())
        } else {
            Err(Error::IncompatibleUsage)
        }
    }

    /// Send through the transport; a permanent fault breaks the link.
    pub(crate) fn send_frame(&self, frame: Frame) -> std::result::Result<(), TransportError> {
        let Some(transport) = self.transport.get() else {
            return Err(TransportError::Broken(FaultKind::LocalClosed));
        };
        let res = transport.send(frame);
        if let Err(TransportError::Broken(kind)) = res {
            self.mark_broken(kind);
        }
        res
    }

    pub(crate) fn flush_transport(&self, deadline: Deadline) -> std::result::Result<(), TransportError> {
        let Some(transport) = self.transport.get() else {
            return Err(TransportError::Broken(FaultKind::LocalClosed));
        };
        let res = transport.flush(deadline);
        if let Err(TransportError::Broken(kind)) = res {
            self.mark_broken(kind);
        }
        res
    }

    /// Tell the producer end which event ids this consumer listens to.
    pub(crate) fn push_interest(&self) {
        if let RoleState::EvtConsumer(hub) = &self.role {
            let evt_ids = hub.interest();
            if let Err(e) = self.send_frame(Frame::Subscriptions { evt_ids }) {
                log::debug!("[IOC] link: {} interest update not sent: {}", self.id, e);
            }
        }
    }

    /// Transport fault: terminal Broken, transport stopped, waiters released.
    ///
    /// Stopping the transport is what tells a TCP peer: its reader sees EOF.
    pub(crate) fn mark_broken(&self, kind: FaultKind) {
        if self.state.mark_broken() {
            log::warn!("[IOC] link: {} broken ({:?})", self.id, kind);
            if let Some(transport) = self.transport.get() {
                transport.close();
            }
            self.release_waiters();
        }
    }

    /// Local close: peer told, transport stopped, waiters released.
    pub(crate) fn close(&self) {
        if !self.state.mark_closed() {
            return;
        }
        if let Some(transport) = self.transport.get() {
            if let Err(e) = transport.send(Frame::Close) {
                log::debug!("[IOC] link: {} close frame not sent: {}", self.id, e);
            }
            transport.close();
        }
        self.release_waiters();
        log::debug!("[IOC] link: {} closed", self.id);
    }

    fn release_waiters(&self) {
        match &self.role {
            RoleState::EvtProducer(p) => p.fail_pending(),
            RoleState::EvtConsumer(hub) => hub.close(),
            RoleState::CmdInitiator(i) => i.fail_pending(),
            RoleState::CmdExecutor(x) => x.close(),
            RoleState::DatSender(_) => {}
            RoleState::DatReceiver(r) => r.close(),
        }
        self.state.notify();
    }

    /// Bytes waiting in the receive buffer (poll-mode receivers).
    pub(crate) fn buffered_recv(&self) -> usize {
        match &self.role {
            RoleState::DatReceiver(r) => r.buffered(),
            _ => 0,
        }
    }

    /// Inbound frame from the transport.
    ///
    /// `WouldBlock` means "retry later" (receiver full); `Rejected` carries
    /// an error the FIFO peer reports to its caller.
    pub(crate) fn on_frame(self: &Arc<Self>, frame: Frame) -> std::result::Result<(), TransportError> {
        if let Frame::Close = frame {
            self.mark_broken(FaultKind::PeerClosed);
            return Ok(());
        }
        if self.state.check_alive().is_err() {
            return Err(TransportError::Broken(FaultKind::PeerGone));
        }
        match (&self.role, frame) {
            (RoleState::EvtProducer(p), Frame::Subscriptions { evt_ids }) => {
                p.set_interest(evt_ids);
            }
            (RoleState::EvtProducer(p), Frame::EventAck { seq, code }) => p.on_ack(seq, code),
            (
                RoleState::EvtConsumer(hub),
                Frame::Event {
                    sync,
                    timeout_ms,
                    evt,
                },
            ) => return self.deliver_event(hub, sync, timeout_ms, evt),
            (RoleState::CmdInitiator(i), Frame::CmdReply {
                seq,
                status,
                code,
                payload,
            }) => i.on_reply(seq, status, code, payload),
            (RoleState::CmdExecutor(x), Frame::CmdRequest {
                seq,
                cmd_id,
                timeout_ms,
                payload,
            }) => x.on_request(self, seq, cmd_id, timeout_ms, payload),
            (RoleState::DatReceiver(r), Frame::Data { bytes }) => return r.on_data(self, bytes),
            (_, other) => {
                log::warn!(
                    "[IOC] link: {} unexpected {} frame for {:?}",
                    self.id,
                    other.kind_name(),
                    self.usage
                );
                return Err(TransportError::Rejected(Error::IncompatibleUsage));
            }
        }
        Ok(())
    }

    fn deliver_event(
        &self,
        hub: &EventHub,
        sync: bool,
        timeout_ms: u64,
        evt: EvtDesc,
    ) -> std::result::Result<(), TransportError> {
        if sync {
            let seq = evt.seq_id();
            let code = match hub.dispatch(evt, true, Deadline::from_wire_ms(timeout_ms)) {
                Ok(()) => 0,
                Err(e) => e.code(),
            };
            if let Err(e) = self.send_frame(Frame::EventAck { seq, code }) {
                log::debug!("[IOC] event: {} ack seq={} not sent: {}", self.id, seq, e);
            }
            return Ok(());
        }
        match hub.dispatch(evt, false, Deadline::Immediate) {
            Ok(()) => Ok(()),
            Err(Error::TooManyItems(_)) => Err(TransportError::WouldBlock),
            Err(e) => Err(TransportError::Rejected(e)),
        }
    }
}

impl fmt::Debug for LinkRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkRecord")
            .field("id", &self.id)
            .field("usage", &self.usage)
            .field("protocol", &self.protocol)
            .field("state", &self.state.snapshot())
            .finish()
    }
}

/// Live links of one context.
pub(crate) struct LinkTable {
    map: DashMap<LinkId, Arc<LinkRecord>>,
    ids: IdAllocator,
    // Serializes the limit check with the insert.
    admit: Mutex<()>,
}

impl LinkTable {
    pub(crate) fn new() -> Self {
        Self {
            map: DashMap::new(),
            ids: IdAllocator::new(),
            admit: Mutex::new(()),
        }
    }

    /// Allocate a fresh id if the table looks like it has room for `count`
    /// more links. The binding check happens in [`LinkTable::insert`].
    pub(crate) fn allocate(&self, max_links: usize, count: usize) -> Result<Vec<LinkId>> {
        if self.map.len() + count > max_links {
            return Err(Error::TooManyItems(Limit::Links));
        }
        Ok((0..count).map(|_| LinkId(self.ids.next())).collect())
    }

    /// Insert every link or none, within `max_links`.
    pub(crate) fn insert(&self, links: &[&Arc<LinkRecord>], max_links: usize) -> Result<()> {
        let _admit = self.admit.lock();
        if self.map.len() + links.len() > max_links {
            return Err(Error::TooManyItems(Limit::Links));
        }
        for link in links {
            self.map.insert(link.id(), Arc::clone(link));
        }
        Ok(())
    }

    pub(crate) fn get(&self, id: LinkId) -> Result<Arc<LinkRecord>> {
        self.map
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(Error::NotExistLink)
    }

    pub(crate) fn remove(&self, id: LinkId) -> Option<Arc<LinkRecord>> {
        self.map.remove(&id).map(|(_, link)| link)
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Remove and return every link.
    pub(crate) fn drain(&self) -> Vec<Arc<LinkRecord>> {
        let ids: Vec<LinkId> = self.map.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}
