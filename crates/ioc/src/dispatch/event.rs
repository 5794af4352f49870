// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event fan-out.
//!
//! An [`EventHub`] is one event scope: the connectionless process-wide bus
//! or the consumer end of one link. Subscribers are kept in a copy-on-write
//! list so posting never takes the edit lock.
//!
//! # Delivery
//!
//! - **Callback** subscribers get their own mailbox; each sees events in
//!   post order and never runs concurrently with itself.
//! - **Pull** subscribers share the scope's pull queue, drained with
//!   `pull_event`.
//!
//! A post reserves a queue slot on every matching subscriber before queuing
//! anything: either all of them get the event or the post fails with
//! `TooManyItems(QueuedEvents)` and none does.

use super::pending::{wait_reply, PendingReplies};
use super::{current_mailbox, Completion, DispatchPool, Mailbox};
use crate::error::{Error, Limit, Result};
use crate::ids::{EvtId, LinkId};
use crate::link::LinkRecord;
use crate::options::{Deadline, Options, Timeout};
use crate::transport::{Frame, TransportError};
use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Posted event.
///
/// `evt_value` and `payload` are opaque to IOC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvtDesc {
    pub evt_id: EvtId,
    pub evt_value: u64,
    pub payload: Option<Vec<u8>>,
    seq_id: u64,
    producer: Option<LinkId>,
}

impl EvtDesc {
    pub fn new(evt_id: EvtId) -> Self {
        Self {
            evt_id,
            evt_value: 0,
            payload: None,
            seq_id: 0,
            producer: None,
        }
    }

    pub fn with_value(mut self, value: u64) -> Self {
        self.evt_value = value;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sequence number stamped at post (per producer link, or per context
    /// in conles mode).
    pub fn seq_id(&self) -> u64 {
        self.seq_id
    }

    /// Posting link, as numbered in the producer's context. `None` in
    /// conles mode.
    pub fn producer(&self) -> Option<LinkId> {
        self.producer
    }

    pub(crate) fn set_seq_id(&mut self, seq: u64) {
        self.seq_id = seq;
    }

    pub(crate) fn set_producer(&mut self, producer: Option<LinkId>) {
        self.producer = producer.filter(|id| !id.is_conles());
    }
}

/// Callback invoked for each delivered event.
///
/// The returned error is logged and otherwise ignored.
pub trait EventConsumer: Send + Sync {
    fn on_event(&self, link: LinkId, evt: &EvtDesc) -> Result<()>;
}

impl<F> EventConsumer for F
where
    F: Fn(LinkId, &EvtDesc) -> Result<()> + Send + Sync,
{
    fn on_event(&self, link: LinkId, evt: &EvtDesc) -> Result<()> {
        self(link, evt)
    }
}

/// Identity of a subscriber within one scope.
///
/// Callback consumers are compared by pointer: subscribing the same `Arc`
/// twice conflicts, two distinct closures never do.
#[derive(Clone)]
pub enum Consumer {
    Callback(Arc<dyn EventConsumer>),
    /// Events are queued for `pull_event`.
    Pull,
}

impl Consumer {
    /// Wrap a closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(LinkId, &EvtDesc) -> Result<()> + Send + Sync + 'static,
    {
        Consumer::Callback(Arc::new(f))
    }

    fn same(&self, other: &Consumer) -> bool {
        match (self, other) {
            (Consumer::Callback(a), Consumer::Callback(b)) => {
                Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
            }
            (Consumer::Pull, Consumer::Pull) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Consumer::Callback(c) => write!(f, "Callback({:p})", Arc::as_ptr(c).cast::<()>()),
            Consumer::Pull => write!(f, "Pull"),
        }
    }
}

/// Subscription request: who and for which event ids.
#[derive(Clone, Debug)]
pub struct EvtSubscription {
    pub consumer: Consumer,
    pub evt_ids: Vec<EvtId>,
}

impl EvtSubscription {
    pub fn new(consumer: Consumer, evt_ids: impl IntoIterator<Item = EvtId>) -> Self {
        Self {
            consumer,
            evt_ids: evt_ids.into_iter().collect(),
        }
    }

    /// Pull-mode subscription.
    pub fn pull(evt_ids: impl IntoIterator<Item = EvtId>) -> Self {
        Self::new(Consumer::Pull, evt_ids)
    }
}

struct Subscriber {
    consumer: Consumer,
    evt_ids: Vec<EvtId>,
    mailbox: Option<Arc<Mailbox>>,
    active: AtomicBool,
}

impl Subscriber {
    fn wants(&self, id: EvtId) -> bool {
        self.active.load(Ordering::Acquire) && self.evt_ids.contains(&id)
    }

    fn deliver(&self, scope: LinkId, evt: &EvtDesc) {
        // Unsubscribed after the job was queued: skip.
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        if let Consumer::Callback(cb) = &self.consumer {
            if let Err(e) = cb.on_event(scope, evt) {
                log::debug!(
                    "[IOC] event: consumer on {} returned {} for evt {:?}",
                    scope,
                    e,
                    evt.evt_id
                );
            }
        }
    }
}

/// One event scope.
pub(crate) struct EventHub {
    scope: LinkId,
    subscribers: ArcSwap<Vec<Arc<Subscriber>>>,
    edit: Mutex<()>,
    pull_queue: Mutex<VecDeque<EvtDesc>>,
    pull_ready: Condvar,
    closed: AtomicBool,
    max_consumers: usize,
    queue_depth: usize,
    pool: Arc<DispatchPool>,
}

impl EventHub {
    pub(crate) fn new(
        scope: LinkId,
        pool: &Arc<DispatchPool>,
        max_consumers: usize,
        queue_depth: usize,
    ) -> Self {
        Self {
            scope,
            subscribers: ArcSwap::from_pointee(Vec::new()),
            edit: Mutex::new(()),
            pull_queue: Mutex::new(VecDeque::new()),
            pull_ready: Condvar::new(),
            closed: AtomicBool::new(false),
            max_consumers,
            queue_depth,
            pool: Arc::clone(pool),
        }
    }

    pub(crate) fn subscribe(&self, sub: EvtSubscription) -> Result<()> {
        if sub.evt_ids.is_empty() {
            return Err(Error::InvalidParam);
        }
        let _edit = self.edit.lock();
        let current = self.subscribers.load_full();
        if current.iter().any(|s| s.consumer.same(&sub.consumer)) {
            return Err(Error::ConflictingConsumer);
        }
        if current.len() >= self.max_consumers {
            return Err(Error::TooManyItems(Limit::EventConsumers));
        }
        let mailbox = match sub.consumer {
            Consumer::Callback(_) => Some(Mailbox::new(&self.pool, self.queue_depth)),
            Consumer::Pull => None,
        };
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(Arc::new(Subscriber {
            consumer: sub.consumer,
            evt_ids: sub.evt_ids,
            mailbox,
            active: AtomicBool::new(true),
        }));
        self.subscribers.store(Arc::new(next));
        log::debug!("[IOC] event: {} subscriber added", self.scope);
        Ok(())
    }

    pub(crate) fn unsubscribe(&self, consumer: &Consumer) -> Result<()> {
        let _edit = self.edit.lock();
        let current = self.subscribers.load_full();
        let Some(pos) = current.iter().position(|s| s.consumer.same(consumer)) else {
            return Err(Error::NoEventConsumer);
        };
        let mut next: Vec<Arc<Subscriber>> = current.iter().cloned().collect();
        let removed = next.remove(pos);
        removed.active.store(false, Ordering::Release);
        if matches!(removed.consumer, Consumer::Pull) {
            self.pull_queue.lock().clear();
        }
        self.subscribers.store(Arc::new(next));
        log::debug!("[IOC] event: {} subscriber removed", self.scope);
        Ok(())
    }

    /// Union of subscribed event ids, sorted.
    pub(crate) fn interest(&self) -> Vec<EvtId> {
        let mut ids: Vec<EvtId> = self
            .subscribers
            .load()
            .iter()
            .flat_map(|s| s.evt_ids.iter().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub(crate) fn consumer_count(&self) -> usize {
        self.subscribers.load().len()
    }

    /// Deliver `evt` to every matching subscriber.
    ///
    /// `sync` waits until every callback returned (or `deadline`). A sync post
    /// issued from inside a callback delivers to that same subscriber inline.
    pub(crate) fn dispatch(&self, evt: EvtDesc, sync: bool, deadline: Deadline) -> Result<()> {
        let snapshot = self.subscribers.load();
        let targets: Vec<&Arc<Subscriber>> =
            snapshot.iter().filter(|s| s.wants(evt.evt_id)).collect();
        if targets.is_empty() {
            return Err(Error::NoEventConsumer);
        }

        let running = current_mailbox();
        let mut queued: Vec<(&Arc<Subscriber>, &Arc<Mailbox>)> = Vec::with_capacity(targets.len());
        let mut inline: Vec<&Arc<Subscriber>> = Vec::new();
        let mut to_pull = false;

        for sub in &targets {
            let Some(mailbox) = sub.mailbox.as_ref() else {
                to_pull = true;
                continue;
            };
            if sync && running == Some(mailbox.id()) {
                inline.push(sub);
                continue;
            }
            if !mailbox.reserve() {
                for (_, mb) in &queued {
                    mb.unreserve();
                }
                log::debug!(
                    "[IOC] event: {} queue full, evt {:?} refused",
                    self.scope,
                    evt.evt_id
                );
                return Err(Error::TooManyItems(Limit::QueuedEvents));
            }
            queued.push((sub, mailbox));
        }

        if to_pull {
            let mut queue = self.pull_queue.lock();
            if queue.len() >= self.queue_depth {
                drop(queue);
                for (_, mb) in &queued {
                    mb.unreserve();
                }
                return Err(Error::TooManyItems(Limit::QueuedEvents));
            }
            queue.push_back(evt.clone());
            drop(queue);
            self.pull_ready.notify_all();
        }

        let evt = Arc::new(evt);
        let completion = sync.then(|| Completion::new(queued.len()));
        for (sub, mailbox) in queued {
            let sub = Arc::clone(sub);
            let evt = Arc::clone(&evt);
            let scope = self.scope;
            let done = completion.clone();
            mailbox.push_reserved(Box::new(move || {
                sub.deliver(scope, &evt);
                if let Some(done) = done {
                    done.complete_one();
                }
            }));
        }
        for sub in inline {
            sub.deliver(self.scope, &evt);
        }
        match completion {
            Some(done) => done.wait(deadline),
            None => Ok(()),
        }
    }

    /// Take the oldest pull-queued event.
    pub(crate) fn pull(&self, deadline: Deadline) -> Result<EvtDesc> {
        let mut queue = self.pull_queue.lock();
        loop {
            if let Some(evt) = queue.pop_front() {
                return Ok(evt);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::LinkBroken);
            }
            match deadline {
                Deadline::Immediate => return Err(Error::NoEventPending),
                Deadline::Never => self.pull_ready.wait(&mut queue),
                Deadline::At(at) => {
                    if self.pull_ready.wait_until(&mut queue, at).timed_out() && queue.is_empty()
                    {
                        return Err(Error::Timeout);
                    }
                }
            }
        }
    }

    /// Deactivate every subscriber and wake pullers.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _edit = self.edit.lock();
        for sub in self.subscribers.load().iter() {
            sub.active.store(false, Ordering::Release);
        }
        self.subscribers.store(Arc::new(Vec::new()));
        self.pull_ready.notify_all();
    }
}

/// Producer end of an event link.
///
/// Mirrors the consumer end's subscribed ids so a post nobody listens to
/// fails locally with `NoEventConsumer`.
pub(crate) struct ProducerSide {
    interest: ArcSwap<Vec<EvtId>>,
    acks: PendingReplies<i32>,
}

impl ProducerSide {
    pub(crate) fn new() -> Self {
        Self {
            interest: ArcSwap::from_pointee(Vec::new()),
            acks: PendingReplies::default(),
        }
    }

    pub(crate) fn set_interest(&self, evt_ids: Vec<EvtId>) {
        self.interest.store(Arc::new(evt_ids));
    }

    pub(crate) fn has_interest(&self, id: EvtId) -> bool {
        self.interest.load().contains(&id)
    }

    pub(crate) fn post(&self, link: &LinkRecord, mut evt: EvtDesc, opts: Options) -> Result<()> {
        if !self.has_interest(evt.evt_id) {
            return Err(Error::NoEventConsumer);
        }
        let seq = link.next_seq();
        evt.set_seq_id(seq);
        evt.set_producer(Some(link.id()));

        if !opts.sync {
            return link
                .send_frame(Frame::Event {
                    sync: false,
                    timeout_ms: 0,
                    evt,
                })
                .map_err(post_error);
        }

        let deadline = opts
            .timeout_or(Timeout::After(link.config().default_timeout))
            .deadline();
        let rx = self.acks.register(seq);
        if let Err(e) = link.send_frame(Frame::Event {
            sync: true,
            timeout_ms: deadline.to_wire_ms(),
            evt,
        }) {
            self.acks.cancel(seq);
            return Err(post_error(e));
        }
        match wait_reply(&rx, deadline) {
            Ok(0) => Ok(()),
            Ok(code) => Err(Error::from_code(code)),
            Err(e) => {
                self.acks.cancel(seq);
                Err(e)
            }
        }
    }

    pub(crate) fn on_ack(&self, seq: u64, code: i32) {
        if !self.acks.complete(seq, code) {
            log::debug!("[IOC] event: late ack seq={} dropped", seq);
        }
    }

    pub(crate) fn fail_pending(&self) {
        self.acks.fail_all();
    }
}

fn post_error(err: TransportError) -> Error {
    match err {
        TransportError::WouldBlock => Error::TooManyItems(Limit::QueuedEvents),
        other => other.into(),
    }
}
