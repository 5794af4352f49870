// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command request/response.
//!
//! The initiator end allows one command in flight per link: `exec_cmd`
//! moves the link `CmdInitiatorReady -> CmdInitiatorBusyExecCmd` and callers
//! arriving meanwhile wait (within their own timeout) for Ready to return.
//!
//! The executor end runs commands either through a registered
//! [`CommandExecutor`] callback (on the link's mailbox) or by polling with
//! `wait_cmd` and answering with `ack_cmd`.

use super::pending::{wait_reply, PendingReplies};
use super::Mailbox;
use crate::error::{Error, Limit, Result};
use crate::ids::{CmdId, LinkId};
use crate::link::state::{busy_error, BusyGuard, LinkState, LinkSubState};
use crate::link::LinkRecord;
use crate::options::{Deadline, Options, Timeout};
use crate::transport::{Frame, TransportError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle of a command descriptor.
///
/// Terminal states are `Success`, `Failed` and `Timeout`; a descriptor never
/// leaves a terminal state through [`CmdDesc::set_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmdStatus {
    Initialized,
    Pending,
    Processing,
    Success,
    Failed,
    Timeout,
}

impl CmdStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CmdStatus::Success | CmdStatus::Failed | CmdStatus::Timeout)
    }

    pub(crate) fn to_wire(self) -> u8 {
        match self {
            CmdStatus::Initialized => 0,
            CmdStatus::Pending => 1,
            CmdStatus::Processing => 2,
            CmdStatus::Success => 3,
            CmdStatus::Failed => 4,
            CmdStatus::Timeout => 5,
        }
    }

    pub(crate) fn from_wire(v: u8) -> Option<Self> {
        Some(match v {
            0 => CmdStatus::Initialized,
            1 => CmdStatus::Pending,
            2 => CmdStatus::Processing,
            3 => CmdStatus::Success,
            4 => CmdStatus::Failed,
            5 => CmdStatus::Timeout,
            _ => return None,
        })
    }
}

/// One command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdDesc {
    cmd_id: CmdId,
    seq_id: u64,
    status: CmdStatus,
    result: Result<()>,
    timeout: Option<Duration>,
    input: Vec<u8>,
    output: Vec<u8>,
    created_at: Instant,
    started_at: Option<Instant>,
    completed_at: Option<Instant>,
}

impl CmdDesc {
    pub fn new(cmd_id: CmdId) -> Self {
        Self {
            cmd_id,
            seq_id: 0,
            status: CmdStatus::Initialized,
            result: Ok(()),
            timeout: None,
            input: Vec::new(),
            output: Vec::new(),
            created_at: Instant::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Builder: input payload
    pub fn with_input(mut self, input: Vec<u8>) -> Self {
        self.input = input;
        self
    }

    /// Builder: per-command timeout (used when the call options carry none)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cmd_id(&self) -> CmdId {
        self.cmd_id
    }

    /// Sequence number assigned by `exec_cmd`.
    pub fn seq_id(&self) -> u64 {
        self.seq_id
    }

    pub fn status(&self) -> CmdStatus {
        self.status
    }

    pub fn result(&self) -> Result<()> {
        self.result
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn input(&self) -> &[u8] {
        &self.input
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn set_input(&mut self, input: Vec<u8>) {
        self.input = input;
    }

    pub fn set_output(&mut self, output: Vec<u8>) {
        self.output = output;
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the command left `Initialized` (sent, or taken by the executor).
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// When the command reached a terminal status.
    pub fn completed_at(&self) -> Option<Instant> {
        self.completed_at
    }

    fn start(&mut self, status: CmdStatus) {
        self.status = status;
        self.started_at.get_or_insert_with(Instant::now);
    }

    /// Change the status; a terminal status can only be replaced by another
    /// terminal one.
    pub fn set_status(&mut self, status: CmdStatus) -> Result<()> {
        if self.status.is_terminal() && !status.is_terminal() {
            return Err(Error::InvalidParam);
        }
        self.status = status;
        Ok(())
    }

    pub fn set_result(&mut self, result: Result<()>) {
        self.result = result;
    }

    /// Close the descriptor after execution returned `res`.
    fn settle(&mut self, res: Result<()>) {
        match res {
            Ok(()) => {
                if !self.status.is_terminal() {
                    self.status = CmdStatus::Success;
                }
            }
            Err(e) => {
                self.status = CmdStatus::Failed;
                self.result = Err(e);
            }
        }
        if self.status == CmdStatus::Failed && self.result.is_ok() {
            self.result = Err(Error::Failure);
        }
        self.completed_at = Some(Instant::now());
    }

    fn abort(&mut self, err: Error) {
        self.status = if err == Error::Timeout {
            CmdStatus::Timeout
        } else {
            CmdStatus::Failed
        };
        self.result = Err(err);
        self.completed_at = Some(Instant::now());
    }

    fn reply_frame(&self) -> Frame {
        Frame::CmdReply {
            seq: self.seq_id,
            status: self.status,
            code: self.result.err().map_or(0, Error::code),
            payload: self.output.clone(),
        }
    }
}

/// Executes commands arriving on an executor link.
///
/// Returning `Err` marks the command `Failed` with that error. Setting a
/// terminal status on the descriptor is optional; `Ok` defaults to `Success`.
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, link: LinkId, cmd: &mut CmdDesc) -> Result<()>;
}

impl<F> CommandExecutor for F
where
    F: Fn(LinkId, &mut CmdDesc) -> Result<()> + Send + Sync,
{
    fn execute(&self, link: LinkId, cmd: &mut CmdDesc) -> Result<()> {
        self(link, cmd)
    }
}

pub(crate) struct CmdReply {
    status: CmdStatus,
    code: i32,
    payload: Vec<u8>,
}

/// Initiator end of a command link.
pub(crate) struct InitiatorSide {
    replies: PendingReplies<CmdReply>,
}

impl InitiatorSide {
    pub(crate) fn new() -> Self {
        Self {
            replies: PendingReplies::default(),
        }
    }

    pub(crate) fn exec(&self, link: &LinkRecord, desc: &mut CmdDesc, opts: Options) -> Result<()> {
        if desc.status != CmdStatus::Initialized {
            return Err(Error::InvalidParam);
        }
        let timeout = opts
            .timeout
            .or(desc.timeout.map(Timeout::After))
            .unwrap_or(Timeout::After(link.config().default_timeout));
        let deadline = timeout.deadline();

        let _busy = match BusyGuard::acquire(
            link.state(),
            LinkSubState::CmdInitiatorReady,
            LinkSubState::CmdInitiatorBusyExecCmd,
            deadline,
        ) {
            Ok(guard) => guard,
            Err(e) => {
                desc.abort(e);
                return Err(e);
            }
        };

        let seq = link.next_seq();
        desc.seq_id = seq;
        desc.start(CmdStatus::Pending);
        let rx = self.replies.register(seq);
        let request = Frame::CmdRequest {
            seq,
            cmd_id: desc.cmd_id,
            timeout_ms: deadline.to_wire_ms(),
            payload: desc.input.clone(),
        };
        if let Err(e) = link.send_frame(request) {
            self.replies.cancel(seq);
            let err = Error::from(e);
            desc.abort(err);
            return Err(err);
        }

        match wait_reply(&rx, deadline) {
            Ok(reply) => {
                desc.status = reply.status;
                desc.result = match reply.code {
                    0 => Ok(()),
                    code => Err(Error::from_code(code)),
                };
                desc.output = reply.payload;
                desc.completed_at = Some(Instant::now());
                desc.result
            }
            Err(e) => {
                self.replies.cancel(seq);
                log::debug!(
                    "[IOC] cmd: {} exec {:?} seq={} gave up: {}",
                    link.id(),
                    desc.cmd_id,
                    seq,
                    e
                );
                desc.abort(e);
                Err(e)
            }
        }
    }

    pub(crate) fn on_reply(&self, seq: u64, status: CmdStatus, code: i32, payload: Vec<u8>) {
        let reply = CmdReply {
            status,
            code,
            payload,
        };
        if !self.replies.complete(seq, reply) {
            log::debug!("[IOC] cmd: late reply seq={} dropped", seq);
        }
    }

    pub(crate) fn fail_pending(&self) {
        self.replies.fail_all();
    }
}

struct PollQueue {
    items: VecDeque<CmdDesc>,
    /// Sequence of the command taken by `wait_cmd` and not yet acked
    in_service: Option<u64>,
    closed: bool,
}

/// Executor end of a command link.
pub(crate) struct ExecutorSide {
    executor: Option<Arc<dyn CommandExecutor>>,
    mailbox: Option<Arc<Mailbox>>,
    queue: Mutex<PollQueue>,
    ready: Condvar,
    depth: usize,
}

impl ExecutorSide {
    pub(crate) fn new(
        executor: Option<Arc<dyn CommandExecutor>>,
        mailbox: Option<Arc<Mailbox>>,
        depth: usize,
    ) -> Self {
        Self {
            executor,
            mailbox,
            queue: Mutex::new(PollQueue {
                items: VecDeque::new(),
                in_service: None,
                closed: false,
            }),
            ready: Condvar::new(),
            depth,
        }
    }

    /// Inbound `CmdRequest`.
    pub(crate) fn on_request(
        &self,
        link: &Arc<LinkRecord>,
        seq: u64,
        cmd_id: CmdId,
        timeout_ms: u64,
        payload: Vec<u8>,
    ) {
        let mut desc = CmdDesc::new(cmd_id).with_input(payload);
        desc.seq_id = seq;
        desc.status = CmdStatus::Pending;
        desc.timeout = Deadline::from_wire_ms(timeout_ms).remaining();

        if let (Some(executor), Some(mailbox)) = (&self.executor, &self.mailbox) {
            let weak = Arc::downgrade(link);
            let executor = Arc::clone(executor);
            let queued = mailbox.try_push(Box::new(move || {
                if let Some(link) = weak.upgrade() {
                    run_executor(&link, executor.as_ref(), desc);
                }
            }));
            if !queued {
                refuse(link, seq, Error::TooManyItems(Limit::QueuedCommands));
            }
            return;
        }

        let mut queue = self.queue.lock();
        if queue.items.len() >= self.depth {
            drop(queue);
            refuse(link, seq, Error::TooManyItems(Limit::QueuedCommands));
            return;
        }
        queue.items.push_back(desc);
        drop(queue);
        self.ready.notify_all();
    }

    pub(crate) fn wait(&self, link: &LinkRecord, opts: Options) -> Result<CmdDesc> {
        if self.executor.is_some() {
            return Err(Error::NotSupported);
        }
        let deadline = opts
            .timeout_or(Timeout::After(link.config().default_timeout))
            .deadline();
        // A command taken earlier keeps the link busy until its ack.
        let mut busy = BusyGuard::acquire(
            link.state(),
            LinkSubState::CmdExecutorReady,
            LinkSubState::CmdExecutorBusyWaitCmd,
            deadline,
        )
        .map_err(|e| busy_error(e, deadline, Error::NoCmdPending))?;

        let mut queue = self.queue.lock();
        let mut desc = loop {
            if let Some(desc) = queue.items.pop_front() {
                break desc;
            }
            if queue.closed {
                drop(queue);
                return Err(link.state().check_alive().err().unwrap_or(Error::LinkBroken));
            }
            match deadline {
                Deadline::Immediate => return Err(Error::NoCmdPending),
                Deadline::Never => self.ready.wait(&mut queue),
                Deadline::At(at) => {
                    if self.ready.wait_until(&mut queue, at).timed_out() && queue.items.is_empty()
                    {
                        return Err(Error::Timeout);
                    }
                }
            }
        };
        queue.in_service = Some(desc.seq_id);
        drop(queue);

        busy.switch(LinkSubState::CmdExecutorBusyExecCmd)?;
        busy.keep();
        desc.start(CmdStatus::Processing);
        Ok(desc)
    }

    pub(crate) fn ack(&self, link: &LinkRecord, desc: &CmdDesc) -> Result<()> {
        if self.executor.is_some() {
            return Err(Error::NotSupported);
        }
        {
            let mut queue = self.queue.lock();
            match queue.in_service {
                None => return Err(Error::NoCmdPending),
                Some(seq) if seq != desc.seq_id => return Err(Error::InvalidParam),
                Some(_) => queue.in_service = None,
            }
        }

        let mut reply = desc.clone();
        let res = reply.result;
        reply.settle(res);
        let sent = send_reply(link, &reply);

        let _ = link.state().transition(
            LinkState::of(LinkSubState::CmdExecutorBusyExecCmd),
            LinkState::of(LinkSubState::CmdExecutorReady),
        );
        sent
    }

    /// Stop polling waiters (link broken or closed).
    pub(crate) fn close(&self) {
        self.queue.lock().closed = true;
        self.ready.notify_all();
    }
}

fn run_executor(link: &LinkRecord, executor: &dyn CommandExecutor, mut desc: CmdDesc) {
    let busy = match BusyGuard::acquire(
        link.state(),
        LinkSubState::CmdExecutorReady,
        LinkSubState::CmdExecutorBusyExecCmd,
        Deadline::Never,
    ) {
        Ok(guard) => guard,
        Err(e) => {
            log::debug!(
                "[IOC] cmd: {} dropped {:?} seq={}: {}",
                link.id(),
                desc.cmd_id,
                desc.seq_id,
                e
            );
            return;
        }
    };
    desc.start(CmdStatus::Processing);
    let res = executor.execute(link.id(), &mut desc);
    desc.settle(res);
    drop(busy);

    if let Err(e) = send_reply(link, &desc) {
        log::debug!("[IOC] cmd: {} reply seq={} not sent: {}", link.id(), desc.seq_id, e);
    }
}

/// Send a settled reply; one the transport refuses (too large) is answered
/// with a failure so the initiator does not wait for its deadline.
fn send_reply(link: &LinkRecord, desc: &CmdDesc) -> Result<()> {
    match link.send_frame(desc.reply_frame()) {
        Ok(()) => Ok(()),
        Err(TransportError::Rejected(e)) => {
            refuse(link, desc.seq_id, e);
            Err(e)
        }
        Err(e) => Err(e.into()),
    }
}

fn refuse(link: &LinkRecord, seq: u64, err: Error) {
    log::debug!("[IOC] cmd: {} refused seq={}: {}", link.id(), seq, err);
    let frame = Frame::CmdReply {
        seq,
        status: CmdStatus::Failed,
        code: err.code(),
        payload: Vec::new(),
    };
    let _ = link.send_frame(frame);
}
