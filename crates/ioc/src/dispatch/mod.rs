// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dispatch engine: worker pool and per-consumer mailboxes.
//!
//! Every callback target (event subscriber, command executor, data receiver)
//! owns a [`Mailbox`]. Producers reserve capacity, push a job and schedule the
//! mailbox on the [`DispatchPool`]. A mailbox is served by at most one worker
//! at a time, so callbacks of one consumer run in FIFO order and never
//! concurrently with themselves, while different consumers run in parallel.
//!
//! ```text
//!  post_event ─┬─> Mailbox(A) ──┐
//!              └─> Mailbox(B) ──┼──> run queue (crossbeam) ──> worker 0..N
//!  CmdRequest ───> Mailbox(X) ──┘
//! ```

pub mod command;
pub mod data;
pub mod event;
pub(crate) mod pending;

use crate::error::{Error, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Jobs a worker runs per mailbox visit before yielding to others.
const MAILBOX_BATCH: usize = 32;

/// Idle wake-up of workers to observe shutdown.
const WORKER_IDLE_TICK: Duration = Duration::from_millis(100);

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_MAILBOX_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Mailbox whose job is running on this thread (0 = none).
    static CURRENT_MAILBOX: Cell<u64> = const { Cell::new(0) };
}

/// Mailbox currently being served on the calling thread, if any.
pub(crate) fn current_mailbox() -> Option<u64> {
    let id = CURRENT_MAILBOX.with(Cell::get);
    (id != 0).then_some(id)
}

/// Bounded FIFO of jobs for one consumer.
pub(crate) struct Mailbox {
    id: u64,
    queue: Mutex<VecDeque<Job>>,
    capacity: usize,
    /// Slots taken: reserved + queued + running
    reserved: AtomicUsize,
    scheduled: AtomicBool,
    pool: Arc<DispatchPool>,
}

impl Mailbox {
    pub(crate) fn new(pool: &Arc<DispatchPool>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_MAILBOX_ID.fetch_add(1, Ordering::Relaxed),
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            reserved: AtomicUsize::new(0),
            scheduled: AtomicBool::new(false),
            pool: Arc::clone(pool),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Take one slot; false when the mailbox is at capacity.
    pub(crate) fn reserve(&self) -> bool {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok()
    }

    /// Give back a slot obtained with [`Mailbox::reserve`] but never used.
    pub(crate) fn unreserve(&self) {
        self.reserved.fetch_sub(1, Ordering::AcqRel);
    }

    /// Slots in use (queued or running).
    pub(crate) fn depth(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    /// Queue a job on a previously reserved slot.
    pub(crate) fn push_reserved(self: &Arc<Self>, job: Job) {
        self.queue.lock().push_back(job);
        self.schedule();
    }

    /// Reserve and queue in one step.
    pub(crate) fn try_push(self: &Arc<Self>, job: Job) -> bool {
        if !self.reserve() {
            return false;
        }
        self.push_reserved(job);
        true
    }

    fn schedule(self: &Arc<Self>) {
        if self
            .scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.pool.submit(Arc::clone(self));
        }
    }

    /// Run up to one batch of jobs, then reschedule if more arrived.
    fn serve(self: &Arc<Self>) {
        CURRENT_MAILBOX.with(|c| c.set(self.id));
        for _ in 0..MAILBOX_BATCH {
            let job = self.queue.lock().pop_front();
            let Some(job) = job else { break };
            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                log::error!("[IOC] dispatch: callback panicked (mailbox {})", self.id);
            }
            self.reserved.fetch_sub(1, Ordering::AcqRel);
        }
        CURRENT_MAILBOX.with(|c| c.set(0));

        self.scheduled.store(false, Ordering::Release);
        if !self.queue.lock().is_empty() {
            self.schedule();
        }
    }
}

/// Fixed pool of dispatch worker threads.
pub struct DispatchPool {
    tx: Sender<Arc<Mailbox>>,
    rx: Receiver<Arc<Mailbox>>,
    running: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DispatchPool {
    /// Spawn `threads` workers named `ioc-dispatch-N`.
    pub fn new(threads: usize) -> Result<Arc<Self>> {
        if threads == 0 {
            return Err(Error::InvalidParam);
        }
        let (tx, rx) = channel::unbounded();
        let pool = Arc::new(Self {
            tx,
            rx,
            running: Arc::new(AtomicBool::new(true)),
            workers: Mutex::new(Vec::with_capacity(threads)),
        });

        for n in 0..threads {
            let rx = pool.rx.clone();
            let running = Arc::clone(&pool.running);
            let handle = thread::Builder::new()
                .name(format!("ioc-dispatch-{}", n))
                .spawn(move || worker_loop(rx, running))
                .map_err(|e| {
                    log::error!("[IOC] dispatch: cannot spawn worker {}: {}", n, e);
                    Error::ResourceUnavailable
                });
            let handle = match handle {
                Ok(h) => h,
                Err(e) => {
                    pool.shutdown();
                    return Err(e);
                }
            };
            pool.workers.lock().push(handle);
        }
        log::debug!("[IOC] dispatch: {} workers started", threads);
        Ok(pool)
    }

    fn submit(&self, mailbox: Arc<Mailbox>) {
        if !self.running.load(Ordering::Acquire) {
            log::debug!(
                "[IOC] dispatch: pool stopped, mailbox {} not served",
                mailbox.id
            );
            return;
        }
        // Unbounded channel: fails only if every receiver is gone.
        let _ = self.tx.send(mailbox);
    }

    /// Stop workers and join them (except the calling thread).
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let me = thread::current().id();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                log::warn!("[IOC] dispatch: worker exited with panic");
            }
        }
        log::debug!("[IOC] dispatch: stopped");
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: Receiver<Arc<Mailbox>>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Acquire) {
        match rx.recv_timeout(WORKER_IDLE_TICK) {
            Ok(mailbox) => mailbox.serve(),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Countdown completion used by synchronous posts.
pub(crate) struct Completion {
    left: Mutex<usize>,
    done: parking_lot::Condvar,
}

impl Completion {
    pub(crate) fn new(count: usize) -> Arc<Self> {
        Arc::new(Self {
            left: Mutex::new(count),
            done: parking_lot::Condvar::new(),
        })
    }

    pub(crate) fn complete_one(&self) {
        let mut left = self.left.lock();
        *left = left.saturating_sub(1);
        if *left == 0 {
            self.done.notify_all();
        }
    }

    /// Wait until every part completed or `deadline` passed.
    pub(crate) fn wait(&self, deadline: crate::options::Deadline) -> Result<()> {
        use crate::options::Deadline;
        let mut left = self.left.lock();
        while *left > 0 {
            match deadline {
                Deadline::Immediate => return Err(Error::Timeout),
                Deadline::Never => self.done.wait(&mut left),
                Deadline::At(at) => {
                    if self.done.wait_until(&mut left, at).timed_out() && *left > 0 {
                        return Err(Error::Timeout);
                    }
                }
            }
        }
        Ok(())
    }
}
