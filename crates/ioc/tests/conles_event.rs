// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::redundant_closure_for_method_calls)] // Test code clarity

//! Connection-less events on `LinkId::CONLES_AUTO`.
//!
//! Covers subscription bookkeeping, async queue bounds, sync delivery,
//! ordering per subscriber and re-entrant calls from inside callbacks.

use ioc::{
    Consumer, Context, Error, EvtDesc, EvtId, EvtSubscription, IocConfig, Limit, LinkId, Options,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

const AUTO: LinkId = LinkId::CONLES_AUTO;

fn wait_until(what: &str, pred: impl Fn() -> bool) {
    let start = Instant::now();
    while !pred() {
        assert!(start.elapsed() < Duration::from_secs(5), "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

fn counter() -> (Arc<AtomicUsize>, Consumer) {
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&hits);
    let consumer = Consumer::from_fn(move |_, _| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    (hits, consumer)
}

#[test]
fn post_without_consumer_then_with_one() {
    let ctx = Context::new().expect("ctx");
    let evt = EvtDesc::new(EvtId::MOVE_STARTED);
    assert_eq!(
        ctx.post_event(AUTO, evt.clone(), Options::new()),
        Err(Error::NoEventConsumer)
    );

    let (hits, consumer) = counter();
    ctx.subscribe_event(AUTO, EvtSubscription::new(consumer, [EvtId::MOVE_STARTED]))
        .expect("subscribe");
    ctx.post_event(AUTO, evt, Options::new()).expect("post");
    wait_until("delivery", || hits.load(Ordering::SeqCst) == 1);
}

#[test]
fn only_matching_ids_are_delivered() {
    let ctx = Context::new().expect("ctx");
    let (moves, on_move) = counter();
    let (alive, on_alive) = counter();
    ctx.subscribe_event(
        AUTO,
        EvtSubscription::new(on_move, [EvtId::MOVE_STARTED, EvtId::MOVE_STOPPED]),
    )
    .expect("sub move");
    ctx.subscribe_event(AUTO, EvtSubscription::new(on_alive, [EvtId::KEEPALIVE]))
        .expect("sub alive");

    let sync = Options::with_timeout(Duration::from_secs(1)).sync();
    ctx.post_event(AUTO, EvtDesc::new(EvtId::MOVE_STARTED), sync).expect("start");
    ctx.post_event(AUTO, EvtDesc::new(EvtId::MOVE_STOPPED), sync).expect("stop");
    ctx.post_event(AUTO, EvtDesc::new(EvtId::KEEPALIVE), sync).expect("alive");
    assert_eq!(
        ctx.post_event(AUTO, EvtDesc::new(EvtId::MOVE_KEEPING), sync),
        Err(Error::NoEventConsumer)
    );
    assert_eq!(moves.load(Ordering::SeqCst), 2);
    assert_eq!(alive.load(Ordering::SeqCst), 1);
}

#[test]
fn duplicate_consumer_conflicts() {
    let ctx = Context::new().expect("ctx");
    let (_hits, consumer) = counter();
    ctx.subscribe_event(AUTO, EvtSubscription::new(consumer.clone(), [EvtId::HELLO]))
        .expect("first");
    assert_eq!(
        ctx.subscribe_event(AUTO, EvtSubscription::new(consumer.clone(), [EvtId::KEEPALIVE])),
        Err(Error::ConflictingConsumer)
    );
    ctx.unsubscribe_event(AUTO, &consumer).expect("unsubscribe");
    assert_eq!(
        ctx.unsubscribe_event(AUTO, &consumer),
        Err(Error::NoEventConsumer)
    );
}

#[test]
fn empty_id_list_is_invalid() {
    let ctx = Context::new().expect("ctx");
    let (_hits, consumer) = counter();
    assert_eq!(
        ctx.subscribe_event(AUTO, EvtSubscription::new(consumer, Vec::<EvtId>::new())),
        Err(Error::InvalidParam)
    );
}

#[test]
fn consumer_limit_is_enforced() {
    let ctx = Context::builder()
        .config(IocConfig::default().with_max_evt_consumers(2))
        .build()
        .expect("ctx");
    for _ in 0..2 {
        let (_hits, consumer) = counter();
        ctx.subscribe_event(AUTO, EvtSubscription::new(consumer, [EvtId::HELLO]))
            .expect("subscribe");
    }
    let (_hits, third) = counter();
    assert_eq!(
        ctx.subscribe_event(AUTO, EvtSubscription::new(third, [EvtId::HELLO])),
        Err(Error::TooManyItems(Limit::EventConsumers))
    );
}

#[test]
fn full_queue_rejects_async_post() {
    let ctx = Context::builder()
        .config(IocConfig::default().with_evt_queue_depth(2))
        .build()
        .expect("ctx");
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let consumer = Consumer::from_fn(move |_, _| {
        let _ = entered_tx.lock().send(());
        let _ = release_rx.lock().recv_timeout(Duration::from_secs(5));
        Ok(())
    });
    ctx.subscribe_event(AUTO, EvtSubscription::new(consumer, [EvtId::HELLO]))
        .expect("subscribe");

    ctx.post_event(AUTO, EvtDesc::new(EvtId::HELLO), Options::new()).expect("first");
    entered_rx.recv_timeout(Duration::from_secs(5)).expect("callback running");
    ctx.post_event(AUTO, EvtDesc::new(EvtId::HELLO), Options::new()).expect("second");
    assert_eq!(
        ctx.post_event(AUTO, EvtDesc::new(EvtId::HELLO), Options::new()),
        Err(Error::TooManyItems(Limit::QueuedEvents))
    );

    release_tx.send(()).expect("release 1");
    release_tx.send(()).expect("release 2");
}

#[test]
fn per_subscriber_order_follows_post_order() {
    let ctx = Context::new().expect("ctx");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    ctx.subscribe_event(
        AUTO,
        EvtSubscription::new(
            Consumer::from_fn(move |_, evt| {
                sink.lock().push(evt.evt_value);
                Ok(())
            }),
            [EvtId::MOVE_KEEPING],
        ),
    )
    .expect("subscribe");

    for v in 0..40u64 {
        loop {
            match ctx.post_event(AUTO, EvtDesc::new(EvtId::MOVE_KEEPING).with_value(v), Options::new()) {
                Ok(()) => break,
                Err(Error::TooManyItems(_)) => thread::sleep(Duration::from_millis(1)),
                Err(e) => panic!("post {} failed: {}", v, e),
            }
        }
    }
    wait_until("40 events", || seen.lock().len() == 40);
    let seen = seen.lock();
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "out of order: {:?}", *seen);
}

#[test]
fn sync_post_waits_for_slow_callback() {
    let ctx = Context::new().expect("ctx");
    let done = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&done);
    ctx.subscribe_event(
        AUTO,
        EvtSubscription::new(
            Consumer::from_fn(move |_, _| {
                thread::sleep(Duration::from_millis(50));
                flag.store(1, Ordering::SeqCst);
                Ok(())
            }),
            [EvtId::HELLO],
        ),
    )
    .expect("subscribe");

    ctx.post_event(
        AUTO,
        EvtDesc::new(EvtId::HELLO),
        Options::with_timeout(Duration::from_secs(2)).sync(),
    )
    .expect("sync post");
    assert_eq!(done.load(Ordering::SeqCst), 1);

    let start = Instant::now();
    assert_eq!(
        ctx.post_event(
            AUTO,
            EvtDesc::new(EvtId::HELLO),
            Options::with_timeout(Duration::from_millis(10)).sync(),
        ),
        Err(Error::Timeout)
    );
    assert!(start.elapsed() < Duration::from_millis(45));
}

#[test]
fn unsubscribed_consumer_misses_queued_events() {
    let ctx = Context::new().expect("ctx");
    let hits = Arc::new(AtomicUsize::new(0));
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let gate_rx = Mutex::new(gate_rx);
    let seen = Arc::clone(&hits);
    let consumer = Consumer::from_fn(move |_, _| {
        seen.fetch_add(1, Ordering::SeqCst);
        let _ = gate_rx.lock().recv_timeout(Duration::from_secs(5));
        Ok(())
    });
    ctx.subscribe_event(AUTO, EvtSubscription::new(consumer.clone(), [EvtId::HELLO]))
        .expect("subscribe");

    for _ in 0..3 {
        ctx.post_event(AUTO, EvtDesc::new(EvtId::HELLO), Options::new()).expect("post");
    }
    wait_until("first callback", || hits.load(Ordering::SeqCst) == 1);
    ctx.unsubscribe_event(AUTO, &consumer).expect("unsubscribe");
    for _ in 0..3 {
        let _ = gate_tx.send(());
    }
    thread::sleep(Duration::from_millis(50));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn reentrant_calls_from_callback_do_not_deadlock() {
    let ctx = Context::new().expect("ctx");
    let weak = Arc::downgrade(&ctx);
    let nested = Arc::new(AtomicUsize::new(0));
    let nested_hits = Arc::clone(&nested);
    let late = Arc::new(AtomicUsize::new(0));
    let late_hits = Arc::clone(&late);

    ctx.subscribe_event(
        AUTO,
        EvtSubscription::new(
            Consumer::from_fn(move |_, evt| {
                let Some(ctx) = weak.upgrade() else {
                    return Ok(());
                };
                if evt.evt_id == EvtId::MOVE_STARTED {
                    // Sync post to ourselves is delivered inline.
                    ctx.post_event(
                        AUTO,
                        EvtDesc::new(EvtId::MOVE_STOPPED),
                        Options::with_timeout(Duration::from_secs(1)).sync(),
                    )?;
                    let late_hits = Arc::clone(&late_hits);
                    ctx.subscribe_event(
                        AUTO,
                        EvtSubscription::new(
                            Consumer::from_fn(move |_, _| {
                                late_hits.fetch_add(1, Ordering::SeqCst);
                                Ok(())
                            }),
                            [EvtId::KEEPALIVE],
                        ),
                    )?;
                } else {
                    nested_hits.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }),
            [EvtId::MOVE_STARTED, EvtId::MOVE_STOPPED],
        ),
    )
    .expect("subscribe");

    ctx.post_event(
        AUTO,
        EvtDesc::new(EvtId::MOVE_STARTED),
        Options::with_timeout(Duration::from_secs(2)).sync(),
    )
    .expect("outer post");
    assert_eq!(nested.load(Ordering::SeqCst), 1);

    ctx.post_event(
        AUTO,
        EvtDesc::new(EvtId::KEEPALIVE),
        Options::with_timeout(Duration::from_secs(1)).sync(),
    )
    .expect("post to late subscriber");
    assert_eq!(late.load(Ordering::SeqCst), 1);
}

#[test]
fn pull_subscription_queues_events() {
    let ctx = Context::new().expect("ctx");
    ctx.subscribe_event(AUTO, EvtSubscription::pull([EvtId::HELLO]))
        .expect("subscribe");
    assert_eq!(
        ctx.pull_event(AUTO, Options::immediate()).map(|e| e.evt_id),
        Err(Error::NoEventPending)
    );
    assert_eq!(
        ctx.pull_event(AUTO, Options::with_timeout(Duration::from_millis(20)))
            .map(|e| e.evt_id),
        Err(Error::Timeout)
    );

    ctx.post_event(
        AUTO,
        EvtDesc::new(EvtId::HELLO).with_payload(b"hi".to_vec()),
        Options::new(),
    )
    .expect("post");
    let evt = ctx.pull_event(AUTO, Options::immediate()).expect("pull");
    assert_eq!(evt.evt_id, EvtId::HELLO);
    assert_eq!(evt.payload.as_deref(), Some(&b"hi"[..]));
}

#[test]
fn contexts_are_isolated() {
    let a = Context::new().expect("a");
    let b = Context::new().expect("b");
    let (hits, consumer) = counter();
    a.subscribe_event(AUTO, EvtSubscription::new(consumer, [EvtId::HELLO]))
        .expect("subscribe");
    assert_eq!(
        b.post_event(AUTO, EvtDesc::new(EvtId::HELLO), Options::new()),
        Err(Error::NoEventConsumer)
    );
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}
