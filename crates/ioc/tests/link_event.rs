// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure

//! Events over connected FIFO links and service broadcast.

use ioc::{
    ConnArgs, Consumer, Context, Error, EvtDesc, EvtId, EvtSubscription, LinkId, Options,
    ServiceArgs, ServiceId, ServiceUri, Usage, UsageArgs,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_until(what: &str, pred: impl Fn() -> bool) {
    let start = Instant::now();
    while !pred() {
        assert!(start.elapsed() < Duration::from_secs(5), "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

fn connect(ctx: &Context, uri: &ServiceUri, usage: Usage, args: UsageArgs) -> LinkId {
    ctx.connect_service(
        &ConnArgs::new(uri.clone(), usage).with_usage_args(args),
        Options::with_timeout(Duration::from_secs(2)),
    )
    .expect("connect")
}

fn only_link(ctx: &Context, srv: ServiceId) -> LinkId {
    let ids = ctx.service_link_ids(srv).expect("link ids");
    assert_eq!(ids.len(), 1);
    ids[0]
}

#[test]
fn producer_client_posts_to_service_consumer() {
    let ctx = Context::new().expect("ctx");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let uri = ServiceUri::fifo("evt/consumer");
    let srv = ctx
        .online_service(
            ServiceArgs::new(uri.clone(), Usage::EVT_CONSUMER)
                .auto_accept()
                .with_usage_args(UsageArgs::new().with_subscription(EvtSubscription::new(
                    Consumer::from_fn(move |link, evt| {
                        sink.lock().push((link, evt.producer(), evt.evt_id, evt.evt_value));
                        Ok(())
                    }),
                    [EvtId::MOVE_STARTED, EvtId::MOVE_STOPPED],
                ))),
        )
        .expect("online");

    let producer = connect(&ctx, &uri, Usage::EVT_PRODUCER, UsageArgs::new());
    let consumer = only_link(&ctx, srv);

    ctx.post_event(producer, EvtDesc::new(EvtId::MOVE_STARTED).with_value(7), Options::new())
        .expect("post");
    assert_eq!(
        ctx.post_event(producer, EvtDesc::new(EvtId::KEEPALIVE), Options::new()),
        Err(Error::NoEventConsumer)
    );
    wait_until("delivery", || seen.lock().len() == 1);
    assert_eq!(seen.lock()[0], (consumer, Some(producer), EvtId::MOVE_STARTED, 7));
}

#[test]
fn consumer_client_subscribes_after_connect() {
    let ctx = Context::new().expect("ctx");
    let uri = ServiceUri::fifo("evt/producer");
    let srv = ctx
        .online_service(ServiceArgs::new(uri.clone(), Usage::EVT_PRODUCER).auto_accept())
        .expect("online");
    let consumer = connect(&ctx, &uri, Usage::EVT_CONSUMER, UsageArgs::new());
    let producer = only_link(&ctx, srv);

    let evt = EvtDesc::new(EvtId::HELLO);
    assert_eq!(
        ctx.post_event(producer, evt.clone(), Options::new()),
        Err(Error::NoEventConsumer)
    );

    let hits = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&hits);
    let sub = Consumer::from_fn(move |_, _| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    ctx.subscribe_event(consumer, EvtSubscription::new(sub.clone(), [EvtId::HELLO]))
        .expect("subscribe");
    ctx.post_event(producer, evt.clone(), Options::with_timeout(Duration::from_secs(1)).sync())
        .expect("sync post");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    ctx.unsubscribe_event(consumer, &sub).expect("unsubscribe");
    assert_eq!(
        ctx.post_event(producer, evt, Options::new()),
        Err(Error::NoEventConsumer)
    );
}

#[test]
fn sync_post_reports_consumer_timeout() {
    let ctx = Context::new().expect("ctx");
    let uri = ServiceUri::fifo("evt/slow");
    ctx.online_service(
        ServiceArgs::new(uri.clone(), Usage::EVT_CONSUMER)
            .auto_accept()
            .with_usage_args(UsageArgs::new().with_subscription(EvtSubscription::new(
                Consumer::from_fn(|_, _| {
                    thread::sleep(Duration::from_millis(200));
                    Ok(())
                }),
                [EvtId::HELLO],
            ))),
    )
    .expect("online");
    let producer = connect(&ctx, &uri, Usage::EVT_PRODUCER, UsageArgs::new());

    let start = Instant::now();
    assert_eq!(
        ctx.post_event(
            producer,
            EvtDesc::new(EvtId::HELLO),
            Options::with_timeout(Duration::from_millis(30)).sync(),
        ),
        Err(Error::Timeout)
    );
    assert!(start.elapsed() < Duration::from_millis(150));
}

#[test]
fn pull_on_consumer_link() {
    let ctx = Context::new().expect("ctx");
    let uri = ServiceUri::fifo("evt/pull");
    let srv = ctx
        .online_service(ServiceArgs::new(uri.clone(), Usage::EVT_PRODUCER).auto_accept())
        .expect("online");
    let consumer = connect(
        &ctx,
        &uri,
        Usage::EVT_CONSUMER,
        UsageArgs::new().with_subscription(EvtSubscription::pull([EvtId::MOVE_KEEPING])),
    );
    let producer = only_link(&ctx, srv);

    for v in 1..=3u64 {
        ctx.post_event(producer, EvtDesc::new(EvtId::MOVE_KEEPING).with_value(v), Options::new())
            .expect("post");
    }
    for v in 1..=3u64 {
        let evt = ctx.pull_event(consumer, Options::immediate()).expect("pull");
        assert_eq!(evt.evt_value, v);
    }
    assert_eq!(
        ctx.pull_event(consumer, Options::immediate()).map(|e| e.evt_value),
        Err(Error::NoEventPending)
    );
    assert_eq!(
        ctx.pull_event(producer, Options::immediate()).map(|e| e.evt_value),
        Err(Error::IncompatibleUsage)
    );
}

#[test]
fn broadcast_reaches_every_consumer() {
    let ctx = Context::new().expect("ctx");
    let uri = ServiceUri::fifo("evt/bcast");
    let srv = ctx
        .online_service(
            ServiceArgs::new(uri.clone(), Usage::EVT_PRODUCER)
                .auto_accept()
                .broadcast_event(),
        )
        .expect("online");

    let hits = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let seen = Arc::clone(&hits);
        connect(
            &ctx,
            &uri,
            Usage::EVT_CONSUMER,
            UsageArgs::new().with_subscription(EvtSubscription::new(
                Consumer::from_fn(move |_, _| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                [EvtId::KEEPALIVE],
            )),
        );
    }
    assert_eq!(ctx.service_link_ids(srv).expect("ids").len(), 3);

    ctx.broadcast_event(srv, EvtDesc::new(EvtId::KEEPALIVE), Options::new())
        .expect("broadcast");
    wait_until("three deliveries", || hits.load(Ordering::SeqCst) == 3);
    assert_eq!(
        ctx.broadcast_event(srv, EvtDesc::new(EvtId::HELLO), Options::new()),
        Err(Error::NoEventConsumer)
    );
}

#[test]
fn broadcast_requires_flag() {
    let ctx = Context::new().expect("ctx");
    let srv = ctx
        .online_service(ServiceArgs::new(ServiceUri::fifo("evt/nobcast"), Usage::EVT_PRODUCER))
        .expect("online");
    assert_eq!(
        ctx.broadcast_event(srv, EvtDesc::new(EvtId::HELLO), Options::new()),
        Err(Error::NotSupportedBroadcast)
    );
}

#[test]
fn post_after_peer_close_is_link_broken() {
    let ctx = Context::new().expect("ctx");
    let uri = ServiceUri::fifo("evt/close");
    let srv = ctx
        .online_service(
            ServiceArgs::new(uri.clone(), Usage::EVT_CONSUMER)
                .auto_accept()
                .with_usage_args(
                    UsageArgs::new().with_subscription(EvtSubscription::pull([EvtId::HELLO])),
                ),
        )
        .expect("online");
    let producer = connect(&ctx, &uri, Usage::EVT_PRODUCER, UsageArgs::new());
    ctx.close_link(only_link(&ctx, srv)).expect("close consumer");

    assert_eq!(
        ctx.post_event(producer, EvtDesc::new(EvtId::HELLO), Options::new()),
        Err(Error::LinkBroken)
    );
    assert!(ctx.service_link_ids(srv).expect("ids").is_empty());
}
