// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure

//! Service online/offline, accepting clients, and registry limits.

use ioc::{
    CmdDesc, CmdId, ConnArgs, Context, Error, IocConfig, Limit, LinkId, LinkMainState, Options,
    ServiceArgs, ServiceId, ServiceUri, Usage, UsageArgs,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn pong(_link: LinkId, cmd: &mut CmdDesc) -> ioc::Result<()> {
    cmd.set_output(b"PONG".to_vec());
    Ok(())
}

fn ping(ctx: &Context, link: LinkId) -> ioc::Result<Vec<u8>> {
    let mut cmd = CmdDesc::new(CmdId::PING);
    ctx.exec_cmd(link, &mut cmd, Options::with_timeout(Duration::from_secs(2)))?;
    Ok(cmd.output().to_vec())
}

fn connect(ctx: &Context, uri: &ServiceUri, usage: Usage) -> ioc::Result<LinkId> {
    ctx.connect_service(
        &ConnArgs::new(uri.clone(), usage),
        Options::with_timeout(Duration::from_secs(2)),
    )
}

#[test]
fn online_then_offline() {
    let ctx = Context::new().expect("ctx");
    let uri = ServiceUri::fifo("svc/basic");
    let srv = ctx
        .online_service(ServiceArgs::new(uri.clone(), Usage::EVT_PRODUCER))
        .expect("online");
    assert_eq!(ctx.service_count(), 1);
    assert_eq!(ctx.service_uri(srv), Ok(uri.clone()));

    ctx.offline_service(srv).expect("offline");
    assert_eq!(ctx.service_count(), 0);
    assert_eq!(ctx.offline_service(srv), Err(Error::NotExistService));
    assert_eq!(
        connect(&ctx, &uri, Usage::EVT_CONSUMER),
        Err(Error::NotExistService)
    );

    // The name is free again.
    ctx.online_service(ServiceArgs::new(uri, Usage::EVT_PRODUCER))
        .expect("online again");
}

#[test]
fn invalid_service_args() {
    let ctx = Context::new().expect("ctx");
    assert_eq!(
        ctx.online_service(ServiceArgs::new(ServiceUri::fifo(""), Usage::EVT_PRODUCER)),
        Err(Error::InvalidParam)
    );
    assert_eq!(
        ctx.online_service(ServiceArgs::new(ServiceUri::fifo("svc/none"), Usage::NONE)),
        Err(Error::InvalidParam)
    );
    assert_eq!(
        ctx.online_service(
            ServiceArgs::new(ServiceUri::fifo("svc/bcast"), Usage::CMD_EXECUTOR).broadcast_event()
        ),
        Err(Error::InvalidParam)
    );
    assert_eq!(ctx.service_count(), 0);
}

#[test]
fn duplicate_fifo_name_conflicts() {
    let ctx = Context::new().expect("ctx");
    let uri = ServiceUri::fifo("svc/dup");
    ctx.online_service(ServiceArgs::new(uri.clone(), Usage::EVT_PRODUCER))
        .expect("first");
    assert_eq!(
        ctx.online_service(ServiceArgs::new(uri, Usage::CMD_EXECUTOR)),
        Err(Error::ConflictingArgs)
    );
    assert_eq!(ctx.service_count(), 1);
}

#[test]
fn tcp_port_in_use_leaves_first_service_usable() {
    let ctx = Context::new().expect("ctx");
    let srv = ctx
        .online_service(
            ServiceArgs::new(ServiceUri::tcp("127.0.0.1", 0, "svc/tcp"), Usage::CMD_EXECUTOR)
                .auto_accept()
                .with_usage_args(UsageArgs::new().with_executor(pong)),
        )
        .expect("online");
    let uri = ctx.service_uri(srv).expect("uri");
    assert_ne!(uri.port(), 0);

    assert_eq!(
        ctx.online_service(ServiceArgs::new(
            ServiceUri::tcp("127.0.0.1", uri.port(), "svc/other"),
            Usage::CMD_EXECUTOR,
        )),
        Err(Error::PortInUse)
    );

    let link = connect(&ctx, &uri, Usage::CMD_INITIATOR).expect("connect");
    assert_eq!(ping(&ctx, link), Ok(b"PONG".to_vec()));
}

#[test]
fn manual_accept() {
    let ctx = Context::new().expect("ctx");
    let uri = ServiceUri::fifo("svc/manual");
    let srv = ctx
        .online_service(
            ServiceArgs::new(uri.clone(), Usage::CMD_EXECUTOR)
                .with_usage_args(UsageArgs::new().with_executor(pong)),
        )
        .expect("online");

    assert_eq!(
        ctx.accept_client(srv, Options::immediate()),
        Err(Error::Timeout)
    );

    let client = {
        let ctx = Arc::clone(&ctx);
        let uri = uri.clone();
        thread::spawn(move || connect(&ctx, &uri, Usage::CMD_INITIATOR))
    };
    let accepted = ctx
        .accept_client(srv, Options::with_timeout(Duration::from_secs(2)))
        .expect("accept");
    let link = client.join().expect("join").expect("connect");

    assert_eq!(ctx.get_link_usage(accepted), Ok(Usage::CMD_EXECUTOR));
    assert_eq!(ctx.get_link_usage(link), Ok(Usage::CMD_INITIATOR));
    assert_eq!(ctx.service_link_ids(srv), Ok(vec![accepted]));
    assert_eq!(ping(&ctx, link), Ok(b"PONG".to_vec()));
}

#[test]
fn unaccepted_client_times_out() {
    let ctx = Context::new().expect("ctx");
    let uri = ServiceUri::fifo("svc/ignored");
    let srv = ctx
        .online_service(ServiceArgs::new(uri.clone(), Usage::EVT_PRODUCER))
        .expect("online");

    let start = Instant::now();
    assert_eq!(
        ctx.connect_service(
            &ConnArgs::new(uri, Usage::EVT_CONSUMER),
            Options::with_timeout(Duration::from_millis(50)),
        ),
        Err(Error::Timeout)
    );
    assert!(start.elapsed() < Duration::from_millis(500));

    // The abandoned request is skipped by a later accept.
    assert_eq!(
        ctx.accept_client(srv, Options::with_timeout(Duration::from_millis(50))),
        Err(Error::Timeout)
    );
    assert_eq!(ctx.link_count(), 0);
}

#[test]
fn accept_client_with_auto_accept_is_not_supported() {
    let ctx = Context::new().expect("ctx");
    let srv = ctx
        .online_service(
            ServiceArgs::new(ServiceUri::fifo("svc/auto"), Usage::EVT_PRODUCER).auto_accept(),
        )
        .expect("online");
    assert_eq!(
        ctx.accept_client(srv, Options::immediate()),
        Err(Error::NotSupported)
    );
}

#[test]
fn connect_argument_checks() {
    let ctx = Context::new().expect("ctx");
    let uri = ServiceUri::fifo("svc/checks");
    ctx.online_service(ServiceArgs::new(uri.clone(), Usage::EVT_PRODUCER).auto_accept())
        .expect("online");

    assert_eq!(
        connect(&ctx, &ServiceUri::fifo("svc/missing"), Usage::EVT_CONSUMER),
        Err(Error::NotExistService)
    );
    assert_eq!(
        connect(&ctx, &uri, Usage::CMD_INITIATOR),
        Err(Error::IncompatibleUsage)
    );
    assert_eq!(
        connect(&ctx, &uri, Usage::EVT_CONSUMER | Usage::CMD_INITIATOR),
        Err(Error::InvalidParam)
    );
    assert_eq!(connect(&ctx, &uri, Usage::NONE), Err(Error::InvalidParam));
    assert_eq!(ctx.link_count(), 0);
}

#[test]
fn multi_capability_service_serves_each_role() {
    let ctx = Context::new().expect("ctx");
    let uri = ServiceUri::fifo("svc/multi");
    let srv = ctx
        .online_service(
            ServiceArgs::new(uri.clone(), Usage::EVT_PRODUCER | Usage::CMD_EXECUTOR)
                .auto_accept()
                .with_usage_args(UsageArgs::new().with_executor(pong)),
        )
        .expect("online");
    let consumer = connect(&ctx, &uri, Usage::EVT_CONSUMER).expect("consumer");
    let initiator = connect(&ctx, &uri, Usage::CMD_INITIATOR).expect("initiator");

    let mut usages: Vec<Usage> = ctx
        .service_link_ids(srv)
        .expect("ids")
        .into_iter()
        .map(|id| ctx.get_link_usage(id).expect("usage"))
        .collect();
    usages.sort_by_key(|u| u.bits());
    let mut expected = vec![Usage::EVT_PRODUCER, Usage::CMD_EXECUTOR];
    expected.sort_by_key(|u| u.bits());
    assert_eq!(usages, expected);

    assert_eq!(ping(&ctx, initiator), Ok(b"PONG".to_vec()));
    assert_eq!(ctx.get_link_usage(consumer), Ok(Usage::EVT_CONSUMER));
}

#[test]
fn offline_closes_accepted_links() {
    let ctx = Context::new().expect("ctx");
    let uri = ServiceUri::fifo("svc/close-links");
    let srv = ctx
        .online_service(
            ServiceArgs::new(uri.clone(), Usage::CMD_EXECUTOR)
                .auto_accept()
                .with_usage_args(UsageArgs::new().with_executor(pong)),
        )
        .expect("online");
    let link = connect(&ctx, &uri, Usage::CMD_INITIATOR).expect("connect");
    let accepted = ctx.service_link_ids(srv).expect("ids")[0];

    ctx.offline_service(srv).expect("offline");
    assert_eq!(ctx.get_link_state(accepted), Err(Error::NotExistLink));
    assert_eq!(
        ctx.get_link_state(link).map(|s| s.main),
        Ok(LinkMainState::Broken)
    );
    assert_eq!(ping(&ctx, link), Err(Error::LinkBroken));
    ctx.close_link(link).expect("client still closable");
}

#[test]
fn keep_accepted_link_survives_offline() {
    let ctx = Context::new().expect("ctx");
    let uri = ServiceUri::fifo("svc/keep");
    let srv = ctx
        .online_service(
            ServiceArgs::new(uri.clone(), Usage::CMD_EXECUTOR)
                .auto_accept()
                .keep_accepted_link()
                .with_usage_args(UsageArgs::new().with_executor(pong)),
        )
        .expect("online");
    let link = connect(&ctx, &uri, Usage::CMD_INITIATOR).expect("connect");
    let accepted = ctx.service_link_ids(srv).expect("ids")[0];

    ctx.offline_service(srv).expect("offline");
    assert_eq!(ctx.get_link_usage(accepted), Ok(Usage::CMD_EXECUTOR));
    assert_eq!(ping(&ctx, link), Ok(b"PONG".to_vec()));

    ctx.close_link(accepted).expect("close detached link");
    assert_eq!(ping(&ctx, link), Err(Error::LinkBroken));
}

#[test]
fn service_link_ids_buffer() {
    let ctx = Context::new().expect("ctx");
    let uri = ServiceUri::fifo("svc/ids");
    let srv = ctx
        .online_service(ServiceArgs::new(uri.clone(), Usage::EVT_PRODUCER).auto_accept())
        .expect("online");
    for _ in 0..3 {
        connect(&ctx, &uri, Usage::EVT_CONSUMER).expect("connect");
    }
    let all = ctx.service_link_ids(srv).expect("ids");
    assert_eq!(all.len(), 3);

    let mut big = [LinkId::CONLES_AUTO; 8];
    assert_eq!(ctx.get_service_link_ids(srv, &mut big), Ok(3));
    assert_eq!(&big[..3], &all[..]);

    let mut small = [LinkId::CONLES_AUTO; 2];
    assert_eq!(
        ctx.get_service_link_ids(srv, &mut small),
        Err(Error::BufferTooSmall)
    );
    assert_eq!(&small[..], &all[..2]);

    ctx.offline_service(srv).expect("offline");
    assert_eq!(
        ctx.get_service_link_ids(srv, &mut big),
        Err(Error::NotExistService)
    );
}

#[test]
fn registry_limits() {
    let ctx = Context::builder()
        .config(IocConfig::default().with_max_services(2).with_max_links(2))
        .build()
        .expect("ctx");
    let a = ServiceUri::fifo("svc/limit-a");
    ctx.online_service(ServiceArgs::new(a.clone(), Usage::EVT_PRODUCER).auto_accept())
        .expect("a");
    ctx.online_service(ServiceArgs::new(ServiceUri::fifo("svc/limit-b"), Usage::EVT_PRODUCER))
        .expect("b");
    assert_eq!(
        ctx.online_service(ServiceArgs::new(
            ServiceUri::fifo("svc/limit-c"),
            Usage::EVT_PRODUCER
        )),
        Err(Error::TooManyItems(Limit::Services))
    );

    // One FIFO connection takes both link slots.
    connect(&ctx, &a, Usage::EVT_CONSUMER).expect("first");
    assert_eq!(ctx.link_count(), 2);
    assert_eq!(
        connect(&ctx, &a, Usage::EVT_CONSUMER),
        Err(Error::TooManyItems(Limit::Links))
    );
}

#[test]
fn auto_accept_hook_sees_each_link() {
    let ctx = Context::new().expect("ctx");
    let uri = ServiceUri::fifo("svc/hook");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let srv = ctx
        .online_service(
            ServiceArgs::new(uri.clone(), Usage::EVT_PRODUCER)
                .auto_accept()
                .on_auto_accepted(move |srv: ServiceId, link: LinkId| sink.lock().push((srv, link))),
        )
        .expect("online");
    for _ in 0..2 {
        connect(&ctx, &uri, Usage::EVT_CONSUMER).expect("connect");
    }

    let start = Instant::now();
    while seen.lock().len() < 2 {
        assert!(start.elapsed() < Duration::from_secs(2), "hook not called");
        thread::sleep(Duration::from_millis(1));
    }
    let links = ctx.service_link_ids(srv).expect("ids");
    let hooked: Vec<(ServiceId, LinkId)> = links.iter().map(|&l| (srv, l)).collect();
    assert_eq!(*seen.lock(), hooked);
}

#[test]
fn offline_refuses_queued_clients() {
    let ctx = Context::new().expect("ctx");
    let uri = ServiceUri::fifo("svc/refuse");
    let srv = ctx
        .online_service(ServiceArgs::new(uri.clone(), Usage::EVT_PRODUCER))
        .expect("online");
    let client = {
        let ctx = Arc::clone(&ctx);
        thread::spawn(move || {
            ctx.connect_service(
                &ConnArgs::new(uri, Usage::EVT_CONSUMER),
                Options::with_timeout(Duration::from_secs(5)),
            )
        })
    };
    thread::sleep(Duration::from_millis(50));
    let start = Instant::now();
    ctx.offline_service(srv).expect("offline");
    assert_eq!(client.join().expect("join"), Err(Error::NotExistService));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(ctx.link_count(), 0);
}

#[test]
fn closed_context_refuses_new_work() {
    let ctx = Context::new().expect("ctx");
    ctx.shutdown();
    assert_eq!(
        ctx.online_service(ServiceArgs::new(ServiceUri::fifo("svc/late"), Usage::EVT_PRODUCER)),
        Err(Error::NotSupported)
    );
    assert_eq!(
        connect(&ctx, &ServiceUri::fifo("svc/late"), Usage::EVT_CONSUMER),
        Err(Error::NotSupported)
    );
}
