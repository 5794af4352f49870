// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure

//! Link state and usage introspection.

use ioc::{
    Capability, CapabilityId, ConnArgs, Context, Error, IocConfig, LinkId, LinkMainState,
    LinkState, LinkSubState, Options, ServiceArgs, ServiceUri, Usage,
};
use std::time::Duration;

const PAIRS: [(Usage, LinkSubState, LinkSubState); 3] = [
    (
        Usage::EVT_PRODUCER,
        LinkSubState::EvtProducerReady,
        LinkSubState::EvtConsumerReady,
    ),
    (
        Usage::CMD_EXECUTOR,
        LinkSubState::CmdExecutorReady,
        LinkSubState::CmdInitiatorReady,
    ),
    (
        Usage::DAT_RECEIVER,
        LinkSubState::DatReceiverReady,
        LinkSubState::DatSenderReady,
    ),
];

#[test]
fn fresh_links_are_ready_for_their_role() {
    let ctx = Context::new().expect("ctx");
    for (n, (service_usage, service_sub, client_sub)) in PAIRS.into_iter().enumerate() {
        let uri = ServiceUri::fifo(format!("state/{}", n));
        let srv = ctx
            .online_service(ServiceArgs::new(uri.clone(), service_usage).auto_accept())
            .expect("online");
        let client_usage = service_usage.complement();
        let client = ctx
            .connect_service(
                &ConnArgs::new(uri, client_usage),
                Options::with_timeout(Duration::from_secs(2)),
            )
            .expect("connect");
        let accepted = ctx.service_link_ids(srv).expect("ids")[0];

        let client_state = ctx.get_link_state(client).expect("client state");
        assert_eq!(client_state, LinkState::of(client_sub));
        assert_eq!(client_state.main, LinkMainState::Ready);
        assert!(client_state.is_consistent_with(client_usage));

        let accepted_state = ctx.get_link_state(accepted).expect("accepted state");
        assert_eq!(accepted_state, LinkState::of(service_sub));
        assert!(accepted_state.is_consistent_with(service_usage));
        assert!(!accepted_state.is_consistent_with(client_usage));

        assert_eq!(ctx.get_link_usage(client), Ok(client_usage));
        assert_eq!(ctx.get_link_usage(accepted), Ok(service_usage));
    }
}

#[test]
fn peer_close_breaks_and_close_removes() {
    let ctx = Context::new().expect("ctx");
    let uri = ServiceUri::fifo("state/close");
    let srv = ctx
        .online_service(ServiceArgs::new(uri.clone(), Usage::EVT_PRODUCER).auto_accept())
        .expect("online");
    let client = ctx
        .connect_service(
            &ConnArgs::new(uri, Usage::EVT_CONSUMER),
            Options::with_timeout(Duration::from_secs(2)),
        )
        .expect("connect");
    let accepted = ctx.service_link_ids(srv).expect("ids")[0];
    assert_eq!(ctx.link_count(), 2);

    ctx.close_link(accepted).expect("close");
    assert_eq!(ctx.get_link_state(accepted), Err(Error::NotExistLink));
    assert_eq!(ctx.get_link_usage(accepted), Err(Error::NotExistLink));
    assert_eq!(ctx.close_link(accepted), Err(Error::NotExistLink));

    let broken = ctx.get_link_state(client).expect("state");
    assert_eq!(broken, LinkState::BROKEN);
    assert!(broken.is_consistent_with(Usage::EVT_CONSUMER));
    // Usage is still reported for a broken link.
    assert_eq!(ctx.get_link_usage(client), Ok(Usage::EVT_CONSUMER));

    ctx.close_link(client).expect("close broken");
    assert_eq!(ctx.link_count(), 0);
    assert!(ctx.service_link_ids(srv).expect("ids").is_empty());
}

#[test]
fn conles_handle_has_no_link_state() {
    let ctx = Context::new().expect("ctx");
    assert!(LinkId::CONLES_AUTO.is_conles());
    assert_eq!(
        ctx.get_link_state(LinkId::CONLES_AUTO),
        Err(Error::NotExistLink)
    );
    assert_eq!(ctx.close_link(LinkId::CONLES_AUTO), Err(Error::NotExistLink));
}

#[test]
fn capabilities_follow_config() {
    let ctx = Context::builder()
        .config(
            IocConfig::default()
                .with_max_evt_consumers(5)
                .with_evt_queue_depth(7)
                .with_max_links(9),
        )
        .build()
        .expect("ctx");
    assert_eq!(
        ctx.get_capability(CapabilityId::ConlesModeEvent),
        Capability::ConlesModeEvent {
            max_evt_consumers: 5,
            evt_queue_depth: 7,
        }
    );
    match ctx.get_capability(CapabilityId::Registry) {
        Capability::Registry { max_links, .. } => assert_eq!(max_links, 9),
        other => panic!("unexpected {:?}", other),
    }

    ctx.update_config(IocConfig::default().with_max_links(11))
        .expect("update");
    match ctx.get_capability(CapabilityId::Registry) {
        Capability::Registry { max_links, .. } => assert_eq!(max_links, 11),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        ctx.update_config(IocConfig::default().with_max_links(0)),
        Err(Error::InvalidParam)
    );
}
