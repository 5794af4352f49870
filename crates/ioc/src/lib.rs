// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # IOC - Inter-Object Communication
//!
//! Events, commands and data streams between objects in one process (FIFO
//! links) or across processes (TCP links), behind one API.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ioc::{Consumer, Context, EvtDesc, EvtId, EvtSubscription, LinkId, Options, Result};
//!
//! fn main() -> Result<()> {
//!     let ctx = Context::new()?;
//!
//!     // Connection-less: anyone in the context can post, subscribers react.
//!     ctx.subscribe_event(
//!         LinkId::CONLES_AUTO,
//!         EvtSubscription::new(
//!             Consumer::from_fn(|_link, evt| {
//!                 println!("got {:?}", evt.evt_id);
//!                 Ok(())
//!             }),
//!             [EvtId::KEEPALIVE],
//!         ),
//!     )?;
//!     ctx.post_event(LinkId::CONLES_AUTO, EvtDesc::new(EvtId::KEEPALIVE), Options::new())?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |                    Context (public API)                       |
//! |   services | links | conles scope | config snapshot           |
//! +---------------------------------------------------------------+
//! |                      Dispatch                                 |
//! |   event hubs | command slots | data buffers | worker pool      |
//! +---------------------------------------------------------------+
//! |                    Link state machine                         |
//! |   Undefined -> Ready <-> Busy{..} -> Broken                   |
//! +---------------------------------------------------------------+
//! |                      Transports                               |
//! |   FIFO (in-process hand-off) | TCP (length-prefixed frames)   |
//! +---------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Context`] | Owns services and links; every operation lives here |
//! | [`ServiceArgs`] / [`ConnArgs`] | Online a service / connect to one |
//! | [`EvtDesc`] | Event: id, value, optional payload |
//! | [`CmdDesc`] | Command: id, input, output, status, result |
//! | [`DatDesc`] | Chunk of a data stream |
//! | [`Options`] | Timeout and sync flag of blocking calls |
//!
//! ## Features
//!
//! - `config-yaml`: load [`IocConfig`] from YAML

pub mod config;
pub mod error;
pub mod options;
pub mod transport;

mod capability;
mod context;
mod dispatch;
mod ids;
mod link;
mod service;
mod usage;

pub use capability::{Capability, CapabilityId};
pub use config::{IocConfig, TcpConfig};
pub use context::{Context, ContextBuilder};
pub use dispatch::command::{CmdDesc, CmdStatus, CommandExecutor};
pub use dispatch::data::{DatDesc, DataReceiver};
pub use dispatch::event::{Consumer, EventConsumer, EvtDesc, EvtSubscription};
pub use error::{Error, Limit, Result};
pub use ids::{CmdId, EvtId, LinkId, ServiceId};
pub use link::state::{LinkMainState, LinkState, LinkSubState};
pub use link::UsageArgs;
pub use options::{Deadline, Options, Timeout};
pub use service::{ConnArgs, ServiceArgs, ServiceFlags, ServiceUri, FIFO_HOST};
pub use usage::Usage;
