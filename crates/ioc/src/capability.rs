// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Static capability description of a context.

use crate::config::IocConfig;

/// What to describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityId {
    ConlesModeEvent,
    ConetModeEvent,
    ConetModeCommand,
    ConetModeData,
    Registry,
}

/// Limits in force for one area, read from the context configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ConlesModeEvent {
        max_evt_consumers: usize,
        evt_queue_depth: usize,
    },
    ConetModeEvent {
        max_evt_consumers: usize,
        evt_queue_depth: usize,
    },
    ConetModeCommand {
        max_pending_cmds: usize,
    },
    ConetModeData {
        send_buffer: usize,
        recv_buffer: usize,
        chunk_size: usize,
    },
    Registry {
        max_services: usize,
        max_links: usize,
    },
}

impl Capability {
    pub(crate) fn describe(id: CapabilityId, cfg: &IocConfig) -> Self {
        match id {
            CapabilityId::ConlesModeEvent => Capability::ConlesModeEvent {
                max_evt_consumers: cfg.max_evt_consumers,
                evt_queue_depth: cfg.evt_queue_depth,
            },
            CapabilityId::ConetModeEvent => Capability::ConetModeEvent {
                max_evt_consumers: cfg.max_evt_consumers,
                evt_queue_depth: cfg.evt_queue_depth,
            },
            CapabilityId::ConetModeCommand => Capability::ConetModeCommand {
                max_pending_cmds: cfg.cmd_queue_depth,
            },
            CapabilityId::ConetModeData => Capability::ConetModeData {
                send_buffer: cfg.dat_send_buffer,
                recv_buffer: cfg.dat_recv_buffer,
                chunk_size: cfg.dat_chunk_size,
            },
            CapabilityId::Registry => Capability::Registry {
                max_services: cfg.max_services,
                max_links: cfg.max_links,
            },
        }
    }
}
