// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IOC configuration - single source of truth for limits and defaults.
//!
//! - **Level 1 (Static)**: compile-time defaults as named constants
//! - **Level 2 (Dynamic)**: [`IocConfig`], held by the
//!   [`Context`](crate::Context) as an atomically swappable snapshot
//!
//! # Example
//!
//! ```
//! use ioc::config::IocConfig;
//! use std::time::Duration;
//!
//! let config = IocConfig::default()
//!     .with_worker_threads(2)
//!     .with_evt_queue_depth(128)
//!     .with_default_timeout(Duration::from_secs(1));
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{Error, Result};
use std::time::Duration;

// =======================================================================
// Limits
// =======================================================================

/// Maximum number of services online at once in one context.
pub const MAX_SERVICES: usize = 64;

/// Maximum number of live links in one context.
pub const MAX_LINKS: usize = 1024;

/// Maximum callback/pull consumers per event scope.
pub const MAX_EVT_CONSUMERS: usize = 16;

/// Events queued per subscriber before posts fail with `TooManyItems`.
pub const EVT_QUEUE_DEPTH: usize = 64;

/// Commands queued on an executor link (poll mode or callback backlog).
pub const CMD_QUEUE_DEPTH: usize = 16;

/// Connections waiting for `accept_client` per service.
pub const ACCEPT_BACKLOG: usize = 16;

// =======================================================================
// Data streaming
// =======================================================================

/// Per-link send buffer (bytes).
pub const DAT_SEND_BUFFER: usize = 64 * 1024;

/// Per-link receive buffer (bytes).
pub const DAT_RECV_BUFFER: usize = 64 * 1024;

/// Largest data chunk put on the transport in one frame.
pub const DAT_CHUNK_SIZE: usize = 8 * 1024;

// =======================================================================
// Timing
// =======================================================================

/// Timeout used when neither the options nor the descriptor carry one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval of background loops (acceptors, backpressure retries).
pub const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Dispatch worker threads.
pub const WORKER_THREADS: usize = 4;

// =======================================================================
// TCP
// =======================================================================

/// Maximum framed message size accepted from a peer (anti-OOM).
pub const TCP_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// TCP transport configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpConfig {
    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub nodelay: bool,

    /// Listen backlog passed to `listen(2)`
    pub listen_backlog: i32,

    /// Upper bound for the TCP connect phase (the caller's timeout still applies)
    pub connect_timeout: Duration,

    /// How long the acceptor waits for a client's hello frame
    pub handshake_timeout: Duration,

    /// Write stall tolerated before a send reports `WouldBlock`
    pub write_timeout: Duration,

    /// Maximum message size in bytes
    pub max_message_size: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            listen_backlog: 128,
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_millis(50),
            max_message_size: TCP_MAX_MESSAGE_SIZE,
        }
    }
}

/// Runtime configuration of one IOC context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IocConfig {
    /// Threads serving subscriber/executor/receiver mailboxes
    pub worker_threads: usize,
    /// Maximum online services
    pub max_services: usize,
    /// Maximum live links
    pub max_links: usize,
    /// Maximum consumers per event scope
    pub max_evt_consumers: usize,
    /// Queue depth per event subscriber
    pub evt_queue_depth: usize,
    /// Queue depth per command executor link
    pub cmd_queue_depth: usize,
    /// Pending connections per service
    pub accept_backlog: usize,
    /// Send buffer per DatSender link (bytes)
    pub dat_send_buffer: usize,
    /// Receive buffer per DatReceiver link (bytes)
    pub dat_recv_buffer: usize,
    /// Data chunk size (bytes)
    pub dat_chunk_size: usize,
    /// Timeout applied when the caller does not provide one
    pub default_timeout: Duration,
    /// TCP binding settings
    pub tcp: TcpConfig,
}

impl Default for IocConfig {
    fn default() -> Self {
        Self {
            worker_threads: WORKER_THREADS,
            max_services: MAX_SERVICES,
            max_links: MAX_LINKS,
            max_evt_consumers: MAX_EVT_CONSUMERS,
            evt_queue_depth: EVT_QUEUE_DEPTH,
            cmd_queue_depth: CMD_QUEUE_DEPTH,
            accept_backlog: ACCEPT_BACKLOG,
            dat_send_buffer: DAT_SEND_BUFFER,
            dat_recv_buffer: DAT_RECV_BUFFER,
            dat_chunk_size: DAT_CHUNK_SIZE,
            default_timeout: DEFAULT_TIMEOUT,
            tcp: TcpConfig::default(),
        }
    }
}

impl IocConfig {
    /// Builder: set dispatch worker threads
    pub fn with_worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n;
        self
    }

    /// Builder: set event queue depth per subscriber
    pub fn with_evt_queue_depth(mut self, depth: usize) -> Self {
        self.evt_queue_depth = depth;
        self
    }

    /// Builder: set maximum consumers per event scope
    pub fn with_max_evt_consumers(mut self, n: usize) -> Self {
        self.max_evt_consumers = n;
        self
    }

    /// Builder: set maximum online services
    pub fn with_max_services(mut self, n: usize) -> Self {
        self.max_services = n;
        self
    }

    /// Builder: set maximum live links
    pub fn with_max_links(mut self, n: usize) -> Self {
        self.max_links = n;
        self
    }

    /// Builder: set data buffer sizes (send, receive)
    pub fn with_dat_buffers(mut self, send: usize, recv: usize) -> Self {
        self.dat_send_buffer = send;
        self.dat_recv_buffer = recv;
        self
    }

    /// Builder: set data chunk size
    pub fn with_dat_chunk_size(mut self, size: usize) -> Self {
        self.dat_chunk_size = size;
        self
    }

    /// Builder: set default timeout
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Builder: set TCP settings
    pub fn with_tcp(mut self, tcp: TcpConfig) -> Self {
        self.tcp = tcp;
        self
    }

    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            self.worker_threads,
            self.max_services,
            self.max_links,
            self.max_evt_consumers,
            self.evt_queue_depth,
            self.cmd_queue_depth,
            self.accept_backlog,
            self.dat_send_buffer,
            self.dat_recv_buffer,
            self.dat_chunk_size,
        ];
        if non_zero.contains(&0) {
            return Err(Error::InvalidParam);
        }
        // A chunk must always fit in an empty buffer on both sides.
        if self.dat_chunk_size > self.dat_send_buffer || self.dat_chunk_size > self.dat_recv_buffer
        {
            return Err(Error::InvalidParam);
        }
        if self.tcp.max_message_size < self.dat_chunk_size + 64 {
            return Err(Error::InvalidParam);
        }
        Ok(())
    }
}

#[cfg(feature = "config-yaml")]
mod yaml {
    use super::{IocConfig, TcpConfig};
    use crate::error::{Error, Result};
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Deserialize, Default)]
    #[serde(default, deny_unknown_fields)]
    struct RawTcp {
        nodelay: Option<bool>,
        listen_backlog: Option<i32>,
        connect_timeout_ms: Option<u64>,
        handshake_timeout_ms: Option<u64>,
        write_timeout_ms: Option<u64>,
        max_message_size: Option<usize>,
    }

    #[derive(Deserialize, Default)]
    #[serde(default, deny_unknown_fields)]
    struct RawConfig {
        worker_threads: Option<usize>,
        max_services: Option<usize>,
        max_links: Option<usize>,
        max_evt_consumers: Option<usize>,
        evt_queue_depth: Option<usize>,
        cmd_queue_depth: Option<usize>,
        accept_backlog: Option<usize>,
        dat_send_buffer: Option<usize>,
        dat_recv_buffer: Option<usize>,
        dat_chunk_size: Option<usize>,
        default_timeout_ms: Option<u64>,
        tcp: RawTcp,
    }

    impl IocConfig {
        /// Parse a YAML document; missing keys keep their defaults.
        ///
        /// ```ignore
        /// let config = IocConfig::from_yaml_str("worker_threads: 2\ntcp:\n  nodelay: false\n")?;
        /// ```
        pub fn from_yaml_str(text: &str) -> Result<Self> {
            let raw: RawConfig = serde_yaml::from_str(text).map_err(|e| {
                log::warn!("[IOC] config: invalid YAML: {}", e);
                Error::InvalidParam
            })?;
            let d = IocConfig::default();
            let t = TcpConfig::default();
            let config = IocConfig {
                worker_threads: raw.worker_threads.unwrap_or(d.worker_threads),
                max_services: raw.max_services.unwrap_or(d.max_services),
                max_links: raw.max_links.unwrap_or(d.max_links),
                max_evt_consumers: raw.max_evt_consumers.unwrap_or(d.max_evt_consumers),
                evt_queue_depth: raw.evt_queue_depth.unwrap_or(d.evt_queue_depth),
                cmd_queue_depth: raw.cmd_queue_depth.unwrap_or(d.cmd_queue_depth),
                accept_backlog: raw.accept_backlog.unwrap_or(d.accept_backlog),
                dat_send_buffer: raw.dat_send_buffer.unwrap_or(d.dat_send_buffer),
                dat_recv_buffer: raw.dat_recv_buffer.unwrap_or(d.dat_recv_buffer),
                dat_chunk_size: raw.dat_chunk_size.unwrap_or(d.dat_chunk_size),
                default_timeout: raw
                    .default_timeout_ms
                    .map_or(d.default_timeout, Duration::from_millis),
                tcp: TcpConfig {
                    nodelay: raw.tcp.nodelay.unwrap_or(t.nodelay),
                    listen_backlog: raw.tcp.listen_backlog.unwrap_or(t.listen_backlog),
                    connect_timeout: raw
                        .tcp
                        .connect_timeout_ms
                        .map_or(t.connect_timeout, Duration::from_millis),
                    handshake_timeout: raw
                        .tcp
                        .handshake_timeout_ms
                        .map_or(t.handshake_timeout, Duration::from_millis),
                    write_timeout: raw
                        .tcp
                        .write_timeout_ms
                        .map_or(t.write_timeout, Duration::from_millis),
                    max_message_size: raw.tcp.max_message_size.unwrap_or(t.max_message_size),
                },
            };
            config.validate()?;
            Ok(config)
        }

        /// Load a YAML file from disk.
        pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
            let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
                log::warn!(
                    "[IOC] config: cannot read {}: {}",
                    path.as_ref().display(),
                    e
                );
                Error::InvalidParam
            })?;
            Self::from_yaml_str(&text)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(IocConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let config = IocConfig::default().with_worker_threads(0);
        assert_eq!(config.validate(), Err(Error::InvalidParam));

        let config = IocConfig::default().with_evt_queue_depth(0);
        assert_eq!(config.validate(), Err(Error::InvalidParam));
    }

    #[test]
    fn chunk_must_fit_buffers() {
        let config = IocConfig::default()
            .with_dat_buffers(4096, 4096)
            .with_dat_chunk_size(8192);
        assert_eq!(config.validate(), Err(Error::InvalidParam));

        let config = config.with_dat_chunk_size(1024);
        assert!(config.validate().is_ok());
    }
}
