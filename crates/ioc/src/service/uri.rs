// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service URIs: `fifo://localprocess/<path>` and `tcp://<host>:<port>/<path>`.

use crate::error::{Error, Result};
use crate::transport::Protocol;
use std::fmt;
use std::str::FromStr;

/// Host used by in-process services.
pub const FIFO_HOST: &str = "localprocess";

/// Where a service lives.
///
/// ```
/// use ioc::ServiceUri;
///
/// let uri: ServiceUri = "tcp://127.0.0.1:9100/robot/arm".parse().unwrap();
/// assert_eq!(uri.port(), 9100);
/// assert_eq!(uri.path(), "robot/arm");
/// assert_eq!(uri.to_string(), "tcp://127.0.0.1:9100/robot/arm");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceUri {
    protocol: Protocol,
    host: String,
    port: u16,
    path: String,
}

impl ServiceUri {
    /// In-process service named `path`.
    pub fn fifo(path: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Fifo,
            host: FIFO_HOST.to_string(),
            port: 0,
            path: path.into(),
        }
    }

    /// TCP service; port 0 picks a free port when onlined.
    pub fn tcp(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Tcp,
            host: host.into(),
            port,
            path: path.into(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Reject URIs that cannot name a service.
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() || self.host.is_empty() {
            return Err(Error::InvalidParam);
        }
        Ok(())
    }
}

impl FromStr for ServiceUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (scheme, rest) = s.split_once("://").ok_or(Error::InvalidParam)?;
        let protocol = match scheme {
            "fifo" => Protocol::Fifo,
            "tcp" => Protocol::Tcp,
            _ => return Err(Error::InvalidParam),
        };
        let (authority, path) = rest.split_once('/').ok_or(Error::InvalidParam)?;
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| Error::InvalidParam)?),
            None => (authority, 0),
        };
        if protocol == Protocol::Tcp && authority.rsplit_once(':').is_none() {
            return Err(Error::InvalidParam);
        }
        let uri = Self {
            protocol,
            host: host.to_string(),
            port,
            path: path.to_string(),
        };
        uri.validate()?;
        Ok(uri)
    }
}

impl fmt::Display for ServiceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol {
            Protocol::Fifo => write!(f, "fifo://{}/{}", self.host, self.path),
            Protocol::Tcp => write!(f, "tcp://{}:{}/{}", self.host, self.port, self.path),
        }
    }
}
