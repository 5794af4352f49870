// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Result codes shared by every IOC operation.
//!
//! Every public operation returns [`Result<T>`]; `Ok` is success and the
//! [`Error`] variants are the failure kinds. Each variant has a stable
//! negative numeric code (see [`Error::code`]) so that codes can travel over
//! the wire (TCP handshake rejects, command replies) and be mapped back with
//! [`Error::from_code`]. Unknown codes decode to [`Error::Failure`].
//!
//! # Example
//!
//! ```
//! use ioc::Error;
//!
//! let code = Error::NotExistLink.code();
//! assert_eq!(Error::from_code(code), Error::NotExistLink);
//! assert_eq!(Error::from_code(-9999), Error::Failure);
//! ```

use std::fmt;
use std::io;

/// Which capacity limit was hit by [`Error::TooManyItems`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Limit {
    /// Too many online services in one context.
    Services,
    /// Too many links in one context.
    Links,
    /// Too many event consumers on one scope.
    EventConsumers,
    /// A subscriber's event queue is full.
    QueuedEvents,
    /// The service accept queue is full.
    PendingConnections,
    /// The executor's command queue is full.
    QueuedCommands,
}

/// Errors returned by IOC operations.
///
/// Grouped by cause:
/// - usage errors: `InvalidParam`, `IncompatibleUsage`, `NotExistService`,
///   `NotExistLink`, `ConflictingConsumer`, `ConflictingArgs`
/// - resource limits: `TooManyItems`, `BufferTooSmall`, `BufferFull`,
///   `ResourceUnavailable`, `PortInUse`, `OutOfMemory`
/// - transport faults: `LinkBroken`
/// - timing: `Timeout` (waited, nothing happened) vs the immediate
///   "nothing there" codes `NoEventPending`, `NoData`, `NoCmdPending`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Error {
    // ========================================================================
    // Generic
    // ========================================================================
    /// Generic failure (also the decoding of unknown codes).
    Failure,
    /// Operation not implemented.
    NotImplemented,
    /// Operation not supported in the current configuration.
    NotSupported,
    /// Allocation failed.
    OutOfMemory,
    /// Internal invariant violated.
    InternalBug,

    // ========================================================================
    // Usage
    // ========================================================================
    /// Invalid argument.
    InvalidParam,
    /// The operation does not match the link's usage.
    IncompatibleUsage,
    /// No such service (or nothing listening at the URI).
    NotExistService,
    /// No such link (never existed or already closed).
    NotExistLink,
    /// The same consumer is already subscribed on this scope.
    ConflictingConsumer,
    /// Conflicting service arguments (e.g. FIFO path already online).
    ConflictingArgs,
    /// A link state compare-and-set lost a race.
    StateConflict,

    // ========================================================================
    // Event
    // ========================================================================
    /// No consumer is subscribed to the posted event.
    NoEventConsumer,
    /// Pull found nothing queued (immediate).
    NoEventPending,
    /// The service was not onlined with the broadcast flag.
    NotSupportedBroadcast,

    // ========================================================================
    // Command / data
    // ========================================================================
    /// `wait_cmd` found nothing queued (immediate).
    NoCmdPending,
    /// `recv_dat` found nothing buffered (immediate).
    NoData,
    /// The send buffer is full (immediate).
    BufferFull,
    /// The caller's buffer cannot hold all entries.
    BufferTooSmall,

    // ========================================================================
    // Resources / transport
    // ========================================================================
    /// A capacity limit was hit.
    TooManyItems(Limit),
    /// The TCP port is already bound.
    PortInUse,
    /// A system resource (thread, socket) could not be obtained.
    ResourceUnavailable,
    /// The transport reported a fault; the link is dead until closed.
    LinkBroken,
    /// Waited for the whole timeout and nothing happened.
    Timeout,
}

impl Error {
    /// Stable numeric code for this error.
    pub fn code(self) -> i32 {
        match self {
            Error::Failure => -1,
            Error::NotImplemented => -2,
            Error::NotSupported => -3,
            Error::OutOfMemory => -4,
            Error::InternalBug => -5,
            Error::InvalidParam => -10,
            Error::IncompatibleUsage => -11,
            Error::NotExistService => -12,
            Error::NotExistLink => -13,
            Error::ConflictingConsumer => -14,
            Error::ConflictingArgs => -15,
            Error::StateConflict => -16,
            Error::NoEventConsumer => -20,
            Error::NoEventPending => -21,
            Error::NotSupportedBroadcast => -22,
            Error::NoCmdPending => -30,
            Error::NoData => -31,
            Error::BufferFull => -32,
            Error::BufferTooSmall => -33,
            Error::TooManyItems(Limit::Services) => -40,
            Error::TooManyItems(Limit::Links) => -41,
            Error::TooManyItems(Limit::EventConsumers) => -42,
            Error::TooManyItems(Limit::QueuedEvents) => -43,
            Error::TooManyItems(Limit::PendingConnections) => -44,
            Error::TooManyItems(Limit::QueuedCommands) => -45,
            Error::PortInUse => -50,
            Error::ResourceUnavailable => -51,
            Error::LinkBroken => -52,
            Error::Timeout => -53,
        }
    }

    /// Decode a numeric code. Unknown codes map to [`Error::Failure`].
    pub fn from_code(code: i32) -> Self {
        match code {
            -2 => Error::NotImplemented,
            -3 => Error::NotSupported,
            -4 => Error::OutOfMemory,
            -5 => Error::InternalBug,
            -10 => Error::InvalidParam,
            -11 => Error::IncompatibleUsage,
            -12 => Error::NotExistService,
            -13 => Error::NotExistLink,
            -14 => Error::ConflictingConsumer,
            -15 => Error::ConflictingArgs,
            -16 => Error::StateConflict,
            -20 => Error::NoEventConsumer,
            -21 => Error::NoEventPending,
            -22 => Error::NotSupportedBroadcast,
            -30 => Error::NoCmdPending,
            -31 => Error::NoData,
            -32 => Error::BufferFull,
            -33 => Error::BufferTooSmall,
            -40 => Error::TooManyItems(Limit::Services),
            -41 => Error::TooManyItems(Limit::Links),
            -42 => Error::TooManyItems(Limit::EventConsumers),
            -43 => Error::TooManyItems(Limit::QueuedEvents),
            -44 => Error::TooManyItems(Limit::PendingConnections),
            -45 => Error::TooManyItems(Limit::QueuedCommands),
            -50 => Error::PortInUse,
            -51 => Error::ResourceUnavailable,
            -52 => Error::LinkBroken,
            -53 => Error::Timeout,
            _ => Error::Failure,
        }
    }

    /// Success-adjacent outcomes callers commonly tolerate.
    pub fn is_soft(self) -> bool {
        matches!(
            self,
            Error::NoEventConsumer | Error::NoEventPending | Error::NoData | Error::NoCmdPending
        )
    }

    /// Map a socket error onto the IOC taxonomy.
    ///
    /// Pipe, reset and EOF faults all become [`Error::LinkBroken`] regardless
    /// of which transport produced them.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse => Error::PortInUse,
            io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrNotAvailable => {
                Error::NotExistService
            }
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout,
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => Error::LinkBroken,
            io::ErrorKind::InvalidInput => Error::InvalidParam,
            io::ErrorKind::OutOfMemory => Error::OutOfMemory,
            _ => Error::ResourceUnavailable,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Failure => write!(f, "Operation failed"),
            Error::NotImplemented => write!(f, "Not implemented"),
            Error::NotSupported => write!(f, "Not supported"),
            Error::OutOfMemory => write!(f, "Out of memory"),
            Error::InternalBug => write!(f, "Internal bug"),
            Error::InvalidParam => write!(f, "Invalid parameter"),
            Error::IncompatibleUsage => write!(f, "Incompatible link usage"),
            Error::NotExistService => write!(f, "Service does not exist"),
            Error::NotExistLink => write!(f, "Link does not exist"),
            Error::ConflictingConsumer => write!(f, "Event consumer already subscribed"),
            Error::ConflictingArgs => write!(f, "Conflicting service arguments"),
            Error::StateConflict => write!(f, "Link state changed concurrently"),
            Error::NoEventConsumer => write!(f, "No event consumer"),
            Error::NoEventPending => write!(f, "No event pending"),
            Error::NotSupportedBroadcast => write!(f, "Service does not support broadcast"),
            Error::NoCmdPending => write!(f, "No command pending"),
            Error::NoData => write!(f, "No data"),
            Error::BufferFull => write!(f, "Send buffer full"),
            Error::BufferTooSmall => write!(f, "Buffer too small"),
            Error::TooManyItems(limit) => write!(f, "Too many items: {:?}", limit),
            Error::PortInUse => write!(f, "Port in use"),
            Error::ResourceUnavailable => write!(f, "Resource unavailable"),
            Error::LinkBroken => write!(f, "Link broken"),
            Error::Timeout => write!(f, "Timeout"),
        }
    }
}

impl std::error::Error for Error {}

/// Convenient alias for API results using the public `Error` type.
pub type Result<T> = core::result::Result<T, Error>;
