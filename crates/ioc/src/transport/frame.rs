// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Link frames and their byte encoding.
//!
//! FIFO moves [`Frame`] values directly; TCP encodes them into the body of a
//! length-prefixed message (see [`tcp::FrameCodec`](super::tcp::FrameCodec)).
//!
//! # Wire Format
//!
//! ```text
//! +------+-------------------------------+
//! | kind | fields (little endian)        |
//! | (1B) |                               |
//! +------+-------------------------------+
//! ```
//!
//! Byte strings are a `u32` length followed by the bytes; optional byte
//! strings carry a leading presence byte.

use crate::dispatch::command::CmdStatus;
use crate::dispatch::event::EvtDesc;
use crate::ids::{CmdId, EvtId, LinkId};
use crate::usage::Usage;
use std::fmt;

const KIND_HELLO: u8 = 0x01;
const KIND_WELCOME: u8 = 0x02;
const KIND_REJECT: u8 = 0x03;
const KIND_SUBSCRIPTIONS: u8 = 0x10;
const KIND_EVENT: u8 = 0x11;
const KIND_EVENT_ACK: u8 = 0x12;
const KIND_CMD_REQUEST: u8 = 0x20;
const KIND_CMD_REPLY: u8 = 0x21;
const KIND_DATA: u8 = 0x30;
const KIND_CLOSE: u8 = 0x7f;

/// Messages exchanged between the two ends of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Client handshake: requested usage and service path.
    Hello { usage: Usage, path: String },
    /// Server accepted the connection.
    Welcome,
    /// Server refused the connection with an error code.
    Reject { code: i32 },
    /// Event ids the consumer end currently listens to.
    Subscriptions { evt_ids: Vec<EvtId> },
    /// Posted event; `sync` asks for an [`Frame::EventAck`].
    Event {
        sync: bool,
        timeout_ms: u64,
        evt: EvtDesc,
    },
    /// Outcome of a synchronous event (0 = delivered).
    EventAck { seq: u64, code: i32 },
    /// Command request.
    CmdRequest {
        seq: u64,
        cmd_id: CmdId,
        timeout_ms: u64,
        payload: Vec<u8>,
    },
    /// Command reply.
    CmdReply {
        seq: u64,
        status: CmdStatus,
        code: i32,
        payload: Vec<u8>,
    },
    /// Stream bytes.
    Data { bytes: Vec<u8> },
    /// Orderly close.
    Close,
}

/// Malformed frame body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    Truncated,
    UnknownKind(u8),
    BadField(&'static str),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Truncated => write!(f, "truncated frame"),
            FrameError::UnknownKind(k) => write!(f, "unknown frame kind 0x{:02x}", k),
            FrameError::BadField(name) => write!(f, "invalid field '{}'", name),
        }
    }
}

impl std::error::Error for FrameError {}

impl Frame {
    /// Short name for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "Hello",
            Frame::Welcome => "Welcome",
            Frame::Reject { .. } => "Reject",
            Frame::Subscriptions { .. } => "Subscriptions",
            Frame::Event { .. } => "Event",
            Frame::EventAck { .. } => "EventAck",
            Frame::CmdRequest { .. } => "CmdRequest",
            Frame::CmdReply { .. } => "CmdReply",
            Frame::Data { .. } => "Data",
            Frame::Close => "Close",
        }
    }

    /// Serialize into a message body.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::default();
        match self {
            Frame::Hello { usage, path } => {
                w.u8(KIND_HELLO);
                w.u8(usage.bits());
                w.bytes(path.as_bytes());
            }
            Frame::Welcome => w.u8(KIND_WELCOME),
            Frame::Reject { code } => {
                w.u8(KIND_REJECT);
                w.i32(*code);
            }
            Frame::Subscriptions { evt_ids } => {
                w.u8(KIND_SUBSCRIPTIONS);
                w.u32(evt_ids.len() as u32);
                for id in evt_ids {
                    w.u64(id.0);
                }
            }
            Frame::Event {
                sync,
                timeout_ms,
                evt,
            } => {
                w.u8(KIND_EVENT);
                w.u8(u8::from(*sync));
                w.u64(*timeout_ms);
                w.u64(evt.seq_id());
                w.u64(evt.producer().map_or(0, LinkId::as_u64));
                w.u64(evt.evt_id.0);
                w.u64(evt.evt_value);
                w.opt_bytes(evt.payload.as_deref());
            }
            Frame::EventAck { seq, code } => {
                w.u8(KIND_EVENT_ACK);
                w.u64(*seq);
                w.i32(*code);
            }
            Frame::CmdRequest {
                seq,
                cmd_id,
                timeout_ms,
                payload,
            } => {
                w.u8(KIND_CMD_REQUEST);
                w.u64(*seq);
                w.u64(cmd_id.0);
                w.u64(*timeout_ms);
                w.bytes(payload);
            }
            Frame::CmdReply {
                seq,
                status,
                code,
                payload,
            } => {
                w.u8(KIND_CMD_REPLY);
                w.u64(*seq);
                w.u8(status.to_wire());
                w.i32(*code);
                w.bytes(payload);
            }
            Frame::Data { bytes } => {
                w.u8(KIND_DATA);
                w.bytes(bytes);
            }
            Frame::Close => w.u8(KIND_CLOSE),
        }
        w.0
    }

    /// Parse a message body.
    pub fn decode(body: &[u8]) -> Result<Frame, FrameError> {
        let mut r = Reader { buf: body, pos: 0 };
        let frame = match r.u8()? {
            KIND_HELLO => {
                let usage = Usage::from_bits(r.u8()?).ok_or(FrameError::BadField("usage"))?;
                let path = String::from_utf8(r.bytes()?.to_vec())
                    .map_err(|_| FrameError::BadField("path"))?;
                Frame::Hello { usage, path }
            }
            KIND_WELCOME => Frame::Welcome,
            KIND_REJECT => Frame::Reject { code: r.i32()? },
            KIND_SUBSCRIPTIONS => {
                let n = r.u32()? as usize;
                if n > r.remaining() / 8 {
                    return Err(FrameError::Truncated);
                }
                let mut evt_ids = Vec::with_capacity(n);
                for _ in 0..n {
                    evt_ids.push(EvtId(r.u64()?));
                }
                Frame::Subscriptions { evt_ids }
            }
            KIND_EVENT => {
                let sync = r.u8()? != 0;
                let timeout_ms = r.u64()?;
                let seq = r.u64()?;
                let producer = r.u64()?;
                let evt_id = EvtId(r.u64()?);
                let evt_value = r.u64()?;
                let payload = r.opt_bytes()?.map(<[u8]>::to_vec);
                let mut evt = EvtDesc::new(evt_id).with_value(evt_value);
                evt.payload = payload;
                evt.set_seq_id(seq);
                evt.set_producer(Some(LinkId(producer)));
                Frame::Event {
                    sync,
                    timeout_ms,
                    evt,
                }
            }
            KIND_EVENT_ACK => Frame::EventAck {
                seq: r.u64()?,
                code: r.i32()?,
            },
            KIND_CMD_REQUEST => Frame::CmdRequest {
                seq: r.u64()?,
                cmd_id: CmdId(r.u64()?),
                timeout_ms: r.u64()?,
                payload: r.bytes()?.to_vec(),
            },
            KIND_CMD_REPLY => Frame::CmdReply {
                seq: r.u64()?,
                status: CmdStatus::from_wire(r.u8()?).ok_or(FrameError::BadField("status"))?,
                code: r.i32()?,
                payload: r.bytes()?.to_vec(),
            },
            KIND_DATA => Frame::Data {
                bytes: r.bytes()?.to_vec(),
            },
            KIND_CLOSE => Frame::Close,
            other => return Err(FrameError::UnknownKind(other)),
        };
        if r.remaining() != 0 {
            return Err(FrameError::BadField("trailing bytes"));
        }
        Ok(frame)
    }
}

#[derive(Default)]
struct Writer(Vec<u8>);

impl Writer {
    fn u8(&mut self, v: u8) {
        self.0.push(v);
    }

    fn u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn bytes(&mut self, v: &[u8]) {
        self.u32(v.len() as u32);
        self.0.extend_from_slice(v);
    }

    fn opt_bytes(&mut self, v: Option<&[u8]>) {
        match v {
            Some(v) => {
                self.u8(1);
                self.bytes(v);
            }
            None => self.u8(0),
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        if self.remaining() < n {
            return Err(FrameError::Truncated);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], FrameError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, FrameError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, FrameError> {
        self.array().map(u32::from_le_bytes)
    }

    fn i32(&mut self) -> Result<i32, FrameError> {
        self.array().map(i32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64, FrameError> {
        self.array().map(u64::from_le_bytes)
    }

    fn bytes(&mut self) -> Result<&'a [u8], FrameError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn opt_bytes(&mut self) -> Result<Option<&'a [u8]>, FrameError> {
        match self.u8()? {
            0 => Ok(None),
            1 => self.bytes().map(Some),
            _ => Err(FrameError::BadField("presence")),
        }
    }
}
