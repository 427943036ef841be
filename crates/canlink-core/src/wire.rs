//! canlink wire format — the framing shared by both nodes.
//!
//! A bus frame carries at most 8 data bytes. Request and response frames
//! hold a [`Message`]: one opcode byte, one argument byte and up to six
//! payload bytes. State frames hold an 8-byte snapshot with no opcode.
//!
//! Multi-byte numeric payloads are big-endian. Changing anything here is a
//! breaking change for every deployed node.

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::const_assert_eq;

use crate::opcode::Opcode;

/// Data bytes per bus frame.
pub const FRAME_CAPACITY: usize = 8;

/// Payload bytes available to a [`Message`] after opcode and argument.
pub const MAX_PAYLOAD: usize = FRAME_CAPACITY - 2;

/// Priority every node transmits at.
pub const DEFAULT_PRIORITY: u8 = 6;

const_assert_eq!(MAX_PAYLOAD, 6);

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("malformed message: {0} bytes, need at least 2")]
    MalformedMessage(usize),
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("payload too large: {0} bytes, max {MAX_PAYLOAD}")]
    PayloadTooLarge(usize),
    #[error("cannot decode value: {0}")]
    DecodeError(String),
}

// ── Message ───────────────────────────────────────────────────────────────────

/// One request or response on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub opcode: Opcode,
    pub arg: u8,
    pub payload: Bytes,
}

impl Message {
    pub fn new(opcode: Opcode, arg: u8) -> Self {
        Self {
            opcode,
            arg,
            payload: Bytes::new(),
        }
    }

    pub fn with_payload(opcode: Opcode, arg: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            arg,
            payload: payload.into(),
        }
    }

    /// `[opcode, arg, payload..]`.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(self.payload.len()));
        }
        let mut buf = BytesMut::with_capacity(2 + self.payload.len());
        buf.put_u8(self.opcode.into());
        buf.put_u8(self.arg);
        buf.put_slice(&self.payload);
        Ok(buf.to_vec())
    }

    /// Parse a frame's data bytes. Trailing bytes beyond the six payload
    /// bytes cannot occur on a real bus and are rejected.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < 2 {
            return Err(WireError::MalformedMessage(data.len()));
        }
        if data.len() > FRAME_CAPACITY {
            return Err(WireError::PayloadTooLarge(data.len() - 2));
        }
        let opcode = Opcode::try_from(data[0])?;
        Ok(Self {
            opcode,
            arg: data[1],
            payload: Bytes::copy_from_slice(&data[2..]),
        })
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.opcode, self.arg)?;
        if !self.payload.is_empty() {
            write!(f, " [{}]", hex::encode(&self.payload))?;
        }
        Ok(())
    }
}

// ── Numeric payloads ──────────────────────────────────────────────────────────

pub fn encode_f32(value: f32) -> [u8; 4] {
    value.to_be_bytes()
}

pub fn decode_f32(bytes: &[u8]) -> Result<f32, WireError> {
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| WireError::DecodeError(format!("expected 4 bytes, got {}", bytes.len())))?;
    Ok(f32::from_be_bytes(raw))
}

// ── Bus groups ────────────────────────────────────────────────────────────────

/// Message group on the bus. Each group maps to one J1939 parameter group
/// number, so a receiver can route a frame before looking at its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusGroup {
    State,
    Request,
    Response,
    Error,
    Whois,
    SoftId,
}

impl BusGroup {
    pub fn pgn(self) -> u16 {
        match self {
            BusGroup::State => 0xFF64,
            BusGroup::Request => 0xFF65,
            BusGroup::Response => 0xFF66,
            BusGroup::Error => 0xFF67,
            BusGroup::Whois => 0xFF68,
            BusGroup::SoftId => 0xFEDA,
        }
    }

    pub fn from_pgn(pgn: u16) -> Option<Self> {
        match pgn {
            0xFF64 => Some(BusGroup::State),
            0xFF65 => Some(BusGroup::Request),
            0xFF66 => Some(BusGroup::Response),
            0xFF67 => Some(BusGroup::Error),
            0xFF68 => Some(BusGroup::Whois),
            0xFEDA => Some(BusGroup::SoftId),
            _ => None,
        }
    }
}

// ── Bus frame ─────────────────────────────────────────────────────────────────

/// A frame as handed to or received from a bus adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusFrame {
    pub priority: u8,
    pub group: BusGroup,
    pub data: Bytes,
}

impl BusFrame {
    pub fn new(group: BusGroup, data: impl Into<Bytes>) -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            group,
            data: data.into(),
        }
    }

    /// Datagram form used by the UDP virtual bus: `[priority, pgn BE, data..]`.
    pub fn to_datagram(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(3 + self.data.len());
        buf.put_u8(self.priority);
        buf.put_u16(self.group.pgn());
        buf.put_slice(&self.data);
        buf.to_vec()
    }

    /// Returns `None` for datagrams that are too short, too long or carry an
    /// unknown group.
    pub fn from_datagram(buf: &[u8]) -> Option<Self> {
        if buf.len() < 3 || buf.len() > 3 + FRAME_CAPACITY {
            return None;
        }
        let pgn = u16::from_be_bytes([buf[1], buf[2]]);
        Some(Self {
            priority: buf[0],
            group: BusGroup::from_pgn(pgn)?,
            data: Bytes::copy_from_slice(&buf[3..]),
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
