//! Error type shared by the protocol handlers.

use std::path::PathBuf;

use canlink_core::wire::{BusGroup, WireError};
use canlink_core::Opcode;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("unknown parameter id {0}")]
    UnknownParam(u8),
    #[error("parameter {0} is read-only")]
    NotSettable(&'static str),
    #[error("value {value} out of range for {name}")]
    OutOfRange { name: &'static str, value: f32 },
    #[error("invalid flag {flag} for {opcode}")]
    InvalidFlag { opcode: Opcode, flag: u8 },
    #[error("source file not found: {0}")]
    SourceNotFound(PathBuf),
    #[error("cannot write {0}: {1}")]
    DestinationUnwritable(PathBuf, std::io::Error),
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("block rejected {0} times in a row")]
    RetriesExhausted(u32),
    #[error("no active transfer")]
    NoActiveTransfer,
    #[error("{role} node does not accept {opcode} on {group:?}")]
    RoleViolation {
        role: &'static str,
        opcode: Opcode,
        group: BusGroup,
    },
    #[error("status queue is empty")]
    QueueEmpty,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
