//! canlink-core — opcodes, message framing, the block codec and node
//! configuration. All other canlink crates depend on this one.

pub mod block;
pub mod config;
pub mod opcode;
pub mod wire;

pub use opcode::{Opcode, ShutdownKind, TransferCode};
pub use wire::{BusFrame, BusGroup, Message, WireError};
