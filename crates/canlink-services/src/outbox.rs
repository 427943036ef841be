//! Outgoing frames and node events produced by one round of handling.

use std::path::PathBuf;

use bytes::Bytes;
use canlink_core::wire::{BusFrame, BusGroup, Message, WireError};
use canlink_core::{Opcode, ShutdownKind};

use crate::status::{ProgressRecord, StateFrame};

/// A frame waiting to go out.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Request { message: Message, paced: bool },
    Response { message: Message, paced: bool },
    State(StateFrame),
}

impl Outgoing {
    pub fn request(message: Message) -> Self {
        Self::Request {
            message,
            paced: false,
        }
    }

    pub fn response(message: Message) -> Self {
        Self::Response {
            message,
            paced: false,
        }
    }

    /// Response followed by the pacing delay. Used for chunk streams.
    pub fn paced_response(message: Message) -> Self {
        Self::Response {
            message,
            paced: true,
        }
    }

    pub fn paced_request(message: Message) -> Self {
        Self::Request {
            message,
            paced: true,
        }
    }

    pub fn group(&self) -> BusGroup {
        match self {
            Outgoing::Request { .. } => BusGroup::Request,
            Outgoing::Response { .. } => BusGroup::Response,
            Outgoing::State(_) => BusGroup::State,
        }
    }

    pub fn is_paced(&self) -> bool {
        match self {
            Outgoing::Request { paced, .. } | Outgoing::Response { paced, .. } => *paced,
            Outgoing::State(_) => false,
        }
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            Outgoing::Request { message, .. } | Outgoing::Response { message, .. } => {
                Some(message)
            }
            Outgoing::State(_) => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        match self {
            Outgoing::Request { message, .. } | Outgoing::Response { message, .. } => {
                message.encode()
            }
            Outgoing::State(frame) => Ok(frame.encode().to_vec()),
        }
    }

    pub fn into_frame(self, priority: u8) -> Result<BusFrame, WireError> {
        let data = self.encode()?;
        Ok(BusFrame {
            priority,
            group: self.group(),
            data: Bytes::from(data),
        })
    }
}

/// Things a node reports to whoever drives it (console, daemon, tests).
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    ParamValue { id: u8, value: f32 },
    ParamUnavailable { id: u8 },
    /// One-byte acknowledgement of a command (`OK`, `ERROR`, ...).
    Ack { opcode: Opcode, code: u8 },
    QueueLength(u8),
    Record(ProgressRecord),
    DbCount(u8),
    State(StateFrame),
    TransferProgress { file_id: u8, bytes: u64 },
    TransferComplete { file_id: u8, path: PathBuf, bytes: u64 },
    TransferFailed { file_id: u8, reason: String },
    SendComplete { file_id: u8, bytes: u64 },
    ShutdownExecuted(ShutdownKind),
}

/// Collects everything one call into the node wants to emit.
#[derive(Debug, Default)]
pub struct Outbox {
    pub frames: Vec<Outgoing>,
    pub events: Vec<NodeEvent>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, out: Outgoing) {
        self.frames.push(out);
    }

    pub fn request(&mut self, message: Message) {
        self.frames.push(Outgoing::request(message));
    }

    pub fn respond(&mut self, message: Message) {
        self.frames.push(Outgoing::response(message));
    }

    /// Respond with a bare `(opcode, code)` acknowledgement.
    pub fn ack(&mut self, opcode: Opcode, code: impl Into<u8>) {
        self.respond(Message::new(opcode, code.into()));
    }

    pub fn event(&mut self, event: NodeEvent) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.events.is_empty()
    }

    /// Responses in the order they were queued.
    pub fn responses(&self) -> impl Iterator<Item = &Message> {
        self.frames.iter().filter_map(|f| match f {
            Outgoing::Response { message, .. } => Some(message),
            _ => None,
        })
    }

    /// Requests in the order they were queued.
    pub fn requests(&self) -> impl Iterator<Item = &Message> {
        self.frames.iter().filter_map(|f| match f {
            Outgoing::Request { message, .. } => Some(message),
            _ => None,
        })
    }
}
