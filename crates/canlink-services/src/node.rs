//! Frame dispatch for one node.
//!
//! [`Node`] decodes bus frames, enforces the role partition and routes each
//! message either to the transfer engine (both roles) or to the role
//! handler chosen at construction. It never fails on a bad frame: errors
//! are logged and the frame is dropped.

use std::time::Duration;

use canlink_core::config::NodeRole;
use canlink_core::wire::{BusFrame, BusGroup, Message};
use canlink_core::Opcode;

use crate::defaults::Defaults;
use crate::error::ProtocolError;
use crate::layout::StorageLayout;
use crate::outbox::{NodeEvent, Outbox};
use crate::params;
use crate::state::{SharedState, MAX_MIN_DELAY};
use crate::status::StateFrame;
use crate::transfer::TransferEngine;

/// Client-side command, issued from the console.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetParam(u8),
    SetParam { id: u8, value: f32 },
    QueueLength,
    QueueItem,
    /// Raw `SET_ALLOW_CAPTURE` flag: 0, 1 or force.
    SetCapture(u8),
    SetSendStates(bool),
    SetDefaultCapture(bool),
    SetDefaultSendStates(bool),
    Shutdown(canlink_core::ShutdownKind),
    EnumDb,
    ClearDb(u8),
    FetchDb(u8),
    /// Ask the server to pull this node's staged reflash package.
    Upload,
    /// Turn periodic queue polling on or off.
    Polling(bool),
}

/// Everything a role handler may touch besides its own fields.
pub struct NodeCore {
    pub state: SharedState,
    pub defaults: Box<dyn Defaults>,
    pub layout: StorageLayout,
    pub transfer: TransferEngine,
}

impl NodeCore {
    pub fn new(
        state: SharedState,
        defaults: Box<dyn Defaults>,
        layout: StorageLayout,
        transfer: TransferEngine,
    ) -> Self {
        Self {
            state,
            defaults,
            layout,
            transfer,
        }
    }

    fn transfer_request(&mut self, msg: &Message, out: &mut Outbox) -> Result<(), ProtocolError> {
        match msg.opcode {
            Opcode::GetFile => {
                let source = self.layout.source_path(msg.arg);
                self.transfer.serve(msg.arg, &source, out);
            }
            Opcode::GetBytes => self.transfer.on_bytes_request(msg.arg, out),
            _ => {}
        }
        Ok(())
    }

    fn transfer_response(&mut self, msg: &Message, out: &mut Outbox) -> Result<(), ProtocolError> {
        match msg.opcode {
            Opcode::GetFile => {
                self.transfer.on_file_response(msg.arg, out);
                Ok(())
            }
            Opcode::GetBytes => self.transfer.on_bytes_response(msg, out),
            _ => Ok(()),
        }
    }

    /// Start pulling `file_id` from the peer into its destination path.
    pub fn fetch(&mut self, file_id: u8, out: &mut Outbox) -> Result<(), ProtocolError> {
        let dest = self.layout.destination_path(file_id);
        self.transfer.fetch(file_id, &dest, out)
    }
}

/// Role-specific handling of the non-transfer opcodes.
pub trait RoleHandler: Send {
    fn role(&self) -> NodeRole;

    fn handle_request(
        &mut self,
        core: &mut NodeCore,
        msg: &Message,
        out: &mut Outbox,
    ) -> Result<(), ProtocolError>;

    fn handle_response(
        &mut self,
        core: &mut NodeCore,
        msg: &Message,
        out: &mut Outbox,
    ) -> Result<(), ProtocolError>;

    fn handle_state(&mut self, _core: &mut NodeCore, _frame: StateFrame, _out: &mut Outbox) {}

    fn handle_command(
        &mut self,
        _core: &mut NodeCore,
        cmd: Command,
        _out: &mut Outbox,
    ) -> Result<(), ProtocolError> {
        tracing::warn!(?cmd, role = ?self.role(), "command not supported in this role");
        Ok(())
    }

    /// Housekeeping on every driver tick.
    fn tick(&mut self, core: &mut NodeCore, out: &mut Outbox);
}

pub struct Node {
    core: NodeCore,
    role: Box<dyn RoleHandler>,
    finished: bool,
}

impl Node {
    pub fn new(core: NodeCore, role: Box<dyn RoleHandler>) -> anyhow::Result<Self> {
        params::validate_table(params::PARAMS)
            .map_err(|e| anyhow::anyhow!("invalid parameter table: {e}"))?;
        Ok(Self {
            core,
            role,
            finished: false,
        })
    }

    pub fn role(&self) -> NodeRole {
        self.role.role()
    }

    pub fn core(&self) -> &NodeCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    /// True once a shutdown has been executed; the driver stops then.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Delay after each paced frame, capped at [`MAX_MIN_DELAY`].
    pub fn pacing_delay(&self) -> Duration {
        let secs = self.core.state.lock().min_delay.min(MAX_MIN_DELAY);
        Duration::try_from_secs_f32(secs).unwrap_or(Duration::ZERO)
    }

    pub fn handle_frame(&mut self, frame: &BusFrame) -> Outbox {
        let mut out = Outbox::new();
        match frame.group {
            BusGroup::Request | BusGroup::Response => match Message::decode(&frame.data) {
                Ok(msg) => {
                    if let Err(e) = self.dispatch(frame.group, &msg, &mut out) {
                        log_error(&msg, &e);
                    }
                }
                Err(e) => {
                    tracing::warn!(group = ?frame.group, data = %hex::encode(&frame.data), error = %e, "dropping frame");
                }
            },
            BusGroup::State => match StateFrame::decode(&frame.data) {
                Some(state) => self.role.handle_state(&mut self.core, state, &mut out),
                None => tracing::debug!(len = frame.data.len(), "short state frame"),
            },
            other => tracing::debug!(group = ?other, pgn = other.pgn(), "ignoring frame"),
        }
        self.note(&out);
        out
    }

    fn dispatch(&mut self, group: BusGroup, msg: &Message, out: &mut Outbox) -> Result<(), ProtocolError> {
        let is_request = group == BusGroup::Request;
        let op = msg.opcode;
        if !op.is_transfer() {
            let serves = self.role.role() == NodeRole::Server;
            if is_request != serves {
                return Err(ProtocolError::RoleViolation {
                    role: role_name(self.role.role()),
                    opcode: op,
                    group,
                });
            }
        }

        if op.is_polling() {
            tracing::trace!(%msg, ?group, "message");
        } else {
            tracing::debug!(%msg, ?group, "message");
        }

        match (is_request, op.is_transfer()) {
            (true, true) => self.core.transfer_request(msg, out),
            (false, true) => self.core.transfer_response(msg, out),
            (true, false) => self.role.handle_request(&mut self.core, msg, out),
            (false, false) => self.role.handle_response(&mut self.core, msg, out),
        }
    }

    pub fn tick(&mut self) -> Outbox {
        let mut out = Outbox::new();
        if !self.finished {
            self.role.tick(&mut self.core, &mut out);
        }
        self.note(&out);
        out
    }

    pub fn command(&mut self, cmd: Command) -> Outbox {
        let mut out = Outbox::new();
        if let Err(e) = self.role.handle_command(&mut self.core, cmd, &mut out) {
            tracing::warn!(error = %e, "command failed");
        }
        out
    }

    fn note(&mut self, out: &Outbox) {
        if out
            .events
            .iter()
            .any(|e| matches!(e, NodeEvent::ShutdownExecuted(_)))
        {
            self.finished = true;
            self.core.transfer.abort_all();
        }
    }
}

fn role_name(role: NodeRole) -> &'static str {
    match role {
        NodeRole::Server => "server",
        NodeRole::Client => "client",
    }
}

fn log_error(msg: &Message, e: &ProtocolError) {
    match e {
        ProtocolError::QueueEmpty => tracing::trace!(%msg, "queue empty"),
        _ => tracing::warn!(%msg, error = %e, "message not handled"),
    }
}
