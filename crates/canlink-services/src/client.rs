//! Client role: the operator console. Turns [`Command`]s into requests,
//! reports responses as [`NodeEvent`]s and, when polling is on, drains the
//! server's status queue.

use canlink_core::config::NodeRole;
use canlink_core::wire::{decode_f32, encode_f32, Message};
use canlink_core::{BusGroup, Opcode, TransferCode};

use crate::error::ProtocolError;
use crate::node::{NodeCore, RoleHandler};
pub use crate::node::Command;
use crate::outbox::{NodeEvent, Outbox, Outgoing};
use crate::params;
use crate::status::{ProgressAssembler, StateFrame};

#[derive(Default)]
pub struct ClientRole {
    polling: bool,
    /// Queue length last reported by the server, still to be pulled.
    ready_to_fetch: u8,
    assembler: ProgressAssembler,
}

impl ClientRole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_polling(polling: bool) -> Self {
        Self {
            polling,
            ..Self::default()
        }
    }

    fn queue_item(&mut self, core: &mut NodeCore, msg: &Message, out: &mut Outbox) {
        if msg.payload.len() != 4 {
            if msg.payload.first() == Some(&(TransferCode::Error as u8)) {
                tracing::warn!(field = msg.arg, "server failed to send queue item");
            }
            self.assembler.reset();
            return;
        }
        let value = match decode_f32(&msg.payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(field = msg.arg, error = %e, "bad queue item");
                self.assembler.reset();
                return;
            }
        };
        if let Some(record) = self.assembler.accept(msg.arg, value) {
            tracing::info!(%record, "progress record");
            let path = core.layout.recv_csv();
            if let Err(e) = record.append_csv(&path) {
                tracing::warn!(path = %path.display(), error = %e, "could not log record");
            }
            out.event(NodeEvent::Record(record));
        }
    }
}

impl RoleHandler for ClientRole {
    fn role(&self) -> NodeRole {
        NodeRole::Client
    }

    fn handle_request(&mut self, _core: &mut NodeCore, msg: &Message, _out: &mut Outbox) -> Result<(), ProtocolError> {
        Err(ProtocolError::RoleViolation {
            role: "client",
            opcode: msg.opcode,
            group: BusGroup::Request,
        })
    }

    fn handle_response(&mut self, core: &mut NodeCore, msg: &Message, out: &mut Outbox) -> Result<(), ProtocolError> {
        match msg.opcode {
            Opcode::GetParam => {
                let entry = params::lookup(msg.arg).ok_or(ProtocolError::UnknownParam(msg.arg))?;
                match decode_f32(&msg.payload) {
                    Ok(value) => {
                        tracing::info!(param = entry.name, value, "parameter value");
                        out.event(NodeEvent::ParamValue { id: msg.arg, value });
                    }
                    Err(_) => {
                        tracing::warn!(param = entry.name, "server could not read parameter");
                        out.event(NodeEvent::ParamUnavailable { id: msg.arg });
                    }
                }
            }
            Opcode::GetQueItem => self.queue_item(core, msg, out),
            Opcode::GetQueLength => {
                self.ready_to_fetch = msg.arg;
                out.event(NodeEvent::QueueLength(msg.arg));
            }
            Opcode::EnumDb => {
                tracing::info!(count = msg.arg, "databases on server");
                out.event(NodeEvent::DbCount(msg.arg));
            }
            Opcode::SetParam
            | Opcode::SetAllowCapture
            | Opcode::SetSendStates
            | Opcode::SetDefaultAllowCapture
            | Opcode::SetDefaultSendStates
            | Opcode::ClearDb
            | Opcode::Shutdown
            | Opcode::Upload => {
                if msg.opcode == Opcode::Shutdown && msg.arg == TransferCode::Ok as u8 {
                    tracing::info!("shutdown confirmed");
                } else if msg.arg != TransferCode::Ok as u8 && msg.arg != TransferCode::None as u8 {
                    tracing::warn!(opcode = %msg.opcode, code = msg.arg, "command refused");
                }
                out.event(NodeEvent::Ack {
                    opcode: msg.opcode,
                    code: msg.arg,
                });
            }
            Opcode::GetFile | Opcode::GetBytes => {}
        }
        Ok(())
    }

    fn handle_state(&mut self, _core: &mut NodeCore, frame: StateFrame, out: &mut Outbox) {
        tracing::trace!(?frame, "state");
        out.event(NodeEvent::State(frame));
    }

    fn handle_command(&mut self, core: &mut NodeCore, cmd: Command, out: &mut Outbox) -> Result<(), ProtocolError> {
        let bool_flag = |b: bool| b as u8;
        match cmd {
            Command::GetParam(id) => out.request(Message::new(Opcode::GetParam, id)),
            Command::SetParam { id, value } => out.request(Message::with_payload(
                Opcode::SetParam,
                id,
                encode_f32(value).to_vec(),
            )),
            Command::QueueLength => out.request(Message::new(Opcode::GetQueLength, 0)),
            Command::QueueItem => out.request(Message::new(Opcode::GetQueItem, 0)),
            Command::SetCapture(flag) => out.request(Message::new(Opcode::SetAllowCapture, flag)),
            Command::SetSendStates(on) => out.request(Message::new(Opcode::SetSendStates, bool_flag(on))),
            Command::SetDefaultCapture(on) => {
                out.request(Message::new(Opcode::SetDefaultAllowCapture, bool_flag(on)))
            }
            Command::SetDefaultSendStates(on) => {
                out.request(Message::new(Opcode::SetDefaultSendStates, bool_flag(on)))
            }
            Command::Shutdown(kind) => out.request(Message::new(Opcode::Shutdown, kind.into())),
            Command::EnumDb => out.request(Message::new(Opcode::EnumDb, 0)),
            Command::ClearDb(id) => out.request(Message::new(Opcode::ClearDb, id)),
            Command::FetchDb(id) => core.fetch(id, out)?,
            Command::Upload => {
                let package = core.layout.flash_out();
                if !package.is_file() {
                    tracing::warn!(path = %package.display(), "no staged package, server will get NOT_FOUND");
                }
                out.request(Message::new(Opcode::Upload, 0));
            }
            Command::Polling(on) => {
                self.polling = on;
                self.ready_to_fetch = 0;
                tracing::info!(polling = on, "queue polling");
            }
        }
        Ok(())
    }

    /// Pull queued records: every announced item if the server reported
    /// some, otherwise ask for the length and one item.
    fn tick(&mut self, _core: &mut NodeCore, out: &mut Outbox) {
        if !self.polling {
            return;
        }
        if self.ready_to_fetch > 0 {
            for _ in 0..self.ready_to_fetch {
                out.push(Outgoing::paced_request(Message::new(Opcode::GetQueItem, 0)));
            }
            self.ready_to_fetch = 0;
        } else {
            out.request(Message::new(Opcode::GetQueLength, 0));
            out.request(Message::new(Opcode::GetQueItem, 0));
        }
    }
}
