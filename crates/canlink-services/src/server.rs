//! Server role: the sensing device. Answers every non-transfer request and
//! broadcasts a state frame each tick.

use canlink_core::config::NodeRole;
use canlink_core::opcode::REFLASH;
use canlink_core::wire::{decode_f32, encode_f32, Message};
use canlink_core::{BusGroup, Opcode, TransferCode};

use crate::error::ProtocolError;
use crate::node::{NodeCore, RoleHandler};
use crate::outbox::{Outbox, Outgoing};
use crate::params;
use crate::shutdown::ShutdownOrchestrator;
use crate::state::CaptureMode;

pub struct ServerRole {
    shutdown: ShutdownOrchestrator,
}

impl ServerRole {
    pub fn new(shutdown: ShutdownOrchestrator) -> Self {
        Self { shutdown }
    }

    fn set_param(&mut self, core: &mut NodeCore, msg: &Message, out: &mut Outbox) -> Result<(), ProtocolError> {
        // Unknown ids get no reply at all.
        if params::lookup(msg.arg).is_none() {
            return Err(ProtocolError::UnknownParam(msg.arg));
        }
        let applied = decode_f32(&msg.payload)
            .map_err(ProtocolError::from)
            .and_then(|value| {
                let entry = core.state.lock().set_param(msg.arg, value)?;
                Ok((entry, value))
            });
        match applied {
            Ok((entry, value)) => {
                tracing::info!(param = entry.name, value, "parameter set");
                if let Err(e) = core.defaults.set(entry.name, &value.to_string()) {
                    tracing::warn!(param = entry.name, error = %e, "could not persist parameter");
                }
                out.ack(Opcode::SetParam, TransferCode::Ok);
                Ok(())
            }
            Err(e) => {
                out.ack(Opcode::SetParam, TransferCode::Error);
                Err(e)
            }
        }
    }

    fn get_param(&mut self, core: &mut NodeCore, msg: &Message, out: &mut Outbox) -> Result<(), ProtocolError> {
        if params::lookup(msg.arg).is_none() {
            return Err(ProtocolError::UnknownParam(msg.arg));
        }
        let value = core.state.lock().param(msg.arg);
        match value {
            Ok(v) => {
                out.respond(Message::with_payload(Opcode::GetParam, msg.arg, encode_f32(v).to_vec()));
                Ok(())
            }
            Err(e) => {
                // The argument carries the id, so the error goes in the payload.
                out.respond(Message::with_payload(
                    Opcode::GetParam,
                    msg.arg,
                    vec![TransferCode::Error as u8],
                ));
                Err(e)
            }
        }
    }

    fn queue_item(&mut self, core: &mut NodeCore, out: &mut Outbox) -> Result<(), ProtocolError> {
        let record = core.state.lock().dequeue_status()?;
        for (i, value) in record.to_fields().into_iter().enumerate() {
            out.respond(Message::with_payload(
                Opcode::GetQueItem,
                i as u8,
                encode_f32(value).to_vec(),
            ));
        }
        Ok(())
    }

    /// Reply OK if `valid`, ERROR otherwise.
    fn ok_or_error(op: Opcode, flag: u8, valid: bool, out: &mut Outbox) -> Result<(), ProtocolError> {
        if valid {
            out.ack(op, TransferCode::Ok);
            Ok(())
        } else {
            out.ack(op, TransferCode::Error);
            Err(ProtocolError::InvalidFlag { opcode: op, flag })
        }
    }

    fn set_default(core: &mut NodeCore, op: Opcode, key: &str, flag: u8, out: &mut Outbox) -> Result<(), ProtocolError> {
        let value = match flag {
            0 => "false",
            1 => "true",
            _ => return Self::ok_or_error(op, flag, false, out),
        };
        match core.defaults.set(key, value) {
            Ok(()) => {
                tracing::info!(key, value, "default updated");
                Self::ok_or_error(op, flag, true, out)
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "could not persist default");
                out.ack(op, TransferCode::Error);
                Ok(())
            }
        }
    }
}

impl RoleHandler for ServerRole {
    fn role(&self) -> NodeRole {
        NodeRole::Server
    }

    fn handle_request(&mut self, core: &mut NodeCore, msg: &Message, out: &mut Outbox) -> Result<(), ProtocolError> {
        let flag = msg.arg;
        match msg.opcode {
            Opcode::SetParam => self.set_param(core, msg, out),
            Opcode::GetParam => self.get_param(core, msg, out),
            Opcode::GetQueItem => self.queue_item(core, out),
            Opcode::GetQueLength => {
                let len = core.state.lock().queue.wire_len();
                out.respond(Message::new(Opcode::GetQueLength, len));
                Ok(())
            }
            Opcode::SetAllowCapture => {
                let mode = CaptureMode::from_flag(flag);
                if let Some(mode) = mode {
                    core.state.lock().capture = mode;
                    tracing::info!(?mode, "capture mode set");
                }
                Self::ok_or_error(msg.opcode, flag, mode.is_some(), out)
            }
            Opcode::SetSendStates => {
                let valid = flag <= 1;
                if valid {
                    core.state.lock().send_states = flag == 1;
                }
                Self::ok_or_error(msg.opcode, flag, valid, out)
            }
            Opcode::SetDefaultAllowCapture => Self::set_default(core, msg.opcode, "allow_capture", flag, out),
            Opcode::SetDefaultSendStates => Self::set_default(core, msg.opcode, "send_states", flag, out),
            Opcode::Shutdown => {
                self.shutdown.request(flag, out);
                Ok(())
            }
            Opcode::EnumDb => {
                out.respond(Message::new(Opcode::EnumDb, core.layout.count_dbs()));
                Ok(())
            }
            Opcode::ClearDb => {
                core.transfer.cancel_send();
                match core.layout.clear_db(flag) {
                    Ok(()) => {
                        tracing::info!(db = flag, "database cleared");
                        out.ack(Opcode::ClearDb, TransferCode::Ok);
                        Ok(())
                    }
                    Err(e) => {
                        out.ack(Opcode::ClearDb, TransferCode::Error);
                        Err(e.into())
                    }
                }
            }
            Opcode::Upload => {
                if let Err(e) = core.fetch(REFLASH, out) {
                    out.ack(Opcode::Upload, TransferCode::Error);
                    return Err(e);
                }
                Ok(())
            }
            // Routed to the transfer engine before reaching the role.
            Opcode::GetFile | Opcode::GetBytes => Ok(()),
        }
    }

    fn handle_response(&mut self, _core: &mut NodeCore, msg: &Message, _out: &mut Outbox) -> Result<(), ProtocolError> {
        Err(ProtocolError::RoleViolation {
            role: "server",
            opcode: msg.opcode,
            group: BusGroup::Response,
        })
    }

    fn tick(&mut self, core: &mut NodeCore, out: &mut Outbox) {
        self.shutdown.poll(out);
        let state = core.state.lock();
        if state.send_states {
            out.push(Outgoing::State(state.state_frame()));
        }
    }
}
