//! Two-phase shutdown: accept the request, wait for the measurement workflow
//! to stop, confirm to the peer, then act.
//!
//! The confirmation and the action happen on separate ticks so the `OK`
//! frame is on the bus before the host goes down.

use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use canlink_core::{Opcode, ShutdownKind, TransferCode};

use crate::flashing;
use crate::layout::StorageLayout;
use crate::outbox::{NodeEvent, Outbox};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Normal,
    Preparing(ShutdownKind),
    ReadyForShutdown(ShutdownKind),
    Executed(ShutdownKind),
}

/// Handshake between the node and the workflow thread. The node raises
/// `requested`; the workflow stops and raises `ready`.
#[derive(Debug, Clone, Default)]
pub struct ShutdownGate {
    requested: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
}

impl ShutdownGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Host side effects of a shutdown.
pub trait SystemActions: Send {
    fn power_off(&mut self) -> Result<()>;
    fn reboot(&mut self) -> Result<()>;
    /// Replace the app directory with the received package.
    fn apply_flash(&mut self) -> Result<()>;
    fn restore_backup(&mut self) -> Result<()>;
}

/// Runs the configured commands. With `execute` off, commands are only
/// logged, which is what a development host wants.
pub struct HostActions {
    layout: StorageLayout,
    poweroff: Vec<String>,
    reboot: Vec<String>,
    execute: bool,
}

impl HostActions {
    pub fn new(layout: StorageLayout, poweroff: Vec<String>, reboot: Vec<String>, execute: bool) -> Self {
        Self {
            layout,
            poweroff,
            reboot,
            execute,
        }
    }

    fn run(&self, argv: &[String]) -> Result<()> {
        let Some((program, args)) = argv.split_first() else {
            bail!("empty command");
        };
        if !self.execute {
            tracing::info!(command = %argv.join(" "), "system command skipped (execute = false)");
            return Ok(());
        }
        let status = Command::new(program)
            .args(args)
            .status()
            .with_context(|| format!("failed to spawn {program}"))?;
        if !status.success() {
            bail!("{program} exited with {status}");
        }
        Ok(())
    }
}

impl SystemActions for HostActions {
    fn power_off(&mut self) -> Result<()> {
        self.run(&self.poweroff)
    }

    fn reboot(&mut self) -> Result<()> {
        self.run(&self.reboot)
    }

    fn apply_flash(&mut self) -> Result<()> {
        flashing::reflash(&self.layout).context("reflash failed")
    }

    fn restore_backup(&mut self) -> Result<()> {
        flashing::restore(&self.layout).context("restore failed")
    }
}

pub struct ShutdownOrchestrator {
    phase: ShutdownPhase,
    gate: ShutdownGate,
    layout: StorageLayout,
    actions: Box<dyn SystemActions>,
}

impl ShutdownOrchestrator {
    pub fn new(gate: ShutdownGate, layout: StorageLayout, actions: Box<dyn SystemActions>) -> Self {
        Self {
            phase: ShutdownPhase::Normal,
            gate,
            layout,
            actions,
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.phase
    }

    pub fn gate(&self) -> &ShutdownGate {
        &self.gate
    }

    /// Handle a `SHUTDOWN` request with raw kind `arg`.
    pub fn request(&mut self, arg: u8, out: &mut Outbox) {
        let Some(kind) = ShutdownKind::from_u8(arg) else {
            tracing::warn!(arg, "unknown shutdown kind");
            out.ack(Opcode::Shutdown, TransferCode::Error);
            return;
        };
        if matches!(
            self.phase,
            ShutdownPhase::ReadyForShutdown(_) | ShutdownPhase::Executed(_)
        ) {
            tracing::warn!(kind = kind.name(), phase = ?self.phase, "shutdown already under way");
            out.ack(Opcode::Shutdown, TransferCode::Error);
            return;
        }
        let missing = match kind {
            ShutdownKind::Flash => Some(self.layout.flash_in()),
            ShutdownKind::Restore => Some(self.layout.backup()),
            _ => None,
        }
        .filter(|p| !p.is_file());
        if let Some(path) = missing {
            tracing::warn!(kind = kind.name(), path = %path.display(), "package missing, refusing");
            out.ack(Opcode::Shutdown, TransferCode::FlashError);
            return;
        }

        out.ack(Opcode::Shutdown, TransferCode::None);
        self.phase = ShutdownPhase::Preparing(kind);
        self.gate.request();
        tracing::info!(kind = kind.name(), "preparing for shutdown");
    }

    /// Advance the shutdown on each tick. Returns the kind once the side
    /// effect has run.
    pub fn poll(&mut self, out: &mut Outbox) -> Option<ShutdownKind> {
        match self.phase {
            ShutdownPhase::Preparing(kind) if self.gate.is_ready() => {
                out.ack(Opcode::Shutdown, TransferCode::Ok);
                self.phase = ShutdownPhase::ReadyForShutdown(kind);
                tracing::info!(kind = kind.name(), "ready for shutdown");
                None
            }
            ShutdownPhase::ReadyForShutdown(kind) => {
                if let Err(e) = self.execute(kind) {
                    tracing::error!(kind = kind.name(), error = %e, "shutdown action failed");
                }
                self.phase = ShutdownPhase::Executed(kind);
                out.event(NodeEvent::ShutdownExecuted(kind));
                Some(kind)
            }
            _ => None,
        }
    }

    fn execute(&mut self, kind: ShutdownKind) -> Result<()> {
        tracing::info!(kind = kind.name(), "executing shutdown");
        match kind {
            ShutdownKind::PowerOff => self.actions.power_off(),
            ShutdownKind::Reboot => self.actions.reboot(),
            ShutdownKind::Flash => {
                // Reboot even after a failed flash: the backup has been put back.
                let flashed = self.actions.apply_flash();
                self.actions.reboot()?;
                flashed
            }
            ShutdownKind::Restore => {
                self.actions.restore_backup()?;
                self.actions.reboot()
            }
        }
    }
}
