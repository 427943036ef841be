//! Async driver: owns a [`Node`] and feeds it bus frames, console commands
//! and ticks until shutdown.
//!
//! Paced frames (chunk streams, queue pulls) are followed by the node's
//! `min_delay`. The sleep is raced against shutdown so a long transfer never
//! holds up exit.

use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

use crate::bus::BusHandle;
use crate::node::{Command, Node};
use crate::outbox::{NodeEvent, Outbox};

pub struct NodeDriver {
    node: Node,
    bus: BusHandle,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<NodeEvent>,
    tick: Duration,
    priority: u8,
    shutdown: broadcast::Receiver<()>,
}

impl NodeDriver {
    pub fn new(
        node: Node,
        bus: BusHandle,
        commands: mpsc::Receiver<Command>,
        events: mpsc::Sender<NodeEvent>,
        tick: Duration,
        priority: u8,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            node,
            bus,
            commands,
            events,
            tick,
            priority,
            shutdown,
        }
    }

    /// Runs until shutdown, until the bus closes or until the node has
    /// executed a shutdown. Returns the node for inspection.
    pub async fn run(mut self) -> Result<Node> {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commands_open = true;

        tracing::info!(role = ?self.node.role(), tick_ms = self.tick.as_millis() as u64, "node driver started");

        loop {
            let out = tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("node driver shutting down");
                    return Ok(self.node);
                }

                frame = self.bus.rx.recv() => match frame {
                    Some(frame) => self.node.handle_frame(&frame),
                    None => {
                        tracing::warn!("bus closed, node driver stopping");
                        return Ok(self.node);
                    }
                },

                cmd = self.commands.recv(), if commands_open => match cmd {
                    Some(cmd) => {
                        tracing::debug!(?cmd, "command");
                        self.node.command(cmd)
                    }
                    None => {
                        commands_open = false;
                        continue;
                    }
                },

                _ = interval.tick() => self.node.tick(),
            };

            if !self.flush(out).await? {
                tracing::info!("node driver shutting down");
                return Ok(self.node);
            }
            if self.node.is_finished() {
                tracing::info!("shutdown executed, node driver stopping");
                return Ok(self.node);
            }
        }
    }

    /// Send the outbox. Returns `false` if shutdown arrived mid-flush.
    async fn flush(&mut self, out: Outbox) -> Result<bool> {
        for event in out.events {
            // Nobody listening is fine: the daemon drops its receiver.
            let _ = self.events.send(event).await;
        }

        for outgoing in out.frames {
            let paced = outgoing.is_paced();
            let frame = match outgoing.into_frame(self.priority) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(error = %e, "unencodable outgoing frame");
                    continue;
                }
            };
            if self.bus.tx.send(frame).await.is_err() {
                tracing::warn!("bus closed while sending");
                return Ok(false);
            }
            if paced {
                let delay = self.node.pacing_delay();
                if delay.is_zero() {
                    tokio::task::yield_now().await;
                    continue;
                }
                tokio::select! {
                    _ = self.shutdown.recv() => return Ok(false),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        Ok(true)
    }
}
