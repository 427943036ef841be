//! Bus adapters. A node only ever sees a [`BusHandle`]: a pair of mpsc
//! channels carrying [`BusFrame`]s. The loopback pair wires two handles
//! together in-process; [`UdpBus`] bridges a handle to a UDP peer.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use canlink_core::wire::BusFrame;

/// Frames in flight per direction before senders wait.
pub const BUS_DEPTH: usize = 1024;

pub struct BusHandle {
    pub tx: mpsc::Sender<BusFrame>,
    pub rx: mpsc::Receiver<BusFrame>,
}

/// Two handles where each one's `tx` feeds the other's `rx`.
pub fn loopback_pair() -> (BusHandle, BusHandle) {
    let (a_tx, b_rx) = mpsc::channel(BUS_DEPTH);
    let (b_tx, a_rx) = mpsc::channel(BUS_DEPTH);
    (
        BusHandle { tx: a_tx, rx: a_rx },
        BusHandle { tx: b_tx, rx: b_rx },
    )
}

// ── UDP virtual bus ─────────────────────────────────────────────────────────

/// Carries frames as datagrams between two fixed addresses.
pub struct UdpBus {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    inbound: mpsc::Sender<BusFrame>,
    outbound: mpsc::Receiver<BusFrame>,
    shutdown: broadcast::Receiver<()>,
}

impl UdpBus {
    /// Bind `bind` and return the bridge task plus the node-facing handle.
    pub async fn bind(
        bind: SocketAddr,
        peer: SocketAddr,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(Self, BusHandle)> {
        let socket = UdpSocket::bind(bind)
            .await
            .with_context(|| format!("failed to bind bus socket on {bind}"))?;
        tracing::info!(bind = %socket.local_addr()?, %peer, "udp bus bound");

        let (inbound, node_rx) = mpsc::channel(BUS_DEPTH);
        let (node_tx, outbound) = mpsc::channel(BUS_DEPTH);
        let bus = Self {
            socket: Arc::new(socket),
            peer,
            inbound,
            outbound,
            shutdown,
        };
        Ok((bus, BusHandle { tx: node_tx, rx: node_rx }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(mut self) -> Result<()> {
        let mut buf = [0u8; 64];

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("udp bus shutting down");
                    return Ok(());
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };
                    if from != self.peer {
                        tracing::debug!(%from, "datagram from unknown sender");
                        continue;
                    }
                    match BusFrame::from_datagram(&buf[..len]) {
                        Some(frame) => {
                            if self.inbound.send(frame).await.is_err() {
                                tracing::info!("node gone, udp bus stopping");
                                return Ok(());
                            }
                        }
                        None => tracing::debug!(data = %hex::encode(&buf[..len]), "undecodable datagram"),
                    }
                }

                frame = self.outbound.recv() => {
                    let Some(frame) = frame else {
                        tracing::info!("node gone, udp bus stopping");
                        return Ok(());
                    };
                    if let Err(e) = self.socket.send_to(&frame.to_datagram(), self.peer).await {
                        tracing::warn!(peer = %self.peer, error = %e, "send_to failed");
                    }
                }
            }
        }
    }
}
