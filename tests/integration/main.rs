//! canlink integration test harness.
//!
//! Each test runs a server node and a client node in-process, each with its
//! own storage root, connected by the loopback bus (or the UDP bus in
//! `udp.rs`). Nothing here needs root or real bus hardware.
//!
//!   cargo test --test integration

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use canlink_services::transfer::{MAX_RESENDS, WRITES_TO_UPDATE};
use canlink_services::{
    flashing, loopback_pair, BusHandle, ClientRole, Command, DeviceState, MemoryDefaults, Node,
    NodeCore, NodeDriver, NodeEvent, ServerRole, SharedState, ShutdownGate, ShutdownOrchestrator,
    StorageLayout, SystemActions, TransferEngine,
};

mod control;
mod flash;
mod transfer;
mod udp;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const TICK: Duration = Duration::from_millis(20);
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Power actions that only record what ran. Flash and restore do the real
/// archive work against the server's layout.
#[derive(Clone)]
pub struct TestActions {
    pub layout: StorageLayout,
    pub log: Arc<Mutex<Vec<&'static str>>>,
}

impl SystemActions for TestActions {
    fn power_off(&mut self) -> Result<()> {
        self.log.lock().unwrap().push("power_off");
        Ok(())
    }

    fn reboot(&mut self) -> Result<()> {
        self.log.lock().unwrap().push("reboot");
        Ok(())
    }

    fn apply_flash(&mut self) -> Result<()> {
        self.log.lock().unwrap().push("apply_flash");
        flashing::reflash(&self.layout)?;
        Ok(())
    }

    fn restore_backup(&mut self) -> Result<()> {
        self.log.lock().unwrap().push("restore_backup");
        flashing::restore(&self.layout)?;
        Ok(())
    }
}

pub struct TestNode {
    pub commands: mpsc::Sender<Command>,
    pub events: mpsc::Receiver<NodeEvent>,
    pub state: SharedState,
    pub layout: StorageLayout,
    pub task: JoinHandle<Result<Node>>,
}

impl TestNode {
    pub fn spawn(
        node: Node,
        state: SharedState,
        layout: StorageLayout,
        bus: BusHandle,
        shutdown: &broadcast::Sender<()>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(1024);
        let driver = NodeDriver::new(node, bus, cmd_rx, event_tx, TICK, 6, shutdown.subscribe());
        Self {
            commands: cmd_tx,
            events: event_rx,
            state,
            layout,
            task: tokio::spawn(driver.run()),
        }
    }

    pub async fn command(&self, cmd: Command) {
        self.commands.send(cmd).await.unwrap();
    }

    /// Wait for the first event matching `pred`, skipping the rest.
    pub async fn expect<F>(&mut self, what: &str, mut pred: F) -> Result<NodeEvent>
    where
        F: FnMut(&NodeEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) if pred(&event) => return Ok(event),
                Ok(Some(_)) => continue,
                Ok(None) => bail!("node stopped while waiting for {what}"),
                Err(_) => bail!("timed out waiting for {what}"),
            }
        }
    }
}

pub struct Pair {
    pub server: TestNode,
    pub client: TestNode,
    pub gate: ShutdownGate,
    pub actions: Arc<Mutex<Vec<&'static str>>>,
    pub shutdown: broadcast::Sender<()>,
    pub server_dir: tempfile::TempDir,
    pub client_dir: tempfile::TempDir,
}

impl Pair {
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.server.task.await;
        let _ = self.client.task.await;
    }
}

pub fn layout_in(dir: &Path) -> StorageLayout {
    StorageLayout::new(dir, dir.join("app"))
}

fn node_state() -> (MemoryDefaults, SharedState) {
    // No pacing: chunk streams run as fast as the channel allows.
    let defaults = MemoryDefaults::with(&[("min_delay", "0")]);
    let state = SharedState::new(DeviceState::from_defaults(&defaults));
    (defaults, state)
}

pub fn server_node(layout: &StorageLayout, gate: ShutdownGate, actions: TestActions) -> (Node, SharedState) {
    let (defaults, state) = node_state();
    let orch = ShutdownOrchestrator::new(gate, layout.clone(), Box::new(actions));
    let core = NodeCore::new(
        state.clone(),
        Box::new(defaults),
        layout.clone(),
        TransferEngine::new(MAX_RESENDS, WRITES_TO_UPDATE),
    );
    (Node::new(core, Box::new(ServerRole::new(orch))).unwrap(), state)
}

pub fn client_node(layout: &StorageLayout) -> (Node, SharedState) {
    let (defaults, state) = node_state();
    let core = NodeCore::new(
        state.clone(),
        Box::new(defaults),
        layout.clone(),
        TransferEngine::new(MAX_RESENDS, WRITES_TO_UPDATE),
    );
    (Node::new(core, Box::new(ClientRole::new())).unwrap(), state)
}

/// Server and client joined by the loopback bus.
pub fn spawn_pair() -> Pair {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let server_layout = layout_in(server_dir.path());
    let client_layout = layout_in(client_dir.path());

    let gate = ShutdownGate::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let actions = TestActions {
        layout: server_layout.clone(),
        log: log.clone(),
    };

    let (shutdown, _) = broadcast::channel::<()>(1);
    let (server_bus, client_bus) = loopback_pair();

    let (node, state) = server_node(&server_layout, gate.clone(), actions);
    // State frames only where a test turns them on.
    state.lock().send_states = false;
    let server = TestNode::spawn(node, state, server_layout, server_bus, &shutdown);
    let (node, state) = client_node(&client_layout);
    let client = TestNode::spawn(node, state, client_layout, client_bus, &shutdown);

    Pair {
        server,
        client,
        gate,
        actions: log,
        shutdown,
        server_dir,
        client_dir,
    }
}

/// Deterministic, non-repeating file content.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}
