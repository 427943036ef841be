//! A client node for one console invocation: opens the bus, runs the
//! driver, issues commands and waits for what they produce.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use canlink_core::opcode::REFLASH;
use canlink_core::{Opcode, TransferCode};
use canlink_services::params;
use canlink_services::{
    ClientRole, Command, DeviceState, MemoryDefaults, Node, NodeCore, NodeDriver, NodeEvent,
    SharedState, StorageLayout, TransferEngine, UdpBus,
};

pub struct ConsoleOptions {
    pub bind: SocketAddr,
    pub peer: SocketAddr,
    pub layout: StorageLayout,
    pub priority: u8,
    pub tick: Duration,
    pub max_resends: u32,
    pub writes_per_progress: u32,
}

pub struct Console {
    commands: mpsc::Sender<Command>,
    events: mpsc::Receiver<NodeEvent>,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Console {
    pub async fn open(opts: ConsoleOptions) -> Result<Self> {
        let (shutdown, _) = broadcast::channel::<()>(1);
        let (bus, handle) = UdpBus::bind(opts.bind, opts.peer, shutdown.subscribe()).await?;

        let defaults = MemoryDefaults::default();
        let state = SharedState::new(DeviceState::from_defaults(&defaults));
        let core = NodeCore::new(
            state,
            Box::new(defaults),
            opts.layout,
            TransferEngine::new(opts.max_resends, opts.writes_per_progress),
        );
        let node = Node::new(core, Box::new(ClientRole::new()))?;

        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(256);
        let driver = NodeDriver::new(
            node,
            handle,
            cmd_rx,
            event_tx,
            opts.tick,
            opts.priority,
            shutdown.subscribe(),
        );

        let bus_task = tokio::spawn(async move {
            if let Err(e) = bus.run().await {
                tracing::error!(error = %e, "bus stopped");
            }
        });
        let driver_task = tokio::spawn(async move {
            if let Err(e) = driver.run().await {
                tracing::error!(error = %e, "driver stopped");
            }
        });

        Ok(Self {
            commands: cmd_tx,
            events: event_rx,
            shutdown,
            tasks: vec![bus_task, driver_task],
        })
    }

    pub async fn send(&self, cmd: Command) -> Result<()> {
        self.commands.send(cmd).await.context("node driver is gone")
    }

    /// Issue `cmd` and print events until one of them completes it. Each
    /// event restarts the `wait` window, so long transfers do not time out
    /// while they are progressing.
    pub async fn run(&mut self, cmd: Command, wait: Duration) -> Result<()> {
        let expect = Expect::from(&cmd);
        self.send(cmd).await?;
        loop {
            let event = match tokio::time::timeout(wait, self.events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => bail!("node driver stopped"),
                Err(_) => bail!("no answer from the server within {}s", wait.as_secs_f32()),
            };
            if !matches!(event, NodeEvent::State(_)) {
                print_event(&event);
            }
            match expect.check(&event) {
                Some(Ok(())) => return Ok(()),
                Some(Err(e)) => return Err(e),
                None => {}
            }
        }
    }

    /// Print every event until interrupted.
    pub async fn follow(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => return Ok(()),
                event = self.events.recv() => match event {
                    Some(event) => print_event(&event),
                    None => bail!("node driver stopped"),
                },
            }
        }
    }

    pub async fn close(self) {
        let _ = self.shutdown.send(());
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

// ── Completion ──────────────────────────────────────────────────────────────

/// Which event ends a command.
enum Expect {
    Param(u8),
    Ack(Opcode),
    /// A shutdown is finished by its `OK`, or refused by anything but `NONE`.
    Shutdown,
    QueueLength,
    Record,
    DbCount,
    Fetch(u8),
    Upload,
}

impl From<&Command> for Expect {
    fn from(cmd: &Command) -> Self {
        match cmd {
            Command::GetParam(id) => Expect::Param(*id),
            Command::SetParam { .. } => Expect::Ack(Opcode::SetParam),
            Command::QueueLength => Expect::QueueLength,
            Command::QueueItem => Expect::Record,
            Command::SetCapture(_) => Expect::Ack(Opcode::SetAllowCapture),
            Command::SetSendStates(_) => Expect::Ack(Opcode::SetSendStates),
            Command::SetDefaultCapture(_) => Expect::Ack(Opcode::SetDefaultAllowCapture),
            Command::SetDefaultSendStates(_) => Expect::Ack(Opcode::SetDefaultSendStates),
            Command::Shutdown(_) => Expect::Shutdown,
            Command::EnumDb => Expect::DbCount,
            Command::ClearDb(_) => Expect::Ack(Opcode::ClearDb),
            Command::FetchDb(id) => Expect::Fetch(*id),
            Command::Upload => Expect::Upload,
            Command::Polling(_) => Expect::QueueLength,
        }
    }
}

impl Expect {
    fn check(&self, event: &NodeEvent) -> Option<Result<()>> {
        let code_ok = |code: u8| {
            if code == TransferCode::Ok as u8 {
                Ok(())
            } else {
                Err(anyhow::anyhow!("server answered {}", code_name(code)))
            }
        };
        match (self, event) {
            (Expect::Param(id), NodeEvent::ParamValue { id: got, .. }) if id == got => Some(Ok(())),
            (Expect::Param(id), NodeEvent::ParamUnavailable { id: got }) if id == got => {
                Some(Err(anyhow::anyhow!("server could not read parameter {id}")))
            }
            (Expect::Ack(op), NodeEvent::Ack { opcode, code }) if op == opcode => Some(code_ok(*code)),
            (Expect::Shutdown, NodeEvent::Ack { opcode: Opcode::Shutdown, code })
                if *code != TransferCode::None as u8 =>
            {
                Some(code_ok(*code))
            }
            (Expect::QueueLength, NodeEvent::QueueLength(_)) => Some(Ok(())),
            (Expect::Record, NodeEvent::Record(_)) => Some(Ok(())),
            (Expect::DbCount, NodeEvent::DbCount(_)) => Some(Ok(())),
            (Expect::Fetch(id), NodeEvent::TransferComplete { file_id, .. }) if id == file_id => Some(Ok(())),
            (Expect::Fetch(id), NodeEvent::TransferFailed { file_id, reason }) if id == file_id => {
                Some(Err(anyhow::anyhow!("transfer of {id} failed: {reason}")))
            }
            (Expect::Upload, NodeEvent::SendComplete { file_id: REFLASH, .. }) => Some(Ok(())),
            (Expect::Upload, NodeEvent::Ack { opcode: Opcode::Upload, code }) => Some(code_ok(*code)),
            _ => None,
        }
    }
}

// ── Output ──────────────────────────────────────────────────────────────────

fn code_name(code: u8) -> String {
    match TransferCode::from_u8(code) {
        Some(c) => format!("{c:?}").to_uppercase(),
        None => format!("code {code}"),
    }
}

pub fn print_event(event: &NodeEvent) {
    match event {
        NodeEvent::ParamValue { id, value } => {
            let name = params::lookup(*id).map(|p| p.name).unwrap_or("?");
            println!("{name} = {value}");
        }
        NodeEvent::ParamUnavailable { id } => println!("parameter {id} unavailable"),
        NodeEvent::Ack { opcode, code } => println!("{opcode}: {}", code_name(*code)),
        NodeEvent::QueueLength(n) => println!("queue length: {n}"),
        NodeEvent::Record(record) => println!("{record}"),
        NodeEvent::DbCount(n) => println!("databases: {n}"),
        NodeEvent::State(frame) => println!(
            "state: ready={} p1_over={} p2_over={} particles={} camera={}",
            frame.ready, frame.param_1_over, frame.param_2_over, frame.particles, frame.camera_ok
        ),
        NodeEvent::TransferProgress { file_id, bytes } => {
            println!("file {file_id}: {bytes} bytes received")
        }
        NodeEvent::TransferComplete { file_id, path, bytes } => {
            println!("file {file_id}: complete, {bytes} bytes -> {}", path.display())
        }
        NodeEvent::TransferFailed { file_id, reason } => println!("file {file_id}: failed ({reason})"),
        NodeEvent::SendComplete { file_id, bytes } => println!("file {file_id}: sent {bytes} bytes"),
        NodeEvent::ShutdownExecuted(kind) => println!("{} executed", kind.name()),
    }
}
