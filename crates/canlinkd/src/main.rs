//! canlinkd — canlink server node.
//!
//! Opens the virtual bus, answers the console's requests, publishes state
//! frames and runs the measurement workflow until a shutdown is executed or
//! the process is interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};

use canlink_core::config::{NodeConfig, NodeRole};
use canlink_services::{
    DeviceState, FileDefaults, HostActions, Node, NodeCore, NodeDriver, NodeEvent, ServerRole,
    SharedState, ShutdownGate, ShutdownOrchestrator, StorageLayout, TransferEngine, UdpBus,
};

mod workflow;

use workflow::Workflow;

fn config_from_args() -> Result<NodeConfig> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut path: Option<PathBuf> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                path = Some(args.get(i).context("--config requires a path")?.into());
            }
            "--help" | "-h" => {
                println!("usage: canlinkd [--config PATH]");
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
        i += 1;
    }

    if let Some(path) = path {
        return NodeConfig::load_from(&path)
            .with_context(|| format!("failed to load {}", path.display()));
    }
    if let Err(e) = NodeConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    Ok(NodeConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        NodeConfig::default()
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = config_from_args()?;
    if config.node.role != NodeRole::Server {
        tracing::warn!(role = ?config.node.role, "canlinkd always runs the server role");
    }

    let bind: SocketAddr = config.bus.bind.parse().context("invalid bus.bind")?;
    let peer: SocketAddr = config.bus.peer.parse().context("invalid bus.peer")?;
    tracing::info!(%bind, %peer, root = %config.storage.root.display(), "canlinkd starting");

    // ── Node ────────────────────────────────────────────────────────────────

    let layout = StorageLayout::new(&config.storage.root, &config.storage.app_dir);
    std::fs::create_dir_all(layout.dbs_dir())
        .with_context(|| format!("failed to create {}", layout.dbs_dir().display()))?;

    let defaults = FileDefaults::open(&config.storage.defaults_file)
        .with_context(|| format!("failed to open {}", config.storage.defaults_file.display()))?;
    let state = SharedState::new(DeviceState::from_defaults(&defaults));
    let gate = ShutdownGate::new();

    let actions = HostActions::new(
        layout.clone(),
        config.system.poweroff_command.clone(),
        config.system.reboot_command.clone(),
        config.system.execute,
    );
    if !config.system.execute {
        tracing::warn!("system.execute is off, power actions will only be logged");
    }
    let orchestrator = ShutdownOrchestrator::new(gate.clone(), layout.clone(), Box::new(actions));

    let core = NodeCore::new(
        state.clone(),
        Box::new(defaults),
        layout,
        TransferEngine::new(config.transfer.max_resends, config.transfer.writes_per_progress),
    );
    let node = Node::new(core, Box::new(ServerRole::new(orchestrator)))?;

    // ── Tasks ───────────────────────────────────────────────────────────────

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received");
                let _ = tx.send(());
            }
        });
    }

    let (bus, bus_handle) = UdpBus::bind(bind, peer, shutdown_tx.subscribe()).await?;
    let bus_task = tokio::spawn(bus.run());

    let workflow = Workflow::new(
        state,
        gate.clone(),
        config.workflow.feed_path.clone(),
        config.storage.root.clone(),
        Duration::from_millis(config.workflow.cycle_ms.max(1)),
    )
    .spawn()?;

    // The daemon has no console; events are only logged.
    let (_cmd_tx, cmd_rx) = mpsc::channel(1);
    let (event_tx, mut event_rx) = mpsc::channel::<NodeEvent>(64);
    let event_logger = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                NodeEvent::TransferComplete { file_id, path, bytes } => {
                    tracing::info!(file_id, path = %path.display(), bytes, "file received")
                }
                NodeEvent::SendComplete { file_id, bytes } => {
                    tracing::info!(file_id, bytes, "file sent")
                }
                NodeEvent::ShutdownExecuted(kind) => tracing::info!(kind = kind.name(), "shutdown executed"),
                other => tracing::debug!(?other, "node event"),
            }
        }
    });

    let driver = NodeDriver::new(
        node,
        bus_handle,
        cmd_rx,
        event_tx,
        Duration::from_millis(config.node.tick_ms.max(1)),
        config.node.priority,
        shutdown_tx.subscribe(),
    );
    let driver_task = tokio::spawn(driver.run());

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = driver_task        => match r {
            Ok(Ok(_)) => tracing::info!("node finished"),
            r => tracing::error!("node driver exited: {:?}", r.map(|r| r.map(|_| ()))),
        },
    }

    let _ = shutdown_tx.send(());
    gate.request();
    if let Err(e) = bus_task.await {
        tracing::warn!(error = %e, "bus task panicked");
    }
    match tokio::task::spawn_blocking(move || workflow.join()).await {
        Ok(Ok(())) => {}
        _ => tracing::warn!("workflow thread did not stop cleanly"),
    }
    event_logger.abort();

    Ok(())
}
