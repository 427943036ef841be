//! canlink-ctl — operator console for a canlink server node.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use canlink_core::config::NodeConfig;
use canlink_core::opcode::FORCE_CAPTURE;
use canlink_core::ShutdownKind;
use canlink_services::{flashing, Command, StorageLayout};

mod console;

use console::{Console, ConsoleOptions};

#[derive(Parser, Debug)]
#[command(name = "canlink-ctl")]
#[command(version, about = "Operator console for a canlink server node", long_about = None)]
struct Cli {
    /// Config file (defaults to the usual canlink config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Local bus address [default: the config's bus.peer]
    #[arg(long, global = true)]
    bind: Option<SocketAddr>,

    /// Server bus address [default: the config's bus.bind]
    #[arg(long, global = true)]
    peer: Option<SocketAddr>,

    /// Seconds to wait for an answer
    #[arg(short, long, global = true, default_value = "3")]
    wait: f32,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl From<Switch> for bool {
    fn from(s: Switch) -> bool {
        matches!(s, Switch::On)
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Capture {
    On,
    Off,
    /// Capture even if the camera self-test failed
    Force,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Read a parameter (0 param_1, 1 param_2, 2 param_1_th, 3 param_2_th, 4 min_delay)
    GetParam { id: u8 },
    /// Set a threshold or min_delay
    SetParam { id: u8, value: f32 },
    /// Number of queued progress records
    QueueLength,
    /// Pull one progress record
    QueueItem,
    /// Allow, forbid or force image capture
    Capture {
        #[arg(value_enum)]
        mode: Capture,
    },
    /// Turn periodic state frames on or off
    SendStates {
        #[arg(value_enum)]
        switch: Switch,
    },
    /// Persist the capture default
    DefaultCapture {
        #[arg(value_enum)]
        switch: Switch,
    },
    /// Persist the state-frame default
    DefaultSendStates {
        #[arg(value_enum)]
        switch: Switch,
    },
    /// Power the server off
    Shutdown,
    /// Reboot the server
    Reboot,
    /// Apply the uploaded package and reboot
    Flash,
    /// Restore the pre-flash backup and reboot
    Restore,
    /// Count databases on the server
    EnumDb,
    /// Delete a database on the server
    ClearDb { id: u8 },
    /// Download a database from the server
    FetchDb { id: u8 },
    /// Have the server pull the staged flash package
    Upload,
    /// Zip a directory as the flash package for `upload`
    FlashPrepare { dir: PathBuf },
    /// Poll the status queue and print records until interrupted
    Poll,
}

impl Cmd {
    fn into_command(self) -> Option<Command> {
        let cmd = match self {
            Cmd::GetParam { id } => Command::GetParam(id),
            Cmd::SetParam { id, value } => Command::SetParam { id, value },
            Cmd::QueueLength => Command::QueueLength,
            Cmd::QueueItem => Command::QueueItem,
            Cmd::Capture { mode } => Command::SetCapture(match mode {
                Capture::Off => 0,
                Capture::On => 1,
                Capture::Force => FORCE_CAPTURE,
            }),
            Cmd::SendStates { switch } => Command::SetSendStates(switch.into()),
            Cmd::DefaultCapture { switch } => Command::SetDefaultCapture(switch.into()),
            Cmd::DefaultSendStates { switch } => Command::SetDefaultSendStates(switch.into()),
            Cmd::Shutdown => Command::Shutdown(ShutdownKind::PowerOff),
            Cmd::Reboot => Command::Shutdown(ShutdownKind::Reboot),
            Cmd::Flash => Command::Shutdown(ShutdownKind::Flash),
            Cmd::Restore => Command::Shutdown(ShutdownKind::Restore),
            Cmd::EnumDb => Command::EnumDb,
            Cmd::ClearDb { id } => Command::ClearDb(id),
            Cmd::FetchDb { id } => Command::FetchDb(id),
            Cmd::Upload => Command::Upload,
            Cmd::Poll => Command::Polling(true),
            Cmd::FlashPrepare { .. } => return None,
        };
        Some(cmd)
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<NodeConfig> {
    match path {
        Some(path) => NodeConfig::load_from(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => Ok(NodeConfig::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            NodeConfig::default()
        })),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let layout = StorageLayout::new(&config.storage.root, &config.storage.app_dir);

    if let Cmd::FlashPrepare { dir } = &cli.command {
        let path = flashing::prepare(dir, &layout)
            .with_context(|| format!("failed to package {}", dir.display()))?;
        println!("staged {}", path.display());
        return Ok(());
    }

    // The console sits at the far end of the server's bus config.
    let bind = match cli.bind {
        Some(addr) => addr,
        None => config.bus.peer.parse().context("invalid bus.peer")?,
    };
    let peer = match cli.peer {
        Some(addr) => addr,
        None => config.bus.bind.parse().context("invalid bus.bind")?,
    };
    let wait = Duration::try_from_secs_f32(cli.wait).context("--wait must be a non-negative number")?;

    let mut console = Console::open(ConsoleOptions {
        bind,
        peer,
        layout,
        priority: config.node.priority,
        tick: Duration::from_millis(config.node.tick_ms.max(1)),
        max_resends: config.transfer.max_resends,
        writes_per_progress: config.transfer.writes_per_progress,
    })
    .await?;

    let polling = matches!(cli.command, Cmd::Poll);
    let result = match cli.command.into_command() {
        Some(cmd) if polling => match console.send(cmd).await {
            Ok(()) => console.follow().await,
            Err(e) => Err(e),
        },
        Some(cmd) => console.run(cmd, wait).await,
        None => Ok(()),
    };

    console.close().await;
    result
}
