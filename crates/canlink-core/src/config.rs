//! Configuration system for canlink nodes.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CANLINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/canlink/config.toml
//!   3. ~/.config/canlink/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub bus: BusConfig,
    pub storage: StorageConfig,
    pub transfer: TransferConfig,
    pub system: SystemConfig,
    pub workflow: WorkflowConfig,
}

/// Which half of the protocol a node speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// The sensing device: answers requests, sends state frames.
    Server,
    /// The operator console: issues requests.
    Client,
}

impl std::str::FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(NodeRole::Server),
            "client" => Ok(NodeRole::Client),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    pub role: NodeRole,
    /// Bus priority stamped on outgoing frames.
    pub priority: u8,
    /// Period of the housekeeping tick (state frames, shutdown polling).
    pub tick_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Local UDP address of the virtual bus.
    pub bind: String,
    /// Address of the other node on the virtual bus.
    pub peer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Holds `dbs/` and `transfer/`.
    pub root: PathBuf,
    /// Application directory replaced by a reflash.
    pub app_dir: PathBuf,
    /// Persisted defaults (TOML key/value table).
    pub defaults_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Consecutive checksum mismatches of one block before the receive is
    /// abandoned.
    pub max_resends: u32,
    /// Block writes between two progress reports.
    pub writes_per_progress: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub poweroff_command: Vec<String>,
    pub reboot_command: Vec<String>,
    /// If false, power actions are logged but not executed.
    pub execute: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// JSON file with the latest measurement snapshot. Empty = no feed.
    pub feed_path: PathBuf,
    pub cycle_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            role: NodeRole::Server,
            priority: crate::wire::DEFAULT_PRIORITY,
            tick_ms: 1000,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:47100".into(),
            peer: "127.0.0.1:47101".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: data_dir(),
            app_dir: data_dir().join("app"),
            defaults_file: config_dir().join("defaults.toml"),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_resends: 5,
            writes_per_progress: 100,
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            poweroff_command: vec!["systemctl".into(), "poweroff".into()],
            reboot_command: vec!["systemctl".into(), "reboot".into()],
            execute: false,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            feed_path: PathBuf::new(),
            cycle_ms: 1000,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("canlink")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("canlink")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, falling back to defaults if it is absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            NodeConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CANLINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&NodeConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CANLINK_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CANLINK_NODE__ROLE") {
            if let Ok(role) = v.parse() {
                self.node.role = role;
            }
        }
        if let Ok(v) = std::env::var("CANLINK_BUS__BIND") {
            self.bus.bind = v;
        }
        if let Ok(v) = std::env::var("CANLINK_BUS__PEER") {
            self.bus.peer = v;
        }
        if let Ok(v) = std::env::var("CANLINK_STORAGE__ROOT") {
            self.storage.root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CANLINK_SYSTEM__EXECUTE") {
            self.system.execute = v == "true" || v == "1";
        }
    }
}
