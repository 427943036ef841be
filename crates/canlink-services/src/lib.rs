//! canlink-services — everything a node does with a message once it has
//! been framed: device state, the transfer engine, shutdown, role dispatch,
//! and the async driver and bus adapters that run it.

pub mod bus;
pub mod client;
pub mod defaults;
pub mod driver;
pub mod error;
pub mod flashing;
pub mod layout;
pub mod node;
pub mod outbox;
pub mod params;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod status;
pub mod transfer;

pub use bus::{loopback_pair, BusHandle, UdpBus};
pub use client::ClientRole;
pub use defaults::{Defaults, FileDefaults, MemoryDefaults};
pub use driver::NodeDriver;
pub use error::ProtocolError;
pub use layout::StorageLayout;
pub use node::{Command, Node, NodeCore, RoleHandler};
pub use outbox::{NodeEvent, Outbox, Outgoing};
pub use server::ServerRole;
pub use shutdown::{HostActions, ShutdownGate, ShutdownOrchestrator, SystemActions};
pub use state::{DeviceState, Measurements, SharedState};
pub use status::{ProgressRecord, StateFrame, StatusQueue};
pub use transfer::TransferEngine;
