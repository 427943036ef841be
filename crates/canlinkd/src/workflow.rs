//! Measurement workflow, the device side that produces state.
//!
//! Runs on its own thread. Each cycle it reads the latest snapshot from the
//! feed file (written by the capture and detection stack), publishes it into
//! the shared device state and queues one progress record. When a shutdown
//! is requested it stops and marks the gate ready.

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use canlink_services::{Measurements, ProgressRecord, SharedState, ShutdownGate};

/// One line of the measurement feed: the published measurements plus the
/// controller values that only go into progress records.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedSnapshot {
    #[serde(flatten)]
    pub measurements: Measurements,
    pub pwm_duty: f32,
    pub d_param: f32,
    pub dt_param: f32,
}

pub struct Workflow {
    state: SharedState,
    gate: ShutdownGate,
    feed: PathBuf,
    storage_root: PathBuf,
    cycle: Duration,
    index: u32,
}

impl Workflow {
    pub fn new(
        state: SharedState,
        gate: ShutdownGate,
        feed: PathBuf,
        storage_root: PathBuf,
        cycle: Duration,
    ) -> Self {
        Self {
            state,
            gate,
            feed,
            storage_root,
            cycle,
            index: 0,
        }
    }

    pub fn spawn(self) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("workflow".into())
            .spawn(move || self.run())
            .context("failed to spawn workflow thread")
    }

    fn run(mut self) {
        tracing::info!(feed = %self.feed.display(), cycle_ms = self.cycle.as_millis() as u64, "workflow started");
        while !self.gate.is_requested() {
            self.cycle_once();
            std::thread::sleep(self.cycle);
        }
        self.gate.mark_ready();
        tracing::info!(cycles = self.index, "workflow stopped, ready for shutdown");
    }

    /// One measurement cycle. Returns the queued record, if any.
    pub fn cycle_once(&mut self) -> Option<ProgressRecord> {
        if self.feed.as_os_str().is_empty() {
            return None;
        }
        let snapshot = match read_feed(&self.feed) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(error = %e, "no measurement snapshot");
                return None;
            }
        };

        let capture_allowed = {
            let mut state = self.state.lock();
            state.measurements = snapshot.measurements;
            state.capture.allowed()
        };

        let m = &snapshot.measurements;
        let record = ProgressRecord {
            index: self.index as f32,
            capture_allowed: flag(capture_allowed),
            camera_ok: flag(m.camera_ok),
            vents_ok: flag(m.vents_ok),
            particles: m.particles as f32,
            pwm_duty: snapshot.pwm_duty,
            d_param: snapshot.d_param,
            dt_param: snapshot.dt_param,
            free_space_mb: free_space_mb(&self.storage_root).unwrap_or(0.0),
        };
        self.index = self.index.wrapping_add(1);
        tracing::trace!(%record, "queued progress record");
        self.state.enqueue_status(record);
        Some(record)
    }
}

fn flag(b: bool) -> f32 {
    if b { 1.0 } else { 0.0 }
}

fn read_feed(path: &Path) -> Result<FeedSnapshot> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

/// Space available to unprivileged writers under `path`, in MiB.
pub fn free_space_mb(path: &Path) -> Result<f32> {
    let stat = nix::sys::statvfs::statvfs(path)
        .with_context(|| format!("statvfs {}", path.display()))?;
    let bytes = stat.blocks_available() as u64 * stat.fragment_size() as u64;
    Ok((bytes / (1024 * 1024)) as f32)
}
