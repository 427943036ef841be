//! Status records: the bounded queue the server fills, the state frame it
//! broadcasts, and the client-side reassembly of queued records.

use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Records kept before the oldest is evicted.
pub const QUEUE_CAPACITY: usize = 300;

/// Number of values in a [`ProgressRecord`]; each travels as its own frame.
pub const RECORD_FIELDS: usize = 9;

// ── Progress record ───────────────────────────────────────────────────────────

/// One snapshot of the measurement workflow, pulled by the client with
/// `GET_QUE_ITEM`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub index: f32,
    pub capture_allowed: f32,
    pub camera_ok: f32,
    pub vents_ok: f32,
    pub particles: f32,
    pub pwm_duty: f32,
    pub d_param: f32,
    pub dt_param: f32,
    pub free_space_mb: f32,
}

impl ProgressRecord {
    pub fn to_fields(&self) -> [f32; RECORD_FIELDS] {
        [
            self.index,
            self.capture_allowed,
            self.camera_ok,
            self.vents_ok,
            self.particles,
            self.pwm_duty,
            self.d_param,
            self.dt_param,
            self.free_space_mb,
        ]
    }

    pub fn from_fields(f: [f32; RECORD_FIELDS]) -> Self {
        Self {
            index: f[0],
            capture_allowed: f[1],
            camera_ok: f[2],
            vents_ok: f[3],
            particles: f[4],
            pwm_duty: f[5],
            d_param: f[6],
            dt_param: f[7],
            free_space_mb: f[8],
        }
    }

    /// `;`-separated line, flags and counts as integers.
    pub fn csv_line(&self) -> String {
        format!(
            "{};{};{};{};{};{:.6};{:.6};{:.6};{:.6}",
            self.index as i64,
            self.capture_allowed as i64,
            self.camera_ok as i64,
            self.vents_ok as i64,
            self.particles as i64,
            self.pwm_duty,
            self.d_param,
            self.dt_param,
            self.free_space_mb,
        )
    }

    /// Append to the received-records log, creating parent directories.
    pub fn append_csv(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{}", self.csv_line())
    }
}

impl std::fmt::Display for ProgressRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} capture={} camera={} vents={} particles={} pwm={:.3} d={:.3} dt={:.3} free={:.1}MB",
            self.index as i64,
            self.capture_allowed as i64,
            self.camera_ok as i64,
            self.vents_ok as i64,
            self.particles as i64,
            self.pwm_duty,
            self.d_param,
            self.dt_param,
            self.free_space_mb,
        )
    }
}

// ── Queue ─────────────────────────────────────────────────────────────────────

/// Bounded FIFO. Pushing onto a full queue drops the oldest record.
#[derive(Debug)]
pub struct StatusQueue {
    items: VecDeque<ProgressRecord>,
    capacity: usize,
}

impl StatusQueue {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: ProgressRecord) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(record);
    }

    pub fn pop(&mut self) -> Option<ProgressRecord> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Length as carried in the one-byte `GET_QUE_LENGTH` reply.
    pub fn wire_len(&self) -> u8 {
        self.items.len().min(u8::MAX as usize) as u8
    }
}

impl Default for StatusQueue {
    fn default() -> Self {
        Self::new(QUEUE_CAPACITY)
    }
}

// ── State frame ───────────────────────────────────────────────────────────────

/// Periodic 8-byte snapshot broadcast on the state group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateFrame {
    pub ready: bool,
    pub param_1_over: bool,
    pub param_2_over: bool,
    pub particles: u8,
    pub camera_ok: u8,
}

impl StateFrame {
    pub fn encode(&self) -> [u8; 8] {
        [
            self.ready as u8,
            self.param_1_over as u8,
            self.param_2_over as u8,
            self.particles,
            self.camera_ok,
            0xFF,
            0xFF,
            0xFF,
        ]
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 5 {
            return None;
        }
        Some(Self {
            ready: data[0] != 0,
            param_1_over: data[1] != 0,
            param_2_over: data[2] != 0,
            particles: data[3],
            camera_ok: data[4],
        })
    }
}

// ── Client-side reassembly ────────────────────────────────────────────────────

/// Collects the nine `GET_QUE_ITEM` responses of one record.
#[derive(Debug, Default)]
pub struct ProgressAssembler {
    fields: [Option<f32>; RECORD_FIELDS],
}

impl ProgressAssembler {
    /// Store field `index`. Returns the record once every field is present,
    /// and resets for the next one.
    pub fn accept(&mut self, index: u8, value: f32) -> Option<ProgressRecord> {
        let slot = self.fields.get_mut(index as usize)?;
        *slot = Some(value);
        if self.fields.iter().all(Option::is_some) {
            let mut out = [0.0; RECORD_FIELDS];
            for (dst, src) in out.iter_mut().zip(self.fields.iter()) {
                *dst = src.unwrap_or_default();
            }
            self.reset();
            return Some(ProgressRecord::from_fields(out));
        }
        None
    }

    pub fn reset(&mut self) {
        self.fields = [None; RECORD_FIELDS];
    }
}
