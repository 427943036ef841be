//! Device state: parameter values, capture and broadcast flags, the latest
//! measurements and the status queue.
//!
//! The node driver and the measurement workflow both touch this, so it lives
//! behind [`SharedState`]. Every access is a short critical section; nothing
//! holds the lock across I/O.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::defaults::{get_bool, get_f32, Defaults};
use crate::error::ProtocolError;
use crate::params::{self, ParamSpec};
use crate::status::{ProgressRecord, StateFrame, StatusQueue};

/// Longest pacing delay accepted for `min_delay`, in seconds.
pub const MAX_MIN_DELAY: f32 = 60.0;

/// Capture permission as set by `SET_ALLOW_CAPTURE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureMode {
    Off,
    On,
    /// Capture even when the camera self-test failed.
    Force,
}

impl CaptureMode {
    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0 => Some(Self::Off),
            1 => Some(Self::On),
            canlink_core::opcode::FORCE_CAPTURE => Some(Self::Force),
            _ => None,
        }
    }

    pub fn allowed(self) -> bool {
        self != Self::Off
    }
}

/// Values produced by the measurement workflow.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Measurements {
    pub ready: bool,
    pub param_1: f32,
    pub param_2: f32,
    pub particles: u32,
    pub camera_ok: bool,
    pub vents_ok: bool,
}

#[derive(Debug)]
pub struct DeviceState {
    pub param_1_th: f32,
    pub param_2_th: f32,
    /// Seconds between paced frames.
    pub min_delay: f32,
    pub capture: CaptureMode,
    pub send_states: bool,
    pub measurements: Measurements,
    pub queue: StatusQueue,
}

impl DeviceState {
    pub fn from_defaults(store: &dyn Defaults) -> Self {
        let allow = get_bool(store, "allow_capture").unwrap_or(true);
        Self {
            param_1_th: get_f32(store, "param_1_th").unwrap_or(0.0),
            param_2_th: get_f32(store, "param_2_th").unwrap_or(0.0),
            min_delay: get_f32(store, "min_delay")
                .filter(|v| v.is_finite() && (0.0..=MAX_MIN_DELAY).contains(v))
                .unwrap_or(0.1),
            capture: if allow { CaptureMode::On } else { CaptureMode::Off },
            send_states: get_bool(store, "send_states").unwrap_or(true),
            measurements: Measurements::default(),
            queue: StatusQueue::default(),
        }
    }

    pub fn param(&self, id: u8) -> Result<f32, ProtocolError> {
        match id {
            params::PARAM_1 => Ok(self.measurements.param_1),
            params::PARAM_2 => Ok(self.measurements.param_2),
            params::PARAM_1_TH => Ok(self.param_1_th),
            params::PARAM_2_TH => Ok(self.param_2_th),
            params::MIN_DELAY => Ok(self.min_delay),
            other => Err(ProtocolError::UnknownParam(other)),
        }
    }

    /// Validates against the parameter table and stores the value. Returns
    /// the table entry so the caller can persist under its name.
    pub fn set_param(&mut self, id: u8, value: f32) -> Result<&'static ParamSpec, ProtocolError> {
        let entry = params::lookup(id).ok_or(ProtocolError::UnknownParam(id))?;
        if !entry.settable {
            return Err(ProtocolError::NotSettable(entry.name));
        }
        let too_long = entry.id == params::MIN_DELAY && value > MAX_MIN_DELAY;
        if !value.is_finite() || (entry.non_negative && value < 0.0) || too_long {
            return Err(ProtocolError::OutOfRange {
                name: entry.name,
                value,
            });
        }
        match id {
            params::PARAM_1_TH => self.param_1_th = value,
            params::PARAM_2_TH => self.param_2_th = value,
            params::MIN_DELAY => self.min_delay = value,
            _ => return Err(ProtocolError::NotSettable(entry.name)),
        }
        Ok(entry)
    }

    pub fn state_frame(&self) -> StateFrame {
        let m = &self.measurements;
        StateFrame {
            ready: m.ready,
            param_1_over: m.param_1 > self.param_1_th,
            param_2_over: m.param_2 > self.param_2_th,
            particles: m.particles.min(u8::MAX as u32) as u8,
            camera_ok: m.camera_ok as u8,
        }
    }

    pub fn enqueue_status(&mut self, record: ProgressRecord) {
        self.queue.push(record);
    }

    pub fn dequeue_status(&mut self) -> Result<ProgressRecord, ProtocolError> {
        self.queue.pop().ok_or(ProtocolError::QueueEmpty)
    }
}

/// Cloneable handle to the device state.
#[derive(Clone)]
pub struct SharedState(Arc<Mutex<DeviceState>>);

impl SharedState {
    pub fn new(state: DeviceState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    /// A panic while holding the lock cannot leave the state half-written in
    /// a way that matters here, so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update_measurements(&self, m: Measurements) {
        self.lock().measurements = m;
    }

    pub fn enqueue_status(&self, record: ProgressRecord) {
        self.lock().enqueue_status(record);
    }
}
