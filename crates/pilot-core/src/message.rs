//! Inbound backend messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LinkError;
use crate::models::{
    normalize_yaw, Attitude, DroneState, FlightMode, BACKEND_FLYING_THRESHOLD_M,
};

/// Telemetry record in the backend's own field names.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackendTelemetry {
    #[serde(rename = "bateria")]
    pub battery: f64,
    #[serde(rename = "altura")]
    pub altitude: f64,
    #[serde(rename = "temperatura")]
    pub temperature: f64,
    #[serde(rename = "atitude")]
    pub attitude: Attitude,
    /// Reported but ignored: flight status is derived from altitude.
    #[serde(default)]
    pub is_flying: Option<bool>,
    /// Reported but ignored: recording only follows explicit commands.
    #[serde(default)]
    pub is_recording: Option<bool>,
}

impl BackendTelemetry {
    /// Overwrite the telemetry fields of `state` with this record.
    pub fn apply_to(&self, state: &mut DroneState) {
        state.battery = self.battery.clamp(0.0, 100.0);
        state.altitude = self.altitude.max(0.0);
        state.temperature = self.temperature;
        state.attitude = Attitude {
            pitch: self.attitude.pitch,
            roll: self.attitude.roll,
            yaw: normalize_yaw(self.attitude.yaw),
        };
        state.recompute_flying(BACKEND_FLYING_THRESHOLD_M);
    }
}

/// On-board AI status attached to frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiStatus {
    pub enabled: bool,
    pub mode: Option<String>,
    pub detected_objects: Vec<Value>,
}

/// A video frame bundled with a telemetry snapshot.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FrameMessage {
    /// Base64-encoded JPEG
    pub frame: String,
    pub state: BackendTelemetry,
    #[serde(default)]
    pub mode: Option<FlightMode>,
    #[serde(default)]
    pub ai: Option<AiStatus>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Frame(FrameMessage),
    CommandResult {
        #[serde(default)]
        command: Value,
        #[serde(default)]
        result: Value,
    },
    Connected {
        #[serde(default)]
        message: Option<String>,
    },
    State {},
    Error {
        #[serde(default)]
        error: String,
        #[serde(default)]
        command: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    pub fn parse(payload: &str) -> Result<Self, LinkError> {
        Ok(serde_json::from_str(payload)?)
    }
}
