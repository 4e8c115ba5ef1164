//! Core data models for the pilot console.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Altitude above which a backend-reported drone counts as airborne.
pub const BACKEND_FLYING_THRESHOLD_M: f64 = 0.1;
/// Altitude above which a simulated drone counts as airborne.
pub const SIM_FLYING_THRESHOLD_M: f64 = 0.05;

/// Drone orientation in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Attitude {
    pub pitch: f64,
    pub roll: f64,
    /// Heading, kept in [0, 360)
    pub yaw: f64,
}

/// Live snapshot of the drone as seen by the console.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroneState {
    /// Battery percentage [0, 100]
    pub battery: f64,
    /// Altitude in meters, never negative
    pub altitude: f64,
    /// Temperature in degrees Celsius
    pub temperature: f64,
    pub attitude: Attitude,
    /// Derived from altitude, never trusted from the backend
    pub is_flying: bool,
    /// Only changed by an explicit recording command
    pub is_recording: bool,
}

impl Default for DroneState {
    fn default() -> Self {
        Self {
            battery: 100.0,
            altitude: 0.0,
            temperature: 25.0,
            attitude: Attitude::default(),
            is_flying: false,
            is_recording: false,
        }
    }
}

impl DroneState {
    /// Recompute `is_flying` from the current altitude.
    pub fn recompute_flying(&mut self, threshold_m: f64) {
        self.is_flying = self.altitude > threshold_m;
    }
}

/// Wrap an angle in degrees into [0, 360).
pub fn normalize_yaw(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Flight mode reported by the backend or selected by the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FlightMode {
    #[default]
    Manual,
    FaceTracking,
    Slam,
    PathPlanning,
    Neural,
    /// A mode the backend knows about that the console does not
    Other(String),
}

impl FlightMode {
    pub fn as_str(&self) -> &str {
        match self {
            FlightMode::Manual => "manual",
            FlightMode::FaceTracking => "face_tracking",
            FlightMode::Slam => "slam",
            FlightMode::PathPlanning => "path_planning",
            FlightMode::Neural => "neural",
            FlightMode::Other(name) => name,
        }
    }
}

impl From<String> for FlightMode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "manual" => FlightMode::Manual,
            "face_tracking" => FlightMode::FaceTracking,
            "slam" => FlightMode::Slam,
            "path_planning" => FlightMode::PathPlanning,
            "neural" => FlightMode::Neural,
            _ => FlightMode::Other(value),
        }
    }
}

impl From<&str> for FlightMode {
    fn from(value: &str) -> Self {
        FlightMode::from(value.to_string())
    }
}

impl From<FlightMode> for String {
    fn from(mode: FlightMode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Planar/vertical movement request, normalized to roughly [-1, 1] per axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MovementVector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Setpoints the fallback simulator steers toward.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationTarget {
    pub target_altitude: f64,
    pub target_yaw: f64,
    pub movement_vector: MovementVector,
    pub last_update: Instant,
}

impl SimulationTarget {
    pub fn new(now: Instant) -> Self {
        Self {
            target_altitude: 0.0,
            target_yaw: 0.0,
            movement_vector: MovementVector::default(),
            last_update: now,
        }
    }
}
