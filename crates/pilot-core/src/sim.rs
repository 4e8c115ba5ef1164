//! Physics-free fallback simulator.
//!
//! Commands move setpoints instantly; each tick eases the drone state toward
//! them. Used while no backend connection is available.

use std::time::{Duration, Instant};

use crate::command::{DroneCommand, MoveCommand};
use crate::models::{
    normalize_yaw, DroneState, FlightMode, MovementVector, SimulationTarget,
    SIM_FLYING_THRESHOLD_M,
};

/// Hover altitude after takeoff.
pub const TAKEOFF_ALTITUDE_M: f64 = 1.0;
/// Default tick cadence.
pub const TICK_INTERVAL: Duration = Duration::from_millis(50);

const ALTITUDE_RATE: f64 = 2.0;
const YAW_RATE: f64 = 3.0;
const ATTITUDE_DAMPING: f64 = 0.95;
/// Gaps at or above this (suspend, stalled runtime) skip interpolation, so
/// the tick cadence must stay below it.
pub const MAX_TICK_GAP: Duration = Duration::from_millis(500);

/// Exponential approach of `current` toward `target`.
pub fn approach(current: f64, target: f64, elapsed_secs: f64, rate: f64) -> f64 {
    current + (target - current) * (elapsed_secs * rate).min(1.0)
}

/// Signed shortest rotation from `from` to `to`, in [-180, 180].
pub fn shortest_yaw_delta(from: f64, to: f64) -> f64 {
    let mut diff = to - from;
    if diff > 180.0 {
        diff -= 360.0;
    }
    if diff < -180.0 {
        diff += 360.0;
    }
    diff
}

#[derive(Debug, Clone)]
pub struct Simulator {
    target: SimulationTarget,
}

impl Simulator {
    pub fn new(now: Instant) -> Self {
        Self {
            target: SimulationTarget::new(now),
        }
    }

    pub fn target(&self) -> &SimulationTarget {
        &self.target
    }

    /// Restart the tick clock, e.g. when fallback mode is (re)entered.
    pub fn reset_clock(&mut self, now: Instant) {
        self.target.last_update = now;
    }

    /// Apply a command's setpoint changes. Takes effect immediately.
    pub fn apply(&mut self, command: &DroneCommand, state: &mut DroneState, mode: &mut FlightMode) {
        match command {
            DroneCommand::Takeoff => {
                self.target.target_altitude = TAKEOFF_ALTITUDE_M;
                state.is_flying = true;
            }
            DroneCommand::Land => {
                self.target.target_altitude = 0.0;
                state.is_flying = false;
            }
            DroneCommand::SetMode { mode: next } => *mode = next.clone(),
            DroneCommand::StartRecording => state.is_recording = true,
            DroneCommand::StopRecording => state.is_recording = false,
            DroneCommand::Move(stick) => self.apply_move(stick, state),
            DroneCommand::GetInfo => {}
        }
        tracing::debug!(
            "Simulated {}: target altitude {:.2}m, target yaw {:.1}",
            command.kind(),
            self.target.target_altitude,
            self.target.target_yaw
        );
    }

    fn apply_move(&mut self, stick: &MoveCommand, state: &mut DroneState) {
        // NaN or infinite input would poison the setpoints for good
        let axis = |value: f64| if value.is_finite() { value } else { 0.0 };
        let stick = MoveCommand {
            left_right: axis(stick.left_right),
            forward_backward: axis(stick.forward_backward),
            up_down: axis(stick.up_down),
            yaw: axis(stick.yaw),
        };

        if stick.up_down != 0.0 {
            self.target.target_altitude =
                (self.target.target_altitude + stick.up_down / 100.0).max(0.0);
        }

        if stick.yaw != 0.0 {
            self.target.target_yaw = normalize_yaw(state.attitude.yaw + stick.yaw / 5.0);
        }

        self.target.movement_vector = MovementVector {
            x: stick.left_right / 100.0,
            y: 0.0,
            z: stick.forward_backward / 100.0,
        };

        // Visual lean only; decays on tick.
        state.attitude.pitch = stick.forward_backward / 10.0;
        state.attitude.roll = stick.left_right / 10.0;
    }

    /// Advance the simulation to `now`. Returns false when the gap since the
    /// last tick was out of range and only the clock moved.
    pub fn tick(&mut self, state: &mut DroneState, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.target.last_update);
        self.target.last_update = now;

        if elapsed.is_zero() || elapsed >= MAX_TICK_GAP {
            return false;
        }
        let dt = elapsed.as_secs_f64();

        state.altitude = approach(state.altitude, self.target.target_altitude, dt, ALTITUDE_RATE)
            .max(0.0);

        let yaw = state.attitude.yaw;
        let delta = shortest_yaw_delta(yaw, self.target.target_yaw);
        state.attitude.yaw = normalize_yaw(yaw + delta * (dt * YAW_RATE).min(1.0));

        state.attitude.pitch *= ATTITUDE_DAMPING;
        state.attitude.roll *= ATTITUDE_DAMPING;

        state.recompute_flying(SIM_FLYING_THRESHOLD_M);
        true
    }
}
