//! Core logic for the pilot console: drone state, wire types and the
//! fallback simulator.

pub mod command;
pub mod error;
pub mod message;
pub mod models;
pub mod sim;

pub use command::{
    BackendCommand, DroneCommand, MoveCommand, OutboundMessage, RecordingAction, SessionMessage,
};
pub use error::{LinkError, NORMAL_CLOSURE};
pub use message::{AiStatus, BackendTelemetry, FrameMessage, InboundMessage};
pub use models::{
    normalize_yaw, Attitude, DroneState, FlightMode, MovementVector, SimulationTarget,
};
pub use sim::{Simulator, MAX_TICK_GAP, TICK_INTERVAL};
