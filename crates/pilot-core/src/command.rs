//! Operator commands and their backend wire shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LinkError;
use crate::models::FlightMode;

/// Stick input for a `move` command. Each axis is in [-100, 100].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MoveCommand {
    pub left_right: f64,
    pub forward_backward: f64,
    pub up_down: f64,
    pub yaw: f64,
}

/// A command issued by the operator, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DroneCommand {
    Takeoff,
    Land,
    Move(MoveCommand),
    SetMode { mode: FlightMode },
    StartRecording,
    StopRecording,
    GetInfo,
}

const KNOWN_COMMANDS: &[&str] = &[
    "takeoff",
    "land",
    "move",
    "set_mode",
    "start_recording",
    "stop_recording",
    "get_info",
];

impl DroneCommand {
    /// Parse an operator command from JSON, rejecting unknown `type` tags.
    pub fn parse(json: &str) -> Result<Self, LinkError> {
        let value: Value = serde_json::from_str(json)?;
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| LinkError::MessageParse("command has no type tag".to_string()))?;

        if !KNOWN_COMMANDS.contains(&tag) {
            tracing::warn!("Rejecting unknown command type {:?}", tag);
            return Err(LinkError::UnknownCommand(tag.to_string()));
        }

        Ok(serde_json::from_value(value)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DroneCommand::Takeoff => "takeoff",
            DroneCommand::Land => "land",
            DroneCommand::Move(_) => "move",
            DroneCommand::SetMode { .. } => "set_mode",
            DroneCommand::StartRecording => "start_recording",
            DroneCommand::StopRecording => "stop_recording",
            DroneCommand::GetInfo => "get_info",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingAction {
    Start,
    Stop,
}

/// Command as the backend expects it: `{"command": ..., "params": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "params", rename_all = "snake_case")]
pub enum BackendCommand {
    Takeoff {},
    Land {},
    Move {
        left_right: f64,
        forward_backward: f64,
        up_down: f64,
        yaw: f64,
    },
    SetMode { mode: FlightMode },
    Recording { action: RecordingAction },
    GetInfo {},
}

impl From<&DroneCommand> for BackendCommand {
    fn from(command: &DroneCommand) -> Self {
        match command {
            DroneCommand::Takeoff => BackendCommand::Takeoff {},
            DroneCommand::Land => BackendCommand::Land {},
            DroneCommand::Move(m) => BackendCommand::Move {
                left_right: m.left_right,
                forward_backward: m.forward_backward,
                up_down: m.up_down,
                yaw: m.yaw,
            },
            DroneCommand::SetMode { mode } => BackendCommand::SetMode { mode: mode.clone() },
            DroneCommand::StartRecording => BackendCommand::Recording {
                action: RecordingAction::Start,
            },
            DroneCommand::StopRecording => BackendCommand::Recording {
                action: RecordingAction::Stop,
            },
            DroneCommand::GetInfo => BackendCommand::GetInfo {},
        }
    }
}

/// Session control messages, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionMessage {
    Connect {
        #[serde(rename = "useTello")]
        use_tello: bool,
    },
    Disconnect,
}

/// Anything the console writes to the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Session(SessionMessage),
    Command(BackendCommand),
}

impl OutboundMessage {
    pub fn to_json(&self) -> Result<String, LinkError> {
        serde_json::to_string(self).map_err(|e| LinkError::SendFailed(e.to_string()))
    }
}

impl From<SessionMessage> for OutboundMessage {
    fn from(message: SessionMessage) -> Self {
        OutboundMessage::Session(message)
    }
}

impl From<&DroneCommand> for OutboundMessage {
    fn from(command: &DroneCommand) -> Self {
        OutboundMessage::Command(BackendCommand::from(command))
    }
}
