//! Channel manager state machine.
//!
//! Owns connection status, the drone state store and the fallback simulator.
//! It performs no I/O: every entry point returns the [`Effect`]s the runtime
//! must carry out (open the socket, arm the liveness timer, start the tick
//! loop...). The runtime feeds what happens on the wire back in as
//! [`LinkEvent`]s through [`ChannelManager::handle`].

use std::time::Instant;

use chrono::{DateTime, Utc};
use pilot_core::{
    AiStatus, DroneCommand, DroneState, FlightMode, InboundMessage, LinkError, OutboundMessage,
    SessionMessage, SimulationTarget, Simulator, NORMAL_CLOSURE,
};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
}

/// Something that happened on the channel or its timers.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Opened,
    Closed { code: u16, reason: String },
    Errored { cause: String },
    MessageReceived { payload: String },
    TimeoutFired,
    SendFailed { cause: String },
    Tick,
}

/// I/O the runtime must perform on behalf of the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Open,
    ArmTimeout,
    CancelTimeout,
    Transmit(OutboundMessage),
    /// Close the socket, or abandon the pending open
    Close { code: u16, reason: String },
    StartTicker,
    StopTicker,
}

/// Everything a front-end needs to render the console.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub status: LinkStatus,
    pub fallback: bool,
    pub last_error: Option<String>,
    pub drone: DroneState,
    pub mode: FlightMode,
    /// Latest base64 video frame
    #[serde(skip_serializing)]
    pub frame: Option<String>,
    pub ai: Option<AiStatus>,
    pub last_result: Option<Value>,
    pub updated_at: DateTime<Utc>,
}

impl Snapshot {
    /// Commands will be accepted: either a live backend or the simulator.
    pub fn is_operational(&self) -> bool {
        self.fallback || self.status == LinkStatus::Connected
    }
}

pub struct ChannelManager {
    status: LinkStatus,
    fallback: bool,
    ticker_running: bool,
    timeout_armed: bool,
    use_tello: bool,
    last_error: Option<LinkError>,
    drone: DroneState,
    mode: FlightMode,
    frame: Option<String>,
    ai: Option<AiStatus>,
    last_result: Option<Value>,
    simulator: Simulator,
}

impl ChannelManager {
    pub fn new(use_tello: bool, now: Instant) -> Self {
        Self {
            status: LinkStatus::Idle,
            fallback: false,
            ticker_running: false,
            timeout_armed: false,
            use_tello,
            last_error: None,
            drone: DroneState::default(),
            mode: FlightMode::default(),
            frame: None,
            ai: None,
            last_result: None,
            simulator: Simulator::new(now),
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn ticker_running(&self) -> bool {
        self.ticker_running
    }

    pub fn drone(&self) -> &DroneState {
        &self.drone
    }

    pub fn mode(&self) -> &FlightMode {
        &self.mode
    }

    pub fn last_error(&self) -> Option<&LinkError> {
        self.last_error.as_ref()
    }

    pub fn target(&self) -> &SimulationTarget {
        self.simulator.target()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.status,
            fallback: self.fallback,
            last_error: self.last_error.as_ref().map(ToString::to_string),
            drone: self.drone.clone(),
            mode: self.mode.clone(),
            frame: self.frame.clone(),
            ai: self.ai.clone(),
            last_result: self.last_result.clone(),
            updated_at: Utc::now(),
        }
    }

    /// Start connecting to the backend. No-op while already connecting or
    /// connected. Leaves fallback mode first so the simulator and the
    /// backend never write the state together.
    pub fn connect(&mut self) -> Vec<Effect> {
        if self.status != LinkStatus::Idle {
            tracing::debug!("connect ignored, link is {:?}", self.status);
            return Vec::new();
        }

        let mut effects = Vec::new();
        if self.fallback {
            tracing::info!("Leaving fallback mode to connect to backend");
            self.fallback = false;
            effects.extend(self.stop_ticker());
        }

        tracing::info!("Connecting to backend");
        self.status = LinkStatus::Connecting;
        self.last_error = None;
        self.timeout_armed = true;
        effects.push(Effect::Open);
        effects.push(Effect::ArmTimeout);
        effects
    }

    /// Drop the connection. Never triggers fallback.
    pub fn disconnect(&mut self) -> Vec<Effect> {
        let mut effects = self.cancel_timeout();
        match self.status {
            LinkStatus::Connected => {
                effects.push(Effect::Transmit(SessionMessage::Disconnect.into()));
                effects.push(close_effect("User initiated disconnect"));
            }
            LinkStatus::Connecting => {
                effects.push(close_effect("User initiated disconnect"));
            }
            LinkStatus::Idle => {}
        }
        if self.status != LinkStatus::Idle {
            tracing::info!("Disconnected from backend");
        }
        self.status = LinkStatus::Idle;
        effects
    }

    /// Route a command to the backend, or to the simulator in fallback mode.
    pub fn send_command(&mut self, command: DroneCommand, now: Instant) -> Vec<Effect> {
        self.dispatch(command, now, true)
    }

    fn dispatch(&mut self, command: DroneCommand, now: Instant, may_retry: bool) -> Vec<Effect> {
        if self.fallback {
            tracing::debug!("Fallback mode: simulating {}", command.kind());
            self.simulator.apply(&command, &mut self.drone, &mut self.mode);
            return self.start_ticker().into_iter().collect();
        }

        if self.status == LinkStatus::Connected {
            tracing::debug!("Sending {} to backend", command.kind());
            return vec![Effect::Transmit(OutboundMessage::from(&command))];
        }

        tracing::error!("Cannot send {}: not connected", command.kind());
        self.last_error = Some(LinkError::SendFailed("not connected".to_string()));
        if !may_retry {
            return Vec::new();
        }

        tracing::warn!("Enabling fallback mode after send failure");
        let mut effects = self.teardown_channel("Switching to fallback mode");
        effects.extend(self.enter_fallback(now));
        effects.extend(self.dispatch(command, now, false));
        effects
    }

    /// Switch the simulator on or off. Switching on tears down any socket;
    /// repeated calls never start a second tick loop.
    pub fn set_fallback_mode(&mut self, enabled: bool, now: Instant) -> Vec<Effect> {
        let effects = if enabled {
            let mut effects = self.teardown_channel("Switching to fallback mode");
            effects.extend(self.enter_fallback(now));
            effects
        } else {
            self.fallback = false;
            self.stop_ticker().into_iter().collect()
        };

        self.last_error = None;
        tracing::info!("Fallback mode {}", if enabled { "enabled" } else { "disabled" });
        effects
    }

    /// Transition function for channel and timer events.
    pub fn handle(&mut self, event: LinkEvent, now: Instant) -> Vec<Effect> {
        match event {
            LinkEvent::Opened => {
                if self.status != LinkStatus::Connecting {
                    tracing::debug!("Ignoring late open while {:?}", self.status);
                    return vec![close_effect("Connection no longer wanted")];
                }
                tracing::info!("Connected to backend");
                let mut effects = self.cancel_timeout();
                self.status = LinkStatus::Connected;
                self.last_error = None;
                effects.push(Effect::Transmit(
                    SessionMessage::Connect {
                        use_tello: self.use_tello,
                    }
                    .into(),
                ));
                effects
            }
            LinkEvent::Closed { code, reason } => {
                tracing::info!("Backend connection closed: {} {}", code, reason);
                self.fail(LinkError::closed(code, reason), now)
            }
            LinkEvent::Errored { cause } => {
                tracing::error!("Backend connection error: {}", cause);
                self.fail(LinkError::ConnectionError(cause), now)
            }
            LinkEvent::SendFailed { cause } => {
                tracing::error!("Failed to write to backend: {}", cause);
                let mut effects = Vec::new();
                if self.status != LinkStatus::Idle {
                    effects.push(Effect::Close {
                        code: 1011,
                        reason: "Send failed".to_string(),
                    });
                }
                effects.extend(self.fail(LinkError::SendFailed(cause), now));
                effects
            }
            LinkEvent::TimeoutFired => {
                if !self.timeout_armed || self.status != LinkStatus::Connecting {
                    tracing::debug!("Ignoring stale connection timeout");
                    return Vec::new();
                }
                tracing::error!("Backend connection timeout");
                let mut effects = vec![close_effect("Connection timeout")];
                effects.extend(self.fail(LinkError::ConnectionTimeout, now));
                effects
            }
            LinkEvent::MessageReceived { payload } => {
                if self.status != LinkStatus::Connected {
                    tracing::debug!("Dropping message received while {:?}", self.status);
                    return Vec::new();
                }
                self.on_message(&payload);
                Vec::new()
            }
            LinkEvent::Tick => {
                if self.fallback {
                    self.simulator.tick(&mut self.drone, now);
                }
                Vec::new()
            }
        }
    }

    fn on_message(&mut self, payload: &str) {
        let message = match InboundMessage::parse(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping malformed backend message: {}", e);
                return;
            }
        };

        match message {
            InboundMessage::Frame(frame) => {
                frame.state.apply_to(&mut self.drone);
                self.frame = Some(frame.frame);
                if let Some(mode) = frame.mode {
                    self.mode = mode;
                }
                if frame.ai.is_some() {
                    self.ai = frame.ai;
                }
            }
            InboundMessage::CommandResult { command, result } => {
                tracing::info!("Command result for {}: {}", command, result);
                self.last_result = Some(result);
            }
            InboundMessage::Connected { message } => {
                tracing::info!(
                    "Connection confirmed by server: {}",
                    message.as_deref().unwrap_or("-")
                );
            }
            InboundMessage::State {} => {
                tracing::debug!("Received state update from server");
            }
            InboundMessage::Error { error, command } => {
                tracing::warn!("Backend reported error for {:?}: {}", command, error);
                self.last_error = Some(LinkError::Backend(error));
            }
            InboundMessage::Unknown => {
                tracing::debug!("Ignoring backend message of unknown type");
            }
        }
    }

    /// Record a connection-level failure and degrade to the simulator.
    fn fail(&mut self, error: LinkError, now: Instant) -> Vec<Effect> {
        if self.status == LinkStatus::Idle {
            tracing::debug!("Ignoring failure on idle link: {}", error);
            return Vec::new();
        }

        let mut effects = self.cancel_timeout();
        self.status = LinkStatus::Idle;
        let enable_fallback = error.triggers_fallback() && !self.fallback;
        self.last_error = Some(error);

        if enable_fallback {
            tracing::warn!("Automatically enabling fallback mode");
            effects.extend(self.enter_fallback(now));
        }
        effects
    }

    /// Close whatever channel exists, open or pending, without recording an error.
    fn teardown_channel(&mut self, reason: &str) -> Vec<Effect> {
        if self.status == LinkStatus::Idle {
            return Vec::new();
        }
        let mut effects = self.cancel_timeout();
        effects.push(close_effect(reason));
        self.status = LinkStatus::Idle;
        effects
    }

    fn enter_fallback(&mut self, now: Instant) -> Vec<Effect> {
        if !self.fallback {
            self.simulator.reset_clock(now);
        }
        self.fallback = true;
        self.start_ticker().into_iter().collect()
    }

    fn start_ticker(&mut self) -> Option<Effect> {
        if self.ticker_running {
            return None;
        }
        self.ticker_running = true;
        Some(Effect::StartTicker)
    }

    fn stop_ticker(&mut self) -> Option<Effect> {
        if !self.ticker_running {
            return None;
        }
        self.ticker_running = false;
        Some(Effect::StopTicker)
    }

    fn cancel_timeout(&mut self) -> Vec<Effect> {
        if !self.timeout_armed {
            return Vec::new();
        }
        self.timeout_armed = false;
        vec![Effect::CancelTimeout]
    }
}

fn close_effect(reason: &str) -> Effect {
    Effect::Close {
        code: NORMAL_CLOSURE,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilot_core::{MoveCommand, SessionMessage};
    use serde_json::json;
    use std::time::Duration;

    fn manager() -> (ChannelManager, Instant) {
        let now = Instant::now();
        (ChannelManager::new(false, now), now)
    }

    fn connected() -> (ChannelManager, Instant) {
        let (mut m, now) = manager();
        m.connect();
        m.handle(LinkEvent::Opened, now);
        (m, now)
    }

    fn count(effects: &[Effect], wanted: &Effect) -> usize {
        effects.iter().filter(|e| *e == wanted).count()
    }

    fn frame(altitude: f64) -> LinkEvent {
        LinkEvent::MessageReceived {
            payload: json!({
                "type": "frame",
                "frame": "Zm9v",
                "state": {
                    "bateria": 64,
                    "altura": altitude,
                    "temperatura": 40,
                    "atitude": {"pitch": 3, "roll": 4, "yaw": 725}
                },
                "mode": "path_planning"
            })
            .to_string(),
        }
    }

    #[test]
    fn connect_opens_and_arms_timeout() {
        let (mut m, _) = manager();
        assert_eq!(m.connect(), vec![Effect::Open, Effect::ArmTimeout]);
        assert_eq!(m.status(), LinkStatus::Connecting);
    }

    #[test]
    fn connect_is_noop_while_connecting_or_connected() {
        let (mut m, now) = manager();
        m.connect();
        assert!(m.connect().is_empty());
        m.handle(LinkEvent::Opened, now);
        assert!(m.connect().is_empty());
        assert_eq!(m.status(), LinkStatus::Connected);
    }

    #[test]
    fn open_sends_handshake_and_cancels_timeout() {
        let now = Instant::now();
        let mut m = ChannelManager::new(true, now);
        m.connect();
        let effects = m.handle(LinkEvent::Opened, now);
        assert_eq!(
            effects,
            vec![
                Effect::CancelTimeout,
                Effect::Transmit(SessionMessage::Connect { use_tello: true }.into()),
            ]
        );
        assert_eq!(m.status(), LinkStatus::Connected);
        assert!(m.last_error().is_none());
    }

    #[test]
    fn timeout_while_connecting_degrades_to_fallback() {
        let (mut m, now) = manager();
        m.connect();
        let effects = m.handle(LinkEvent::TimeoutFired, now);
        assert!(matches!(effects[0], Effect::Close { .. }));
        assert_eq!(count(&effects, &Effect::StartTicker), 1);
        assert_eq!(m.status(), LinkStatus::Idle);
        assert!(m.is_fallback());
        assert_eq!(m.last_error(), Some(&LinkError::ConnectionTimeout));
    }

    #[test]
    fn disconnect_while_connecting_cancels_timeout() {
        let (mut m, now) = manager();
        m.connect();
        let effects = m.disconnect();
        assert_eq!(count(&effects, &Effect::CancelTimeout), 1);
        assert_eq!(m.status(), LinkStatus::Idle);

        // a timer that raced the cancel must not fire fallback
        assert!(m.handle(LinkEvent::TimeoutFired, now).is_empty());
        assert!(!m.is_fallback());
        assert!(m.last_error().is_none());
    }

    #[test]
    fn disconnect_when_connected_says_goodbye() {
        let (mut m, _) = connected();
        let effects = m.disconnect();
        assert_eq!(
            effects,
            vec![
                Effect::Transmit(SessionMessage::Disconnect.into()),
                Effect::Close {
                    code: 1000,
                    reason: "User initiated disconnect".to_string()
                },
            ]
        );
        assert_eq!(m.status(), LinkStatus::Idle);
        assert!(!m.is_fallback());
    }

    #[test]
    fn close_after_connect_records_cause_and_falls_back() {
        let (mut m, now) = connected();
        let effects = m.handle(
            LinkEvent::Closed {
                code: 1006,
                reason: String::new(),
            },
            now,
        );
        assert_eq!(effects, vec![Effect::StartTicker]);
        assert!(m.is_fallback());
        assert_eq!(
            m.snapshot().last_error.as_deref(),
            Some("Connection closed: 1006 No reason provided")
        );
    }

    #[test]
    fn error_while_connecting_falls_back() {
        let (mut m, now) = manager();
        m.connect();
        let effects = m.handle(
            LinkEvent::Errored {
                cause: "connection refused".to_string(),
            },
            now,
        );
        assert_eq!(effects, vec![Effect::CancelTimeout, Effect::StartTicker]);
        assert!(m.is_fallback());
    }

    #[test]
    fn close_on_idle_link_is_ignored() {
        let (mut m, now) = manager();
        let effects = m.handle(
            LinkEvent::Closed {
                code: 1000,
                reason: "bye".into(),
            },
            now,
        );
        assert!(effects.is_empty());
        assert!(!m.is_fallback());
    }

    #[test]
    fn connected_commands_are_mapped_for_backend() {
        let (mut m, now) = connected();
        let effects = m.send_command(DroneCommand::StartRecording, now);
        assert_eq!(effects, vec![Effect::Transmit((&DroneCommand::StartRecording).into())]);
        // recording only changes locally in simulation
        assert!(!m.drone().is_recording);
    }

    #[test]
    fn send_without_connection_falls_back_and_retries_once() {
        let (mut m, now) = manager();
        let effects = m.send_command(DroneCommand::Takeoff, now);
        assert_eq!(effects, vec![Effect::StartTicker]);
        assert!(m.is_fallback());
        assert!(m.drone().is_flying);
        assert_eq!(m.target().target_altitude, 1.0);
        assert!(matches!(m.last_error(), Some(LinkError::SendFailed(_))));
    }

    #[test]
    fn send_while_connecting_abandons_the_attempt() {
        let (mut m, now) = manager();
        m.connect();
        let effects = m.send_command(DroneCommand::Land, now);
        assert_eq!(
            effects,
            vec![
                Effect::CancelTimeout,
                Effect::Close {
                    code: 1000,
                    reason: "Switching to fallback mode".to_string()
                },
                Effect::StartTicker,
            ]
        );
        assert!(m.is_fallback());
        assert_eq!(m.status(), LinkStatus::Idle);
        assert!(m.handle(LinkEvent::TimeoutFired, now).is_empty());
    }

    #[test]
    fn repeated_fallback_requests_start_one_ticker() {
        let (mut m, now) = manager();
        let mut effects = Vec::new();
        for _ in 0..5 {
            effects.extend(m.set_fallback_mode(true, now));
        }
        effects.extend(m.send_command(DroneCommand::Takeoff, now));
        assert_eq!(count(&effects, &Effect::StartTicker), 1);
        assert!(m.ticker_running());

        let effects = m.set_fallback_mode(false, now);
        assert_eq!(effects, vec![Effect::StopTicker]);
        assert!(m.set_fallback_mode(false, now).is_empty());
    }

    #[test]
    fn fallback_switch_closes_live_socket() {
        let (mut m, now) = connected();
        let effects = m.set_fallback_mode(true, now);
        assert_eq!(
            effects,
            vec![
                Effect::Close {
                    code: 1000,
                    reason: "Switching to fallback mode".to_string()
                },
                Effect::StartTicker,
            ]
        );
        assert_eq!(m.status(), LinkStatus::Idle);
        // the socket is gone, later traffic from it is ignored
        m.handle(frame(5.0), now);
        assert_eq!(m.drone().altitude, 0.0);
    }

    #[test]
    fn connect_from_fallback_stops_ticker_first() {
        let (mut m, now) = manager();
        m.set_fallback_mode(true, now);
        let effects = m.connect();
        assert_eq!(effects, vec![Effect::StopTicker, Effect::Open, Effect::ArmTimeout]);
        assert!(!m.is_fallback());
    }

    #[test]
    fn frame_replaces_telemetry() {
        let (mut m, now) = connected();
        m.handle(frame(2.0), now);
        let snap = m.snapshot();
        assert_eq!(snap.drone.battery, 64.0);
        assert_eq!(snap.drone.altitude, 2.0);
        assert_eq!(snap.drone.attitude.yaw, 5.0);
        assert!(snap.drone.is_flying);
        assert_eq!(snap.mode, FlightMode::PathPlanning);
        assert_eq!(snap.frame.as_deref(), Some("Zm9v"));
    }

    #[test]
    fn malformed_messages_leave_state_untouched() {
        let (mut m, now) = connected();
        m.handle(frame(2.0), now);
        let before = m.drone().clone();

        for payload in ["{not json", r#"{"type":"frame","frame":"x"}"#, "[]"] {
            let effects = m.handle(
                LinkEvent::MessageReceived {
                    payload: payload.to_string(),
                },
                now,
            );
            assert!(effects.is_empty());
        }
        assert_eq!(m.drone(), &before);
        assert_eq!(m.status(), LinkStatus::Connected);
    }

    #[test]
    fn backend_errors_and_results_are_recorded() {
        let (mut m, now) = connected();
        m.handle(
            LinkEvent::MessageReceived {
                payload: r#"{"type":"command_result","command":"get_info","result":{"battery":90}}"#
                    .to_string(),
            },
            now,
        );
        assert_eq!(m.snapshot().last_result, Some(json!({"battery": 90})));

        m.handle(
            LinkEvent::MessageReceived {
                payload: r#"{"type":"error","error":"Formato de mensagem inválido"}"#.to_string(),
            },
            now,
        );
        assert!(matches!(m.last_error(), Some(LinkError::Backend(_))));
        assert_eq!(m.status(), LinkStatus::Connected);
    }

    #[test]
    fn send_failure_closes_and_falls_back() {
        let (mut m, now) = connected();
        let effects = m.handle(
            LinkEvent::SendFailed {
                cause: "broken pipe".to_string(),
            },
            now,
        );
        assert!(matches!(effects[0], Effect::Close { code: 1011, .. }));
        assert!(effects.contains(&Effect::StartTicker));
        assert!(m.is_fallback());
    }

    #[test]
    fn ticks_only_move_state_in_fallback() {
        let (mut m, start) = manager();
        m.set_fallback_mode(true, start);
        m.send_command(DroneCommand::Takeoff, start);
        m.send_command(
            DroneCommand::Move(MoveCommand {
                up_down: 50.0,
                ..MoveCommand::default()
            }),
            start,
        );

        let mut now = start;
        for _ in 0..100 {
            now += Duration::from_millis(50);
            m.handle(LinkEvent::Tick, now);
        }
        assert!((m.drone().altitude - 1.5).abs() < 1e-3);

        m.set_fallback_mode(false, now);
        let altitude = m.drone().altitude;
        m.handle(LinkEvent::Tick, now + Duration::from_millis(50));
        assert_eq!(m.drone().altitude, altitude);
    }
}
