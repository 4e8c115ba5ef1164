//! One-line telemetry rendering.

use pilot_link::{LinkStatus, Snapshot};

pub fn link_label(snapshot: &Snapshot) -> &'static str {
    if snapshot.fallback {
        return "sim";
    }
    match snapshot.status {
        LinkStatus::Idle => "offline",
        LinkStatus::Connecting => "connecting",
        LinkStatus::Connected => "online",
    }
}

pub fn telemetry_line(snapshot: &Snapshot) -> String {
    let drone = &snapshot.drone;
    let mut flags = Vec::new();
    if drone.is_flying {
        flags.push("FLY");
    }
    if drone.is_recording {
        flags.push("REC");
    }

    format!(
        "[{}] alt {:.2}m bat {:.0}% temp {:.1}C pitch {:+.1} roll {:+.1} yaw {:.1} mode {}{}",
        link_label(snapshot),
        drone.altitude,
        drone.battery,
        drone.temperature,
        drone.attitude.pitch,
        drone.attitude.roll,
        drone.attitude.yaw,
        snapshot.mode,
        if flags.is_empty() {
            String::new()
        } else {
            format!(" {}", flags.join(" "))
        }
    )
}
