//! Link configuration from environment.

use std::env;
use std::time::Duration;

use pilot_core::MAX_TICK_GAP;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_TICK_INTERVAL_MS: u64 = 50;

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub backend_host: String,
    pub backend_port: u16,
    pub backend_path: String,
    /// Use `wss://` instead of `ws://`
    pub secure: bool,
    /// Ask the backend to drive a real Tello instead of its own simulator
    pub use_tello: bool,
    pub connect_timeout: Duration,
    pub tick_interval: Duration,
    /// Host the console is being served from, if any
    pub deployment_host: Option<String>,
    pub force_fallback: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            backend_host: DEFAULT_HOST.to_string(),
            backend_port: DEFAULT_PORT,
            backend_path: String::new(),
            secure: false,
            use_tello: false,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            deployment_host: None,
            force_fallback: false,
        }
    }
}

impl LinkConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup. Unset or empty keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let backend_port = match get("PILOT_BACKEND_PORT") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!("Invalid PILOT_BACKEND_PORT {:?}, using {}", raw, DEFAULT_PORT);
                DEFAULT_PORT
            }),
            None => DEFAULT_PORT,
        };

        Self {
            backend_host: get("PILOT_BACKEND_HOST").unwrap_or(defaults.backend_host),
            backend_port,
            backend_path: get("PILOT_BACKEND_WS_PATH").unwrap_or_default(),
            secure: get("PILOT_BACKEND_SECURE").map(|v| parse_flag(&v)).unwrap_or(false),
            use_tello: get("PILOT_USE_TELLO").map(|v| parse_flag(&v)).unwrap_or(false),
            connect_timeout: parse_millis(
                get("PILOT_CONNECT_TIMEOUT_MS"),
                "PILOT_CONNECT_TIMEOUT_MS",
                |ms| ms > 0,
                defaults.connect_timeout,
            ),
            tick_interval: parse_millis(
                get("PILOT_TICK_INTERVAL_MS"),
                "PILOT_TICK_INTERVAL_MS",
                |ms| ms > 0 && Duration::from_millis(ms) < MAX_TICK_GAP,
                defaults.tick_interval,
            ),
            deployment_host: get("PILOT_DEPLOYMENT_HOST"),
            force_fallback: get("PILOT_FORCE_FALLBACK").map(|v| parse_flag(&v)).unwrap_or(false),
        }
    }

    /// WebSocket URL of the backend.
    pub fn ws_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}{}", scheme, self.backend_host, self.backend_port, self.path())
    }

    /// Plain HTTP root of the backend, used for reachability probes.
    pub fn http_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}/", scheme, self.backend_host, self.backend_port)
    }

    fn path(&self) -> String {
        let path = self.backend_path.trim();
        if path.is_empty() || path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        }
    }

    /// Whether the console should come up in fallback mode. A console served
    /// from anywhere other than the local machine has no backend to reach.
    pub fn starts_in_fallback(&self) -> bool {
        self.force_fallback
            || self
                .deployment_host
                .as_deref()
                .is_some_and(|host| !is_local_host(host))
    }
}

/// True for loopback host names, with or without a port.
pub fn is_local_host(host: &str) -> bool {
    let host = host.trim().to_ascii_lowercase();
    host.contains("localhost") || host.contains("127.0.0.1")
}

/// Parse a millisecond duration, keeping `default` when the value is not a
/// number or fails `valid`.
fn parse_millis(raw: Option<String>, key: &str, valid: impl Fn(u64) -> bool, default: Duration) -> Duration {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(ms) if valid(ms) => Duration::from_millis(ms),
        _ => {
            tracing::warn!("Invalid {} {:?}, using {}ms", key, raw, default.as_millis());
            default
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> LinkConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LinkConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_point_at_local_backend() {
        let config = config_from(&[]);
        assert_eq!(config.ws_url(), "ws://localhost:8000");
        assert_eq!(config.http_url(), "http://localhost:8000/");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.tick_interval, Duration::from_millis(50));
        assert!(!config.starts_in_fallback());
    }

    #[test]
    fn overrides_build_url() {
        let config = config_from(&[
            ("PILOT_BACKEND_HOST", "10.0.0.5"),
            ("PILOT_BACKEND_PORT", "9001"),
            ("PILOT_BACKEND_WS_PATH", "ws"),
            ("PILOT_BACKEND_SECURE", "true"),
            ("PILOT_USE_TELLO", "1"),
        ]);
        assert_eq!(config.ws_url(), "wss://10.0.0.5:9001/ws");
        assert!(config.use_tello);
    }

    #[test]
    fn bad_port_falls_back_to_default() {
        let config = config_from(&[("PILOT_BACKEND_PORT", "eighty")]);
        assert_eq!(config.backend_port, 8000);
    }

    #[test]
    fn tick_interval_must_stay_below_gap_limit() {
        let config = config_from(&[("PILOT_TICK_INTERVAL_MS", "600")]);
        assert_eq!(config.tick_interval, Duration::from_millis(50));
        let config = config_from(&[("PILOT_TICK_INTERVAL_MS", "500")]);
        assert_eq!(config.tick_interval, Duration::from_millis(50));
        let config = config_from(&[("PILOT_TICK_INTERVAL_MS", "0")]);
        assert_eq!(config.tick_interval, Duration::from_millis(50));

        let config = config_from(&[("PILOT_TICK_INTERVAL_MS", "100")]);
        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert!(config.tick_interval < MAX_TICK_GAP);
    }

    #[test]
    fn configured_tick_interval_keeps_simulator_moving() {
        use crate::manager::{ChannelManager, LinkEvent};
        use pilot_core::DroneCommand;
        use std::time::Instant;

        let config = config_from(&[("PILOT_TICK_INTERVAL_MS", "600")]);
        let start = Instant::now();
        let mut manager = ChannelManager::new(false, start);
        manager.set_fallback_mode(true, start);
        manager.send_command(DroneCommand::Takeoff, start);

        let mut now = start;
        for _ in 0..100 {
            now += config.tick_interval;
            manager.handle(LinkEvent::Tick, now);
        }
        assert!(manager.drone().altitude > 0.5);
    }

    #[test]
    fn zero_connect_timeout_is_rejected() {
        let config = config_from(&[("PILOT_CONNECT_TIMEOUT_MS", "0")]);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        let config = config_from(&[("PILOT_CONNECT_TIMEOUT_MS", "soon")]);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        let config = config_from(&[("PILOT_CONNECT_TIMEOUT_MS", "1500")]);
        assert_eq!(config.connect_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn remote_deployment_forces_fallback() {
        assert!(config_from(&[("PILOT_DEPLOYMENT_HOST", "console.example.app")]).starts_in_fallback());
        assert!(!config_from(&[("PILOT_DEPLOYMENT_HOST", "localhost:3000")]).starts_in_fallback());
        assert!(!config_from(&[("PILOT_DEPLOYMENT_HOST", "127.0.0.1")]).starts_in_fallback());
        assert!(config_from(&[("PILOT_FORCE_FALLBACK", "yes")]).starts_in_fallback());
    }
}
