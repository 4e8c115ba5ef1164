//! Backend reachability checks.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;

use crate::config::LinkConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Success(String),
    Timeout,
    Error(String),
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success(_))
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Success(detail) => write!(f, "ok ({})", detail),
            ProbeOutcome::Timeout => write!(f, "timeout"),
            ProbeOutcome::Error(cause) => write!(f, "error ({})", cause),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub ws_url: String,
    pub http_url: String,
    pub starts_in_fallback: bool,
    pub http: ProbeOutcome,
    pub websocket: ProbeOutcome,
}

/// Probe the backend over plain HTTP and WebSocket, each bounded by `limit`.
pub async fn run_diagnostics(config: &LinkConfig, limit: Duration) -> DiagnosticReport {
    let http_url = config.http_url();
    let ws_url = config.ws_url();

    let http = probe_http(&http_url, limit).await;
    let websocket = probe_websocket(&ws_url, limit).await;

    DiagnosticReport {
        ws_url,
        http_url,
        starts_in_fallback: config.starts_in_fallback(),
        http,
        websocket,
    }
}

/// Any HTTP response, whatever its status, means the host is reachable.
pub async fn probe_http(url: &str, limit: Duration) -> ProbeOutcome {
    let client = match reqwest::Client::builder().timeout(limit).build() {
        Ok(client) => client,
        Err(e) => return ProbeOutcome::Error(e.to_string()),
    };

    match client.get(url).send().await {
        Ok(response) => ProbeOutcome::Success(format!("HTTP {}", response.status())),
        Err(e) if e.is_timeout() => ProbeOutcome::Timeout,
        Err(e) => ProbeOutcome::Error(e.to_string()),
    }
}

/// Complete a WebSocket handshake, then close it again.
pub async fn probe_websocket(url: &str, limit: Duration) -> ProbeOutcome {
    match timeout(limit, connect_async(url)).await {
        Ok(Ok((mut socket, _))) => {
            if let Err(e) = socket.close(None).await {
                tracing::debug!("Error closing diagnostic socket: {}", e);
            }
            ProbeOutcome::Success("handshake completed".to_string())
        }
        Ok(Err(e)) => ProbeOutcome::Error(e.to_string()),
        Err(_) => ProbeOutcome::Timeout,
    }
}
