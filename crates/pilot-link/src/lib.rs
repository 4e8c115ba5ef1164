//! Pilot link - backend channel with local simulation fallback.
//!
//! Keeps one WebSocket to the drone backend and publishes a single reactive
//! [`Snapshot`] of the console state. When the backend is unreachable the
//! link degrades to a local simulator instead of failing.

pub mod config;
pub mod diagnostics;
pub mod manager;
pub mod runtime;

pub use config::LinkConfig;
pub use diagnostics::{run_diagnostics, DiagnosticReport, ProbeOutcome};
pub use manager::{ChannelManager, Effect, LinkEvent, LinkStatus, Snapshot};
pub use runtime::{spawn, LinkHandle, Request};
