//! Pilot CLI - terminal front-end for the drone link.
//!
//! This crate provides the `pilot-console` binary:
//! - run: interactive console over the live link or the simulator
//! - diagnose: backend reachability report
//! - simulate: headless fallback simulation

pub mod input;
pub mod render;

pub use input::{parse_line, OperatorInput};
pub use render::telemetry_line;
