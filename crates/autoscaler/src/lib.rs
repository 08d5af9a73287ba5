//! Replica autoscaler daemon
//!
//! Wires configuration, the Docker runtime and the control loop together and
//! serves health, metrics and status over HTTP.

pub mod api;
pub mod config;
