//! Utilization collection from the container runtime
//!
//! This module turns raw runtime stats into per-instance utilization
//! samples and assembles them into a fleet snapshot for one tick.

mod derive;
mod fleet;


pub use derive::derive;
pub use fleet::FleetInspector;
