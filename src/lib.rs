//! Beacon: a terminal uptime monitor for HTTP endpoints.
//!
//! Targets from a YAML file are expanded into one stream per region, probed on
//! their own interval, folded into streaming statistics and shown in an
//! adaptive terminal UI.

pub mod config;
pub mod display;
pub mod events;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod store;
