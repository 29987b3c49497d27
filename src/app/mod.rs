//! Application core: domain logic behind port traits.
//!
//! Measurement cycle, threshold evaluation, inbound command parsing and
//! settings persistence.  All interaction with hardware and the network
//! happens through the traits in [`ports`], so this layer runs unchanged in
//! host tests.

pub mod commands;
pub mod ports;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod thresholds;
