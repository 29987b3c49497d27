//! Smart Garden controller firmware library.
//!
//! Exposes every module for integration testing.  ESP-IDF-specific code
//! is guarded by `#[cfg(target_os = "espidf")]` inside each module, with
//! simulation stand-ins on the host.

#![deny(unused_must_use)]

pub mod adapters;
pub mod alerts;
pub mod app;
pub mod channels;
pub mod commissioning;
pub mod config;
pub mod connectivity;
pub mod drivers;
pub mod error;
pub mod pins;
pub mod restart;
pub mod sensors;
pub mod tasks;
pub mod watering;
