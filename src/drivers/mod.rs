//! Actuator drivers, hardware initialisation, and task spawning helpers.

pub mod button;
pub mod hw_init;
pub mod pump;
pub mod task_pin;
