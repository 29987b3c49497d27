//! Chip reset.
//!
//! The device build never returns from [`RestartPort::restart`].  The
//! simulation counts requests so tests can assert on them.

use log::warn;

use crate::app::ports::RestartPort;

#[derive(Debug, Default)]
pub struct SystemRestart {
    #[cfg(not(target_os = "espidf"))]
    requests: u32,
}

impl SystemRestart {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn requests(&self) -> u32 {
        self.requests
    }
}

impl RestartPort for SystemRestart {
    #[cfg(target_os = "espidf")]
    fn restart(&mut self) {
        warn!("System: restarting");
        // SAFETY: esp_restart has no preconditions and does not return.
        unsafe { esp_idf_svc::sys::esp_restart() };
    }

    #[cfg(not(target_os = "espidf"))]
    fn restart(&mut self) {
        warn!("System(sim): restart requested");
        self.requests += 1;
    }
}
