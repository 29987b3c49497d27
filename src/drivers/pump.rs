//! Water pump driver (logic-level MOSFET on GPIO2, active HIGH).
//!
//! On/off only.  Run duration and tank checks belong to the watering
//! worker; this driver is a dumb actuator.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: drives the GPIO via hw_init helpers.
//! On host/test: hw_init records the level in memory.

use log::debug;

use crate::drivers::hw_init;
use crate::pins;

#[derive(Debug)]
pub struct PumpDriver {
    gpio: i32,
    running: bool,
}

impl PumpDriver {
    /// Takes the pin and forces the pump off.
    pub fn new() -> Self {
        let mut pump = Self {
            gpio: pins::PUMP_GPIO,
            running: false,
        };
        pump.write(false);
        pump
    }

    pub fn start(&mut self) {
        self.write(true);
    }

    pub fn stop(&mut self) {
        self.write(false);
    }

    fn write(&mut self, on: bool) {
        hw_init::gpio_write(self.gpio, on);
        if on != self.running {
            debug!("Pump: {}", if on { "on" } else { "off" });
        }
        self.running = on;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl Default for PumpDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PumpDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
