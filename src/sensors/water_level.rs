//! Water tank float switch.
//!
//! The switch shorts the input to ground when the tank runs low.  The
//! internal pull-up is only enabled for the duration of a read, so the
//! contact carries no current between samples.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: reads the GPIO level via hw_init helpers.
//! On host/test: defaults to a full tank; see [`sim_set_water_low`].

use core::sync::atomic::{AtomicBool, Ordering};

#[cfg(target_os = "espidf")]
use crate::drivers::hw_init;
#[cfg(target_os = "espidf")]
use crate::pins;

static SIM_WATER_LOW: AtomicBool = AtomicBool::new(false);

#[cfg(not(target_os = "espidf"))]
pub fn sim_set_water_low(low: bool) {
    SIM_WATER_LOW.store(low, Ordering::Relaxed);
}

#[derive(Debug, Default)]
pub struct WaterLevelSensor {
    last_low: bool,
}

impl WaterLevelSensor {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when the tank needs a refill.
    pub fn is_low(&mut self) -> bool {
        self.last_low = self.read_gpio_low();
        self.last_low
    }

    pub fn last_reading(&self) -> bool {
        self.last_low
    }

    #[cfg(target_os = "espidf")]
    fn read_gpio_low(&self) -> bool {
        hw_init::gpio_set_pullup(pins::WATER_LEVEL_GPIO, true);
        // Let the pull-up charge the line before sampling.
        esp_idf_svc::hal::delay::Ets::delay_us(100);
        let high = hw_init::gpio_read(pins::WATER_LEVEL_GPIO);
        hw_init::gpio_set_pullup(pins::WATER_LEVEL_GPIO, false);
        !high
    }

    #[cfg(not(target_os = "espidf"))]
    fn read_gpio_low(&self) -> bool {
        SIM_WATER_LOW.load(Ordering::Relaxed)
    }
}
