//! Capacitive soil-moisture probe on ADC1 CH6.
//!
//! The probe is powered from a GPIO only while sampling, which slows
//! electrode corrosion.  Raw counts fall as the soil gets wetter:
//! 2800 reads as 0 % and 1200 as 100 %, linear in between, clamped.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: switches `SOIL_POWER_GPIO` and reads the oneshot ADC.
//! On host/test: returns the value injected with [`sim_set_soil_raw`].

use core::sync::atomic::{AtomicI32, Ordering};

use embedded_hal::delay::DelayNs;

use crate::drivers::hw_init;
use crate::error::SensorError;
use crate::pins;

/// Negative values simulate an ADC failure with that return code.
static SIM_SOIL_RAW: AtomicI32 = AtomicI32::new(2000);

#[cfg(not(target_os = "espidf"))]
pub fn sim_set_soil_raw(raw: i32) {
    SIM_SOIL_RAW.store(raw, Ordering::Relaxed);
}

/// Linear map from raw counts to percent, clamped to 0..=100.
pub fn raw_to_percent(raw: i32) -> i32 {
    let span = pins::SOIL_DRY_RAW - pins::SOIL_WET_RAW;
    let pct = (pins::SOIL_DRY_RAW - raw) * 100 / span;
    pct.clamp(0, 100)
}

#[derive(Debug, Default)]
pub struct SoilSensor {
    last_raw: Option<u16>,
}

impl SoilSensor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<D: DelayNs>(&mut self, delay: &mut D) -> Result<i32, SensorError> {
        hw_init::gpio_write(pins::SOIL_POWER_GPIO, true);
        delay.delay_ms(pins::SOIL_POWER_UP_DELAY_MS);
        let raw = self.read_adc();
        hw_init::gpio_write(pins::SOIL_POWER_GPIO, false);

        let raw = raw.map_err(SensorError::AdcReadFailed)?;
        self.last_raw = Some(raw);
        Ok(raw_to_percent(i32::from(raw)))
    }

    /// Last successful raw conversion, for diagnostics.
    pub fn last_raw(&self) -> Option<u16> {
        self.last_raw
    }

    #[cfg(target_os = "espidf")]
    fn read_adc(&self) -> Result<u16, i32> {
        hw_init::adc1_read(pins::SOIL_ADC_CHANNEL)
    }

    #[cfg(not(target_os = "espidf"))]
    fn read_adc(&self) -> Result<u16, i32> {
        let raw = SIM_SOIL_RAW.load(Ordering::Relaxed);
        if raw < 0 { Err(raw) } else { Ok(raw.min(4095) as u16) }
    }
}
