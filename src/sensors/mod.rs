//! Sensor subsystem: individual drivers and the aggregating [`SensorHub`].
//!
//! ```text
//!   ADC1 CH6 ──▶ soil        ┐
//!   GPIO18   ──▶ water_level ├──▶ SensorHub ──▶ SensorSample
//!   I2C 0x76 ──▶ climate     │
//!   I2C 0x10 ──▶ light       ┘
//! ```
//!
//! The I2C devices are probed once at boot.  A device that does not answer
//! stays absent for the whole run and its metrics report `NotPresent`.

pub mod climate;
pub mod light;
pub mod soil;
pub mod water_level;

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::warn;

use crate::app::telemetry::{FieldMask, Metric, SensorSample};
use crate::error::SensorError;
use climate::Bme280;
use light::Veml7700;
use soil::SoilSensor;
use water_level::WaterLevelSensor;

/// Owns the shared I2C bus, the delay source and every sensor driver.
pub struct SensorHub<I, D> {
    i2c: I,
    delay: D,
    soil: SoilSensor,
    water_level: WaterLevelSensor,
    climate: Option<Bme280>,
    light: Option<Veml7700>,
}

impl<I: I2c, D: DelayNs> SensorHub<I, D> {
    /// Probe the I2C devices.  Absent devices are logged, never fatal.
    pub fn new(mut i2c: I, delay: D) -> Self {
        let climate = Bme280::probe(&mut i2c)
            .inspect_err(|e| warn!("Sensors: BME280 unavailable ({})", e))
            .ok();
        let light = Veml7700::probe(&mut i2c)
            .inspect_err(|e| warn!("Sensors: VEML7700 unavailable ({})", e))
            .ok();
        Self {
            i2c,
            delay,
            soil: SoilSensor::new(),
            water_level: WaterLevelSensor::new(),
            climate,
            light,
        }
    }

    /// Read every sensor once.
    pub fn read_all(&mut self) -> SensorSample {
        let soil_pct = self.soil.read(&mut self.delay);
        let climate = match &self.climate {
            Some(bme) => bme.measure(&mut self.i2c, &mut self.delay),
            None => Err(SensorError::NotPresent),
        };
        let light_lux = match &self.light {
            Some(veml) => veml.read_lux(&mut self.i2c),
            None => Err(SensorError::NotPresent),
        };
        SensorSample {
            soil_pct,
            climate,
            light_lux,
            water_low: self.water_level.is_low(),
        }
    }

    pub fn water_low(&mut self) -> bool {
        self.water_level.is_low()
    }

    /// Soil and the float switch are always wired; I2C devices only if
    /// they answered at boot.
    pub fn available_fields(&self) -> FieldMask {
        let mut mask = FieldMask::NONE.with(Metric::SoilMoisture).with(Metric::WaterTank);
        if self.climate.is_some() {
            mask = mask
                .with(Metric::AirTemperature)
                .with(Metric::AirHumidity)
                .with(Metric::Pressure);
        }
        if self.light.is_some() {
            mask = mask.with(Metric::Light);
        }
        mask
    }

    pub fn soil(&self) -> &SoilSensor {
        &self.soil
    }
}
