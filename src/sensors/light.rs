//! VEML7700 ambient light sensor on I2C (address 0x10).
//!
//! Configured once at boot for gain x2 and 100 ms integration, which
//! gives 0.0288 lux per count and saturates around 1887 lux.  The device
//! free-runs, so a read is a single register fetch.

use embedded_hal::i2c::I2c;
use log::info;

use crate::error::SensorError;

pub const ADDRESS: u8 = 0x10;

const REG_ALS_CONF: u8 = 0x00;
const REG_ALS: u8 = 0x04;

/// ALS_GAIN = x2 (bits 12:11 = 01), ALS_IT = 100 ms, power on.
const CONF_GAIN2_IT100: u16 = 0x0800;

pub const LUX_PER_COUNT: f32 = 0.0288;

pub fn counts_to_lux(raw: u16) -> f32 {
    f32::from(raw) * LUX_PER_COUNT
}

pub struct Veml7700 {
    address: u8,
}

impl Veml7700 {
    /// Write the configuration; a NACK means the sensor is absent.
    pub fn probe<I: I2c>(i2c: &mut I) -> Result<Self, SensorError> {
        let [lo, hi] = CONF_GAIN2_IT100.to_le_bytes();
        i2c.write(ADDRESS, &[REG_ALS_CONF, lo, hi])
            .map_err(|_| SensorError::NotPresent)?;
        info!("VEML7700: configured (gain x2, 100 ms)");
        Ok(Self { address: ADDRESS })
    }

    pub fn read_lux<I: I2c>(&self, i2c: &mut I) -> Result<f32, SensorError> {
        let mut buf = [0u8; 2];
        i2c.write_read(self.address, &[REG_ALS], &mut buf)
            .map_err(|_| SensorError::BusError)?;
        Ok(counts_to_lux(u16::from_le_bytes(buf)))
    }
}
