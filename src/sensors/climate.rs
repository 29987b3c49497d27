//! BME280 temperature / humidity / pressure sensor on I2C.
//!
//! Runs in forced mode with 1x oversampling on every channel: each
//! [`Bme280::measure`] triggers one conversion, waits for it and reads the
//! burst registers.  Compensation uses the floating-point formulas from
//! the Bosch datasheet (section 8.1).
//!
//! The driver borrows the bus per call so the light sensor can share it.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::info;

use crate::app::telemetry::Climate;
use crate::error::SensorError;

pub const ADDR_PRIMARY: u8 = 0x76;
pub const ADDR_SECONDARY: u8 = 0x77;

const CHIP_ID: u8 = 0x60;

const REG_CHIP_ID: u8 = 0xD0;
const REG_CALIB_00: u8 = 0x88;
const REG_CALIB_26: u8 = 0xE1;
const REG_CTRL_HUM: u8 = 0xF2;
const REG_STATUS: u8 = 0xF3;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_DATA: u8 = 0xF7;

/// osrs_h = x1
const CTRL_HUM_X1: u8 = 0x01;
/// osrs_t = x1, osrs_p = x1, mode = forced
const CTRL_MEAS_FORCED: u8 = 0b001_001_01;
const STATUS_MEASURING: u8 = 0x08;

/// Worst case for 1x/1x/1x is ~9.3 ms.
const CONVERSION_MS: u32 = 10;
const MAX_STATUS_POLLS: u8 = 5;

/// Trimming parameters burned in at the factory.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Calibration {
    pub t1: u16,
    pub t2: i16,
    pub t3: i16,
    pub p1: u16,
    pub p2: i16,
    pub p3: i16,
    pub p4: i16,
    pub p5: i16,
    pub p6: i16,
    pub p7: i16,
    pub p8: i16,
    pub p9: i16,
    pub h1: u8,
    pub h2: i16,
    pub h3: u8,
    pub h4: i16,
    pub h5: i16,
    pub h6: i8,
}

impl Calibration {
    /// Decode the 0x88..0xA1 and 0xE1..0xE7 register blocks.
    pub fn from_registers(block0: &[u8; 26], block1: &[u8; 7]) -> Self {
        let u16_at = |i: usize| u16::from_le_bytes([block0[i], block0[i + 1]]);
        let i16_at = |i: usize| i16::from_le_bytes([block0[i], block0[i + 1]]);
        Self {
            t1: u16_at(0),
            t2: i16_at(2),
            t3: i16_at(4),
            p1: u16_at(6),
            p2: i16_at(8),
            p3: i16_at(10),
            p4: i16_at(12),
            p5: i16_at(14),
            p6: i16_at(16),
            p7: i16_at(18),
            p8: i16_at(20),
            p9: i16_at(22),
            h1: block0[25],
            h2: i16::from_le_bytes([block1[0], block1[1]]),
            h3: block1[2],
            // H4 and H5 share the nibbles of 0xE5.
            h4: (i16::from(block1[3] as i8) << 4) | i16::from(block1[4] & 0x0F),
            h5: (i16::from(block1[5] as i8) << 4) | i16::from(block1[4] >> 4),
            h6: block1[6] as i8,
        }
    }

    /// Returns (°C, t_fine).
    pub fn temperature(&self, adc_t: i32) -> (f32, f32) {
        let adc_t = adc_t as f32;
        let t1 = f32::from(self.t1);
        let var1 = (adc_t / 16384.0 - t1 / 1024.0) * f32::from(self.t2);
        let x = adc_t / 131072.0 - t1 / 8192.0;
        let var2 = x * x * f32::from(self.t3);
        let t_fine = var1 + var2;
        (t_fine / 5120.0, t_fine)
    }

    /// Pascals; `0.0` when the calibration would divide by zero.
    pub fn pressure(&self, adc_p: i32, t_fine: f32) -> f32 {
        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * f32::from(self.p6) / 32768.0;
        var2 += var1 * f32::from(self.p5) * 2.0;
        var2 = var2 / 4.0 + f32::from(self.p4) * 65536.0;
        var1 = (f32::from(self.p3) * var1 * var1 / 524288.0 + f32::from(self.p2) * var1) / 524288.0;
        var1 = (1.0 + var1 / 32768.0) * f32::from(self.p1);
        if var1 == 0.0 {
            return 0.0;
        }
        let mut p = 1048576.0 - adc_p as f32;
        p = (p - var2 / 4096.0) * 6250.0 / var1;
        let var1 = f32::from(self.p9) * p * p / 2147483648.0;
        let var2 = p * f32::from(self.p8) / 32768.0;
        p + (var1 + var2 + f32::from(self.p7)) / 16.0
    }

    /// Relative humidity in percent, clamped to 0..=100.
    pub fn humidity(&self, adc_h: i32, t_fine: f32) -> f32 {
        let h = t_fine - 76800.0;
        let h = (adc_h as f32 - (f32::from(self.h4) * 64.0 + f32::from(self.h5) / 16384.0 * h))
            * (f32::from(self.h2) / 65536.0
                * (1.0 + f32::from(self.h6) / 67108864.0 * h * (1.0 + f32::from(self.h3) / 67108864.0 * h)));
        let h = h * (1.0 - f32::from(self.h1) * h / 524288.0);
        h.clamp(0.0, 100.0)
    }
}

pub struct Bme280 {
    address: u8,
    calibration: Calibration,
}

impl Bme280 {
    /// Look for the chip on both addresses and read its calibration.
    pub fn probe<I: I2c>(i2c: &mut I) -> Result<Self, SensorError> {
        for address in [ADDR_PRIMARY, ADDR_SECONDARY] {
            let mut id = [0u8; 1];
            if i2c.write_read(address, &[REG_CHIP_ID], &mut id).is_err() {
                continue;
            }
            if id[0] != CHIP_ID {
                continue;
            }
            let mut block0 = [0u8; 26];
            let mut block1 = [0u8; 7];
            i2c.write_read(address, &[REG_CALIB_00], &mut block0)
                .map_err(|_| SensorError::BusError)?;
            i2c.write_read(address, &[REG_CALIB_26], &mut block1)
                .map_err(|_| SensorError::BusError)?;
            info!("BME280: found at 0x{:02X}", address);
            return Ok(Self {
                address,
                calibration: Calibration::from_registers(&block0, &block1),
            });
        }
        Err(SensorError::NotPresent)
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// One forced-mode conversion.
    pub fn measure<I: I2c, D: DelayNs>(&self, i2c: &mut I, delay: &mut D) -> Result<Climate, SensorError> {
        let bus = |_| SensorError::BusError;
        // ctrl_hum only latches on the following ctrl_meas write.
        i2c.write(self.address, &[REG_CTRL_HUM, CTRL_HUM_X1]).map_err(bus)?;
        i2c.write(self.address, &[REG_CTRL_MEAS, CTRL_MEAS_FORCED]).map_err(bus)?;

        delay.delay_ms(CONVERSION_MS);
        let mut status = [STATUS_MEASURING];
        for _ in 0..MAX_STATUS_POLLS {
            i2c.write_read(self.address, &[REG_STATUS], &mut status).map_err(bus)?;
            if status[0] & STATUS_MEASURING == 0 {
                break;
            }
            delay.delay_ms(2);
        }

        let mut data = [0u8; 8];
        i2c.write_read(self.address, &[REG_DATA], &mut data).map_err(bus)?;
        Ok(self.compensate(&data))
    }

    fn compensate(&self, data: &[u8; 8]) -> Climate {
        let adc_p = (i32::from(data[0]) << 12) | (i32::from(data[1]) << 4) | (i32::from(data[2]) >> 4);
        let adc_t = (i32::from(data[3]) << 12) | (i32::from(data[4]) << 4) | (i32::from(data[5]) >> 4);
        let adc_h = (i32::from(data[6]) << 8) | i32::from(data[7]);

        let cal = &self.calibration;
        let (temperature_c, t_fine) = cal.temperature(adc_t);
        Climate {
            temperature_c,
            humidity_pct: cal.humidity(adc_h, t_fine),
            pressure_hpa: cal.pressure(adc_p, t_fine) / 100.0,
        }
    }
}
