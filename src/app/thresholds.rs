//! Edge-triggered threshold alerts.
//!
//! Every `(metric, direction)` pair has a latch.  The alert fires when the
//! value first crosses the bound and re-arms once the value is back in
//! range or the metric becomes unavailable.  A missing bound never fires.

use core::fmt;

use crate::alerts::AlertRecord;
use crate::app::ports::AlertSink;
use crate::app::telemetry::Readings;
use crate::config::DeviceSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Latch {
    TempLow,
    TempHigh,
    HumLow,
    HumHigh,
    SoilLow,
    SoilHigh,
    LightLow,
    LightHigh,
    WaterCritical,
}

const LATCH_COUNT: usize = Latch::WaterCritical as usize + 1;

#[derive(Debug, Default)]
pub struct ThresholdMonitor {
    latched: [bool; LATCH_COUNT],
}

impl ThresholdMonitor {
    pub const fn new() -> Self {
        Self {
            latched: [false; LATCH_COUNT],
        }
    }

    /// Alerts that are currently latched (fired and not yet cleared).
    pub fn active(&self) -> usize {
        self.latched.iter().filter(|l| **l).count()
    }

    /// Evaluate one set of readings against the current bounds.
    pub fn evaluate<S: AlertSink + ?Sized>(
        &mut self,
        readings: &Readings,
        settings: &DeviceSettings,
        timestamp_ms: u64,
        sink: &mut S,
    ) {
        let ts = timestamp_ms;

        let temp = readings.air_temperature_c;
        let t = &settings.temperature;
        match temp.and_then(|v| t.violated_min(v).map(|lo| (v, lo))) {
            Some((v, lo)) => self.fire(Latch::TempLow, "temperature_low", format_args!("Temp {:.1} C < min {:.1} C", v, lo), ts, sink),
            None => self.clear(Latch::TempLow),
        }
        match temp.and_then(|v| t.violated_max(v).map(|hi| (v, hi))) {
            Some((v, hi)) => self.fire(Latch::TempHigh, "temperature_high", format_args!("Temp {:.1} C > max {:.1} C", v, hi), ts, sink),
            None => self.clear(Latch::TempHigh),
        }

        let hum = readings.air_humidity_pct;
        let h = &settings.humidity;
        match hum.and_then(|v| h.violated_min(v).map(|lo| (v, lo))) {
            Some((v, lo)) => self.fire(Latch::HumLow, "humidity_low", format_args!("Hum {:.1} % < min {:.1} %", v, lo), ts, sink),
            None => self.clear(Latch::HumLow),
        }
        match hum.and_then(|v| h.violated_max(v).map(|hi| (v, hi))) {
            Some((v, hi)) => self.fire(Latch::HumHigh, "humidity_high", format_args!("Hum {:.1} % > max {:.1} %", v, hi), ts, sink),
            None => self.clear(Latch::HumHigh),
        }

        let soil = readings.soil_moisture_pct;
        let s = &settings.soil;
        match soil.and_then(|v| s.violated_min(v).map(|lo| (v, lo))) {
            Some((v, lo)) => self.fire(Latch::SoilLow, "soil_moisture_low", format_args!("Soil {} % < min {} %", v, lo), ts, sink),
            None => self.clear(Latch::SoilLow),
        }
        match soil.and_then(|v| s.violated_max(v).map(|hi| (v, hi))) {
            Some((v, hi)) => self.fire(Latch::SoilHigh, "soil_moisture_high", format_args!("Soil {} % > max {} %", v, hi), ts, sink),
            None => self.clear(Latch::SoilHigh),
        }

        let light = readings.light_lux;
        let l = &settings.light;
        match light.and_then(|v| l.violated_min(v).map(|lo| (v, lo))) {
            Some((v, lo)) => self.fire(Latch::LightLow, "light_low", format_args!("Light {:.1} lux < min {:.1} lux", v, lo), ts, sink),
            None => self.clear(Latch::LightLow),
        }
        match light.and_then(|v| l.violated_max(v).map(|hi| (v, hi))) {
            Some((v, hi)) => self.fire(Latch::LightHigh, "light_high", format_args!("Light {:.1} lux > max {:.1} lux", v, hi), ts, sink),
            None => self.clear(Latch::LightHigh),
        }

        if readings.water_tank_ok == Some(false) {
            self.fire(Latch::WaterCritical, WATER_LEVEL_CRITICAL, format_args!("{}", REFILL_MESSAGE), ts, sink);
        } else {
            self.clear(Latch::WaterCritical);
        }
    }

    fn fire<S: AlertSink + ?Sized>(
        &mut self,
        latch: Latch,
        code: &'static str,
        message: fmt::Arguments<'_>,
        timestamp_ms: u64,
        sink: &mut S,
    ) {
        let slot = &mut self.latched[latch as usize];
        if !*slot {
            sink.submit(AlertRecord::threshold(timestamp_ms, code, message));
            *slot = true;
        }
    }

    fn clear(&mut self, latch: Latch) {
        self.latched[latch as usize] = false;
    }
}

pub const WATER_LEVEL_CRITICAL: &str = "water_level_critical";
pub const REFILL_MESSAGE: &str = "Refill water tank!";
