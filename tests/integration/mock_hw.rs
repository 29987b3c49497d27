//! Mock adapters for integration tests.
//!
//! Every mock records what it was asked to do so tests can assert on the
//! full call history without touching GPIO, BLE or the network.

use std::cell::Cell;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use smartgarden::alerts::AlertRecord;
use smartgarden::app::ports::{
    AlertSink, Clock, PumpPort, RadioPort, RestartPort, SensorPort, StorageError, StoragePort, TelemetrySink,
    Timestamp,
};
use smartgarden::app::telemetry::{Climate, FieldMask, SensorSample, TelemetryRecord};
use smartgarden::commissioning::fields::Characteristic;
use smartgarden::error::SensorError;

pub const WALL_EPOCH_MS: u64 = 1_700_000_000_000;

// ── Clock ─────────────────────────────────────────────────────

/// Shared manual clock.  Clones observe the same time.
#[derive(Clone, Default)]
pub struct ManualClock {
    ms: Rc<Cell<u32>>,
}

#[allow(dead_code)]
impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u32) {
        self.ms.set(self.ms.get().wrapping_add(ms));
    }

    pub fn set(&self, ms: u32) {
        self.ms.set(ms);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let ms = self.ms.get();
        Timestamp {
            monotonic_ms: ms,
            wall_ms: WALL_EPOCH_MS + u64::from(ms),
        }
    }
}

/// Delay that returns at once and remembers how long it was asked to wait.
#[derive(Clone, Default)]
pub struct NoDelay {
    pub total_ms: Rc<Cell<u64>>,
}

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ms.set(self.total_ms.get() + u64::from(ns / 1_000_000));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.total_ms.set(self.total_ms.get() + u64::from(ms));
    }
}

// ── Sensors ───────────────────────────────────────────────────

pub fn healthy_sample() -> SensorSample {
    SensorSample {
        soil_pct: Ok(55),
        climate: Ok(Climate {
            temperature_c: 21.5,
            humidity_pct: 48.0,
            pressure_hpa: 1012.3,
        }),
        light_lux: Ok(320.0),
        water_low: false,
    }
}

pub struct MockSensors {
    pub sample: SensorSample,
    pub fields: FieldMask,
    pub samples_taken: u32,
}

#[allow(dead_code)]
impl MockSensors {
    pub fn new() -> Self {
        Self {
            sample: healthy_sample(),
            fields: FieldMask::ALL,
            samples_taken: 0,
        }
    }

    pub fn with_soil(mut self, pct: i32) -> Self {
        self.sample.soil_pct = Ok(pct);
        self
    }

    pub fn without_light(mut self) -> Self {
        self.sample.light_lux = Err(SensorError::NotPresent);
        self
    }
}

impl Default for MockSensors {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorPort for MockSensors {
    fn sample(&mut self) -> SensorSample {
        self.samples_taken += 1;
        self.sample
    }

    fn available_fields(&self) -> FieldMask {
        self.fields
    }

    fn water_tank_low(&mut self) -> bool {
        self.sample.water_low
    }
}

// ── Pump ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockPump {
    pub history: Vec<bool>,
}

impl PumpPort for MockPump {
    fn set_running(&mut self, on: bool) {
        self.history.push(on);
    }

    fn is_running(&self) -> bool {
        self.history.last().copied().unwrap_or(false)
    }
}

// ── Radio / restart ───────────────────────────────────────────

#[derive(Default)]
pub struct MockRadio {
    pub advertising: bool,
    pub adv_starts: u32,
    pub adv_stops: u32,
    pub disconnects: u32,
    pub read_values: Vec<(Characteristic, String)>,
}

#[allow(dead_code)]
impl MockRadio {
    pub fn read_value(&self, ch: Characteristic) -> Option<&str> {
        self.read_values
            .iter()
            .rev()
            .find(|(c, _)| *c == ch)
            .map(|(_, v)| v.as_str())
    }
}

impl RadioPort for MockRadio {
    fn start_advertising(&mut self) {
        self.advertising = true;
        self.adv_starts += 1;
    }

    fn stop_advertising(&mut self) {
        self.advertising = false;
        self.adv_stops += 1;
    }

    fn disconnect_peer(&mut self) {
        self.disconnects += 1;
    }

    fn set_read_value(&mut self, ch: Characteristic, value: &str) {
        self.read_values.push((ch, value.to_string()));
    }
}

#[derive(Default)]
pub struct MockRestart {
    pub restarts: u32,
}

impl RestartPort for MockRestart {
    fn restart(&mut self) {
        self.restarts += 1;
    }
}

// ── Storage that refuses writes ───────────────────────────────

#[derive(Default)]
pub struct FullStorage;

impl StoragePort for FullStorage {
    fn read(&self, _namespace: &str, _key: &str, _buf: &mut [u8]) -> Result<usize, StorageError> {
        Err(StorageError::NotFound)
    }

    fn write(&mut self, _namespace: &str, _key: &str, _data: &[u8]) -> Result<(), StorageError> {
        Err(StorageError::Full)
    }

    fn delete(&mut self, _namespace: &str, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }

    fn exists(&self, _namespace: &str, _key: &str) -> bool {
        false
    }
}

// ── Recording sink ────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub alerts: Vec<AlertRecord>,
    pub telemetry: Vec<TelemetryRecord>,
    pub buffered: u32,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn codes(&self) -> Vec<&'static str> {
        self.alerts.iter().map(|a| a.code).collect()
    }

    pub fn count(&self, code: &str) -> usize {
        self.alerts.iter().filter(|a| a.code == code).count()
    }
}

impl AlertSink for RecordingSink {
    fn submit(&mut self, alert: AlertRecord) {
        self.alerts.push(alert);
    }
}

impl TelemetrySink for RecordingSink {
    fn submit_telemetry(&mut self, record: TelemetryRecord) {
        self.telemetry.push(record);
    }

    fn consecutive_buffered(&self) -> u32 {
        self.buffered
    }
}
