//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Orchestrator / ConnectivityLayer / Commissioning
//! ```
//!
//! Driven adapters (sensors, pump, NVS, MQTT client, clock) implement these
//! traits.  Domain components consume them via generics, so none of them
//! touch ESP-IDF directly and all of them run under host tests.

use crate::alerts::AlertRecord;
use crate::app::telemetry::{FieldMask, SensorSample, TelemetryRecord};
use crate::commissioning::fields::Characteristic;
use crate::config::{DeviceSettings, ProvisioningConfig, ProvisioningField};

// ───────────────────────────────────────────────────────────────
// Sensor port (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

pub trait SensorPort {
    /// Sample every sensor once.  Individual failures are reported in the
    /// sample, never as a panic or an early return.
    fn sample(&mut self) -> SensorSample;

    /// Metrics whose hardware answered at boot.
    fn available_fields(&self) -> FieldMask;

    /// Float switch only; cheaper than a full [`sample`](Self::sample).
    fn water_tank_low(&mut self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Pump port (driven adapter: domain → hardware)
// ───────────────────────────────────────────────────────────────

pub trait PumpPort {
    fn set_running(&mut self, on: bool);
    fn is_running(&self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Radio + system ports (commissioning)
// ───────────────────────────────────────────────────────────────

/// The BLE peripheral as seen by the commissioning state machine.
pub trait RadioPort {
    fn start_advertising(&mut self);
    fn stop_advertising(&mut self);
    /// Ask the stack to drop the current peer; a disconnect event follows.
    fn disconnect_peer(&mut self);
    /// Value served for reads of a readable characteristic.
    fn set_read_value(&mut self, ch: Characteristic, value: &str);
}

pub trait RestartPort {
    /// Reboot the chip.  Does not return on the device; simulations record
    /// the request.
    fn restart(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// A single reading of both clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    /// Milliseconds since boot; wraps after ~49 days.
    pub monotonic_ms: u32,
    /// Unix epoch milliseconds (small values until SNTP has synced).
    pub wall_ms: u64,
}

pub trait Clock {
    fn now(&self) -> Timestamp;
}

// ───────────────────────────────────────────────────────────────
// Outbound sinks (domain → connectivity layer)
// ───────────────────────────────────────────────────────────────

/// Anything that accepts alerts: the connectivity layer itself, or the
/// channel that feeds it from other tasks.
pub trait AlertSink {
    fn submit(&mut self, alert: AlertRecord);
}

pub trait TelemetrySink: AlertSink {
    fn submit_telemetry(&mut self, record: TelemetryRecord);

    /// Publishing cycles in a row that ended up in the offline queue.
    fn consecutive_buffered(&self) -> u32;
}

impl<S: AlertSink + ?Sized> AlertSink for &mut S {
    fn submit(&mut self, alert: AlertRecord) {
        (**self).submit(alert);
    }
}

// ───────────────────────────────────────────────────────────────
// MQTT transport port
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

pub trait TransportPort {
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), TransportError>;
    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage.
///
/// Keys are namespaced; writes are atomic per key (NVS commit semantics).
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Configuration store (typed view over StoragePort)
// ───────────────────────────────────────────────────────────────

/// Typed access to the two persisted configuration records.
///
/// Blanket-implemented for every [`StoragePort`] in
/// [`crate::app::store`]; tests may implement it directly.
pub trait ConfigStore {
    /// Missing settings load as [`DeviceSettings::default()`].
    fn load_settings(&self) -> Result<DeviceSettings, ConfigError>;
    fn save_settings(&mut self, settings: &DeviceSettings) -> Result<(), ConfigError>;

    /// Missing fields load as empty strings.
    fn load_provisioning(&self) -> ProvisioningConfig;
    fn save_provisioning_field(&mut self, field: ProvisioningField, value: &str) -> Result<(), StorageError>;
    fn erase_provisioning(&mut self) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigStore`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored record failed deserialization.
    Corrupted,
    /// A value failed validation.
    ValidationFailed(&'static str),
    /// The underlying storage failed.
    Storage(StorageError),
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error, with the ESP-IDF return code when known.
    IoError(i32),
}

/// Errors from [`TransportPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The client has not been started or is not connected.
    NotConnected,
    /// The client refused the message (outbox full, encode failure).
    Rejected(i32),
}

impl From<StorageError> for ConfigError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::Storage(e) => write!(f, "storage: {}", e),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError(rc) => write!(f, "I/O error (rc={})", rc),
        }
    }
}

impl StorageError {
    /// Numeric code reported in alert details (`{"err": n}`).
    pub fn code(self) -> i32 {
        match self {
            Self::NotFound => 0x1102,
            Self::Full => 0x1105,
            Self::IoError(rc) => rc,
        }
    }
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::Rejected(rc) => write!(f, "rejected (rc={})", rc),
        }
    }
}
