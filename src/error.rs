//! Unified error types for the Smart Garden firmware.
//!
//! Subsystem errors convert into a single [`Error`] so the boot path in
//! `main` can bubble anything up with `?`.  None of these are fatal at
//! runtime: the orchestrator and connectivity layer turn them into alerts.

use core::fmt;

use crate::adapters::ble::ProvisioningError;
use crate::adapters::wifi::WifiError;
use crate::app::ports::{ConfigError, StorageError, TransportError};
use crate::drivers::hw_init::HwInitError;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A sensor could not be read.
    Sensor(SensorError),
    /// Persistent storage failed.
    Storage(StorageError),
    /// Configuration could not be loaded or validated.
    Config(ConfigError),
    /// The MQTT transport rejected an operation.
    Transport(TransportError),
    /// An inbound payload could not be understood.
    Payload(PayloadError),
    /// ADC or GPIO setup failed.
    Hardware(HwInitError),
    /// The BLE stack could not be brought up.
    Radio(ProvisioningError),
    /// The WiFi station could not be started.
    Wifi(WifiError),
    /// Peripheral initialisation failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Payload(e) => write!(f, "payload: {e}"),
            Self::Hardware(e) => write!(f, "hardware: {e}"),
            Self::Radio(e) => write!(f, "ble: {e}"),
            Self::Wifi(e) => write!(f, "wifi: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<HwInitError> for Error {
    fn from(e: HwInitError) -> Self {
        Self::Hardware(e)
    }
}

impl From<ProvisioningError> for Error {
    fn from(e: ProvisioningError) -> Self {
        Self::Radio(e)
    }
}

impl From<WifiError> for Error {
    fn from(e: WifiError) -> Self {
        Self::Wifi(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// ADC oneshot read returned an ESP-IDF error code.
    AdcReadFailed(i32),
    /// An I2C transaction failed.
    BusError,
    /// The device did not answer during probing at boot.
    NotPresent,
}

impl SensorError {
    /// Numeric code reported in alert details (`{"err": n}`).
    pub fn code(self) -> i32 {
        match self {
            Self::AdcReadFailed(rc) => rc,
            Self::BusError => -1,
            Self::NotPresent => -2,
        }
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdcReadFailed(rc) => write!(f, "ADC read failed (rc={rc})"),
            Self::BusError => write!(f, "I2C bus error"),
            Self::NotPresent => write!(f, "device not present"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// Inbound payload errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadError {
    /// Body is not valid JSON (or not valid UTF-8).
    InvalidJson,
    /// JSON parsed but the top level is not an object.
    NotAnObject,
    /// Topic does not end in a known command suffix.
    UnknownTopic,
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJson => write!(f, "invalid JSON"),
            Self::NotAnObject => write!(f, "expected a JSON object"),
            Self::UnknownTopic => write!(f, "unknown topic"),
        }
    }
}

impl From<PayloadError> for Error {
    fn from(e: PayloadError) -> Self {
        Self::Payload(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
