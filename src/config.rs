//! Device configuration.
//!
//! Two independent records live here:
//!
//! | Record                | Written by                  | NVS location              |
//! |-----------------------|-----------------------------|---------------------------|
//! | [`DeviceSettings`]    | `settings` MQTT topic       | `storage` / `settings`    |
//! | [`ProvisioningConfig`]| BLE commissioning window    | `wifi_config` / one key per field |
//!
//! Compile-time tunables that are not user-adjustable sit at the top.

use core::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app::ports::ConfigError;

// ---------------------------------------------------------------------------
// Tunables
// ---------------------------------------------------------------------------

/// Default pump run time for auto and manual watering (seconds).
pub const DEFAULT_WATERING_DURATION_SECS: u32 = 5;
/// Default sensing period (seconds).
pub const DEFAULT_MEASUREMENT_INTERVAL_SECS: u32 = 60;
/// Lowest accepted watering duration from a settings update.
pub const MIN_WATERING_DURATION_SECS: u32 = 1;
/// Lowest accepted measurement interval from a settings update.
pub const MIN_MEASUREMENT_INTERVAL_SECS: u32 = 5;
/// Manual watering requests are clamped to this range.
pub const MANUAL_WATERING_RANGE_SECS: (i64, i64) = (1, 60);
/// Auto-watering is refused until this long after the previous completion.
pub const AUTO_WATER_COOLDOWN_MS: u32 = 30 * 60 * 1000;
/// Sampling period once the link has been down for a while.
pub const OFFLINE_INTERVAL_SECS: u32 = 2 * 60 * 60;
/// Consecutive buffered cycles before switching to [`OFFLINE_INTERVAL_SECS`].
pub const OFFLINE_CYCLES_BEFORE_BACKOFF: u32 = 5;

pub const SETTINGS_NAMESPACE: &str = "storage";
pub const SETTINGS_KEY: &str = "settings";
pub const PROVISIONING_NAMESPACE: &str = "wifi_config";

// ---------------------------------------------------------------------------
// Threshold bounds
// ---------------------------------------------------------------------------

/// A `[min, max]` pair where either side may be unbounded (`None`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T: PartialOrd + Copy> Bounds<T> {
    pub const UNBOUNDED: Self = Self { min: None, max: None };

    pub const fn new(min: Option<T>, max: Option<T>) -> Self {
        Self { min, max }
    }

    /// Both sides set and `min > max`.
    pub fn is_inverted(&self) -> bool {
        matches!((self.min, self.max), (Some(lo), Some(hi)) if lo > hi)
    }

    /// The minimum, if `value` is strictly below it.
    pub fn violated_min(&self, value: T) -> Option<T> {
        self.min.filter(|&lo| value < lo)
    }

    /// The maximum, if `value` is strictly above it.
    pub fn violated_max(&self, value: T) -> Option<T> {
        self.max.filter(|&hi| value > hi)
    }

    /// Merge one `(min, max)` pair from an update.
    ///
    /// Supplying only one side of a pair leaves the other side unbounded;
    /// supplying neither keeps the current pair.
    fn merged(self, min: Option<T>, max: Option<T>) -> Self {
        if min.is_none() && max.is_none() {
            self
        } else {
            Self { min, max }
        }
    }
}

impl<T: PartialOrd + Copy> Default for Bounds<T> {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

// ---------------------------------------------------------------------------
// Device settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub temperature: Bounds<f32>,
    pub humidity: Bounds<f32>,
    pub soil: Bounds<i32>,
    pub light: Bounds<f32>,
    pub watering_duration_secs: u32,
    pub measurement_interval_secs: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            temperature: Bounds::UNBOUNDED,
            humidity: Bounds::UNBOUNDED,
            soil: Bounds::UNBOUNDED,
            light: Bounds::UNBOUNDED,
            watering_duration_secs: DEFAULT_WATERING_DURATION_SECS,
            measurement_interval_secs: DEFAULT_MEASUREMENT_INTERVAL_SECS,
        }
    }
}

impl DeviceSettings {
    fn has_inverted_bounds(&self) -> bool {
        self.temperature.is_inverted()
            || self.humidity.is_inverted()
            || self.soil.is_inverted()
            || self.light.is_inverted()
    }

    /// Range summary used in the `settings.rejected` alert details.
    pub fn bounds_json(&self) -> Value {
        serde_json::json!({
            "temp": [self.temperature.min, self.temperature.max],
            "hum": [self.humidity.min, self.humidity.max],
            "soil": [self.soil.min, self.soil.max],
            "light": [self.light.min, self.light.max],
        })
    }
}

// ---------------------------------------------------------------------------
// Partial update from the `settings` topic
// ---------------------------------------------------------------------------

/// Fields present in one `settings` message.  Non-numeric values are
/// treated as absent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SettingsPatch {
    pub temp_min: Option<f32>,
    pub temp_max: Option<f32>,
    pub hum_min: Option<f32>,
    pub hum_max: Option<f32>,
    pub soil_min: Option<i32>,
    pub soil_max: Option<i32>,
    pub light_min: Option<f32>,
    pub light_max: Option<f32>,
    pub watering_duration_secs: Option<i64>,
    pub measurement_interval_secs: Option<i64>,
}

/// A settings update whose merged result had `min > max` somewhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettingsRejected {
    pub candidate: DeviceSettings,
}

impl SettingsPatch {
    pub fn from_json(root: &Value) -> Self {
        let num = |key: &str| root.get(key).and_then(Value::as_f64);
        Self {
            temp_min: num("temp_min").map(|v| v as f32),
            temp_max: num("temp_max").map(|v| v as f32),
            hum_min: num("hum_min").map(|v| v as f32),
            hum_max: num("hum_max").map(|v| v as f32),
            soil_min: num("soil_min").map(|v| v as i32),
            soil_max: num("soil_max").map(|v| v as i32),
            light_min: num("light_min").map(|v| v as f32),
            light_max: num("light_max").map(|v| v as f32),
            watering_duration_secs: num("watering_duration_sec").map(|v| v as i64),
            measurement_interval_secs: num("measurement_interval_sec").map(|v| v as i64),
        }
    }

    /// Merge onto `current`.  Any inverted pair rejects the whole update.
    pub fn apply(&self, current: &DeviceSettings) -> Result<DeviceSettings, SettingsRejected> {
        let mut next = *current;
        next.temperature = current.temperature.merged(self.temp_min, self.temp_max);
        next.humidity = current.humidity.merged(self.hum_min, self.hum_max);
        next.soil = current.soil.merged(self.soil_min, self.soil_max);
        next.light = current.light.merged(self.light_min, self.light_max);

        if let Some(secs) = self.watering_duration_secs {
            next.watering_duration_secs = floor_secs(secs, MIN_WATERING_DURATION_SECS);
        }
        if let Some(secs) = self.measurement_interval_secs {
            next.measurement_interval_secs = floor_secs(secs, MIN_MEASUREMENT_INTERVAL_SECS);
        }

        if next.has_inverted_bounds() {
            return Err(SettingsRejected { candidate: next });
        }
        Ok(next)
    }
}

fn floor_secs(requested: i64, floor: u32) -> u32 {
    requested.clamp(i64::from(floor), i64::from(u32::MAX)) as u32
}

// ---------------------------------------------------------------------------
// Provisioning credentials
// ---------------------------------------------------------------------------

/// One independently persisted provisioning value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningField {
    Ssid,
    Password,
    Broker,
    MqttLogin,
    MqttPassword,
    UserId,
}

impl ProvisioningField {
    pub const ALL: [Self; 6] = [
        Self::Ssid,
        Self::Password,
        Self::Broker,
        Self::MqttLogin,
        Self::MqttPassword,
        Self::UserId,
    ];

    /// NVS key within [`PROVISIONING_NAMESPACE`].
    pub const fn nvs_key(self) -> &'static str {
        match self {
            Self::Ssid => "ssid",
            Self::Password => "pass",
            Self::Broker => "broker_uri",
            Self::MqttLogin => "mqtt_login",
            Self::MqttPassword => "mqtt_pass",
            Self::UserId => "user_id",
        }
    }

    /// Longest accepted value in bytes.
    pub const fn max_len(self) -> usize {
        match self {
            Self::Ssid => 32,
            Self::Broker => 128,
            Self::Password | Self::MqttLogin | Self::MqttPassword | Self::UserId => 64,
        }
    }

    /// Never echoed in logs.
    pub const fn is_secret(self) -> bool {
        matches!(self, Self::Password | Self::MqttPassword)
    }
}

impl fmt::Display for ProvisioningField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.nvs_key())
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProvisioningConfig {
    pub ssid: heapless::String<32>,
    pub password: heapless::String<64>,
    pub broker: heapless::String<128>,
    pub mqtt_login: heapless::String<64>,
    pub mqtt_password: heapless::String<64>,
    pub user_id: heapless::String<64>,
}

impl ProvisioningConfig {
    pub fn get(&self, field: ProvisioningField) -> &str {
        match field {
            ProvisioningField::Ssid => &self.ssid,
            ProvisioningField::Password => &self.password,
            ProvisioningField::Broker => &self.broker,
            ProvisioningField::MqttLogin => &self.mqtt_login,
            ProvisioningField::MqttPassword => &self.mqtt_password,
            ProvisioningField::UserId => &self.user_id,
        }
    }

    /// Replace one field.  Values longer than the field limit are refused.
    pub fn set(&mut self, field: ProvisioningField, value: &str) -> Result<(), ConfigError> {
        fn put<const N: usize>(dst: &mut heapless::String<N>, value: &str) -> Result<(), ConfigError> {
            dst.clear();
            dst.push_str(value)
                .map_err(|_| ConfigError::ValidationFailed("value exceeds field length"))
        }
        match field {
            ProvisioningField::Ssid => put(&mut self.ssid, value),
            ProvisioningField::Password => put(&mut self.password, value),
            ProvisioningField::Broker => put(&mut self.broker, value),
            ProvisioningField::MqttLogin => put(&mut self.mqtt_login, value),
            ProvisioningField::MqttPassword => put(&mut self.mqtt_password, value),
            ProvisioningField::UserId => put(&mut self.user_id, value),
        }
    }

    /// Everything but the WiFi password is present (open networks have none).
    pub fn is_fully_provisioned(&self) -> bool {
        !self.ssid.is_empty() && self.mqtt_ready()
    }

    /// Enough to start the MQTT client.
    pub fn mqtt_ready(&self) -> bool {
        !self.broker.is_empty()
            && !self.user_id.is_empty()
            && !self.mqtt_login.is_empty()
            && !self.mqtt_password.is_empty()
    }
}

impl fmt::Debug for ProvisioningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |s: &str| if s.is_empty() { "" } else { "***" };
        f.debug_struct("ProvisioningConfig")
            .field("ssid", &self.ssid.as_str())
            .field("password", &mask(&self.password))
            .field("broker", &self.broker.as_str())
            .field("mqtt_login", &self.mqtt_login.as_str())
            .field("mqtt_password", &mask(&self.mqtt_password))
            .field("user_id", &self.user_id.as_str())
            .finish()
    }
}
