//! MQTT topic layout and JSON payload encoding.
//!
//! ```text
//! garden/{user_id}/{device_id}/telemetry       QoS 1
//! garden/{user_id}/{device_id}/alert           QoS 2
//! garden/{user_id}/{device_id}/capabilities    QoS 1, retained
//! garden/{user_id}/{device_id}/command/water   subscribed
//! garden/{user_id}/{device_id}/command/read    subscribed
//! garden/{user_id}/{device_id}/settings        subscribed
//! ```

use serde_json::{Map, Number, Value, json};

use crate::alerts::AlertRecord;
use crate::app::telemetry::{FieldMask, Metric, TelemetryRecord};

pub const TOPIC_TELEMETRY: &str = "telemetry";
pub const TOPIC_ALERT: &str = "alert";
pub const TOPIC_CAPABILITIES: &str = "capabilities";
pub const TOPIC_COMMAND_WATER: &str = "command/water";
pub const TOPIC_COMMAND_READ: &str = "command/read";
pub const TOPIC_SETTINGS: &str = "settings";

/// Topics the device subscribes to after every (re)connect.
pub const SUBSCRIPTIONS: [&str; 3] = [TOPIC_COMMAND_WATER, TOPIC_COMMAND_READ, TOPIC_SETTINGS];

/// Who this device is on the broker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: heapless::String<64>,
    /// Station MAC as 12 upper-case hex digits.
    pub device_id: heapless::String<12>,
}

impl Identity {
    pub fn new(user_id: &str, device_id: &str) -> Self {
        let mut id = Self::default();
        // Both are bounded upstream; an overflow leaves the field empty,
        // which keeps capabilities from being published.
        let _ = id.user_id.push_str(user_id);
        let _ = id.device_id.push_str(device_id);
        id
    }

    pub fn is_complete(&self) -> bool {
        !self.user_id.is_empty() && !self.device_id.is_empty()
    }

    pub fn topic(&self, suffix: &str) -> String {
        format!("garden/{}/{}/{}", self.user_id, self.device_id, suffix)
    }
}

fn round2(v: f32) -> Value {
    let rounded = (f64::from(v) * 100.0).round() / 100.0;
    Number::from_f64(rounded).map_or(Value::Null, Value::Number)
}

pub fn telemetry_json(id: &Identity, record: &TelemetryRecord) -> Value {
    let r = &record.readings;
    let mask = record.fields;
    let mut sensors = Map::new();
    for metric in Metric::ALL {
        let value = if mask.contains(metric) {
            match metric {
                Metric::SoilMoisture => r.soil_moisture_pct.map_or(Value::Null, Value::from),
                Metric::AirTemperature => r.air_temperature_c.map_or(Value::Null, round2),
                Metric::AirHumidity => r.air_humidity_pct.map_or(Value::Null, round2),
                Metric::Pressure => r.pressure_hpa.map_or(Value::Null, round2),
                Metric::Light => r.light_lux.map_or(Value::Null, round2),
                Metric::WaterTank => r.water_tank_ok.map_or(Value::Null, Value::Bool),
            }
        } else {
            Value::Null
        };
        sensors.insert(metric.wire_name().into(), value);
    }

    json!({
        "device": id.device_id.as_str(),
        "user": id.user_id.as_str(),
        "timestamp": record.timestamp_ms,
        "sensors": sensors,
    })
}

/// `type` and `msg` duplicate `code` and `message` for older dashboards.
pub fn alert_json(id: &Identity, alert: &AlertRecord) -> Value {
    json!({
        "device": id.device_id.as_str(),
        "user": id.user_id.as_str(),
        "timestamp": alert.timestamp_ms,
        "type": alert.code,
        "msg": alert.message.as_str(),
        "code": alert.code,
        "severity": alert.severity.as_str(),
        "subsystem": alert.subsystem.as_str(),
        "message": alert.message.as_str(),
        "details": alert.details.clone().unwrap_or(Value::Null),
    })
}

pub fn capabilities_json(id: &Identity, timestamp_ms: u64, available: FieldMask) -> Value {
    let fields: Vec<&str> = available.iter().map(Metric::wire_name).collect();
    let measured: Map<String, Value> = Metric::ALL
        .into_iter()
        .map(|m| (m.wire_name().into(), Value::Bool(available.contains(m))))
        .collect();
    json!({
        "device": id.device_id.as_str(),
        "user": id.user_id.as_str(),
        "timestamp": timestamp_ms,
        "fields": fields,
        "measured": measured,
    })
}
