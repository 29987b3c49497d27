//! Inbound commands from the broker.
//!
//! The MQTT callback classifies the topic and copies the payload into an
//! [`InboundMessage`]; the orchestrator parses it into a [`Command`].
//! Parsing is lenient the way the dashboards expect: unknown keys are
//! ignored and non-numeric values count as absent.

use serde_json::Value;

use crate::app::telemetry::{FieldMask, Metric};
use crate::config::SettingsPatch;
use crate::connectivity::payload::{TOPIC_COMMAND_READ, TOPIC_COMMAND_WATER, TOPIC_SETTINGS};
use crate::error::PayloadError;

/// Largest inbound payload accepted from the broker.
pub const MAX_INBOUND_PAYLOAD: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    Water,
    Read,
    Settings,
}

impl InboundKind {
    /// Match on the topic suffix; the `garden/{user}/{device}/` prefix is
    /// guaranteed by the subscription.
    pub fn from_topic(topic: &str) -> Result<Self, PayloadError> {
        let ends = |suffix: &str| {
            topic
                .strip_suffix(suffix)
                .is_some_and(|head| head.is_empty() || head.ends_with('/'))
        };
        if ends(TOPIC_COMMAND_WATER) {
            Ok(Self::Water)
        } else if ends(TOPIC_COMMAND_READ) {
            Ok(Self::Read)
        } else if ends(TOPIC_SETTINGS) {
            Ok(Self::Settings)
        } else {
            Err(PayloadError::UnknownTopic)
        }
    }

    /// Short name used in `command.invalid_json` details.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Water => "water",
            Self::Read => "read",
            Self::Settings => "settings",
        }
    }
}

/// A message handed from the network task to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub kind: InboundKind,
    pub payload: heapless::Vec<u8, MAX_INBOUND_PAYLOAD>,
}

impl InboundMessage {
    /// `None` when the payload does not fit.
    pub fn new(kind: InboundKind, payload: &[u8]) -> Option<Self> {
        heapless::Vec::from_slice(payload)
            .ok()
            .map(|payload| Self { kind, payload })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `None` means "use the configured duration".
    Water { requested_secs: Option<i64> },
    Read { fields: FieldMask },
    Settings(SettingsPatch),
}

fn parse_json(payload: &[u8]) -> Result<Value, PayloadError> {
    serde_json::from_slice(payload).map_err(|_| PayloadError::InvalidJson)
}

/// `{"duration": n}`; any other valid JSON falls back to the default.
pub fn parse_water(payload: &[u8]) -> Result<Command, PayloadError> {
    let root = parse_json(payload)?;
    let requested_secs = root.get("duration").and_then(Value::as_f64).map(|v| v as i64);
    Ok(Command::Water { requested_secs })
}

/// `{"field": name}` and/or `{"fields": [names]}`.  Unknown names are
/// skipped; an empty selection means all metrics.
pub fn fields_from_json(root: &Value) -> FieldMask {
    let single = root.get("field").and_then(Value::as_str);
    let many = root
        .get("fields")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);
    single
        .into_iter()
        .chain(many)
        .filter_map(Metric::from_wire_name)
        .collect::<FieldMask>()
        .or_all()
}

/// Invalid JSON still yields a full read; the error is returned alongside
/// so the caller can report it.
pub fn parse_read(payload: &[u8]) -> (Command, Option<PayloadError>) {
    match parse_json(payload) {
        Ok(root) => (Command::Read { fields: fields_from_json(&root) }, None),
        Err(e) => (Command::Read { fields: FieldMask::ALL }, Some(e)),
    }
}

pub fn parse_settings(payload: &[u8]) -> Result<Command, PayloadError> {
    let root = parse_json(payload)?;
    if !root.is_object() {
        return Err(PayloadError::NotAnObject);
    }
    Ok(Command::Settings(SettingsPatch::from_json(&root)))
}
