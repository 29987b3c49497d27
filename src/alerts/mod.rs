//! Alert records and the shared rate limiter.
//!
//! An [`AlertRecord`] is built once and never mutated.  Producers decide
//! whether to build one by asking the [`limiter::RateLimiter`] first, then
//! hand it to an [`AlertSink`](crate::app::ports::AlertSink).

pub mod limiter;

use core::fmt::{self, Write as _};

use serde_json::Value;

pub use limiter::{ALERT_LIMITER, RateLimiter, Verdict};

/// Longest message kept in a record; longer text is cut on a char boundary.
pub const MAX_MESSAGE_LEN: usize = 128;

// ── Common cooldowns ─────────────────────────────────────────

pub const COOLDOWN_10S: u32 = 10 * 1000;
pub const COOLDOWN_1MIN: u32 = 60 * 1000;
pub const COOLDOWN_5MIN: u32 = 5 * 60 * 1000;
pub const COOLDOWN_10MIN: u32 = 10 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

/// Which part of the firmware raised the alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    App,
    System,
    Command,
    Settings,
    Mqtt,
    Telemetry,
    Sensor,
    Provisioning,
    Wifi,
}

impl Subsystem {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::App => "app",
            Self::System => "system",
            Self::Command => "command",
            Self::Settings => "settings",
            Self::Mqtt => "mqtt",
            Self::Telemetry => "telemetry",
            Self::Sensor => "sensor",
            Self::Provisioning => "provisioning",
            Self::Wifi => "wifi",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertRecord {
    /// Wall-clock milliseconds since the epoch (0 before SNTP sync).
    pub timestamp_ms: u64,
    pub code: &'static str,
    pub severity: Severity,
    pub subsystem: Subsystem,
    pub message: heapless::String<MAX_MESSAGE_LEN>,
    /// Structured extras; only JSON objects are kept.
    pub details: Option<Value>,
}

impl AlertRecord {
    pub fn new(
        timestamp_ms: u64,
        code: &'static str,
        severity: Severity,
        subsystem: Subsystem,
        message: &str,
    ) -> Self {
        Self {
            timestamp_ms,
            code,
            severity,
            subsystem,
            message: bounded_message(message),
            details: None,
        }
    }

    /// Threshold and tank alerts: severity `warning`, subsystem `app`.
    pub fn threshold(timestamp_ms: u64, code: &'static str, message: fmt::Arguments<'_>) -> Self {
        let mut msg = heapless::String::<MAX_MESSAGE_LEN>::new();
        // Overflow only truncates the text.
        let _ = msg.write_fmt(message);
        Self {
            timestamp_ms,
            code,
            severity: Severity::Warning,
            subsystem: Subsystem::App,
            message: msg,
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details.is_object().then_some(details);
        self
    }
}

fn bounded_message(text: &str) -> heapless::String<MAX_MESSAGE_LEN> {
    let mut end = text.len().min(MAX_MESSAGE_LEN);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = heapless::String::new();
    // Cannot fail: `end` is within capacity.
    let _ = out.push_str(&text[..end]);
    out
}
