//! Inter-task channels and the few shared statics.
//!
//! Uses `embassy-sync` bounded channels so callbacks and tasks never share
//! mutable state directly.  Every producer uses `try_send`; a full channel
//! drops the newest item with a warning.  Outbox drops are counted in
//! [`LinkStatus`] and reported by the network task.
//!
//! ```text
//!  MQTT callbacks ──NET_EVENTS──▶ ┌──────────────┐
//!                  ──INBOUND────▶ │ network task │──INBOUND──▶ orchestrator
//!  any task ───────OUTBOX───────▶ │ (owns layer) │──WAKE─────▶ orchestrator
//!                                 └──────────────┘
//!  orchestrator ───WATER_QUEUE──▶ watering worker
//!  GATT callbacks ─RADIO_EVENTS─▶ commissioning task ◀──BUTTON_EVENTS── button task
//! ```

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use log::warn;

use crate::alerts::AlertRecord;
use crate::app::commands::InboundMessage;
use crate::app::ports::{AlertSink, TelemetrySink};
use crate::app::telemetry::TelemetryRecord;
use crate::commissioning::RadioEvent;
use crate::connectivity::NetEvent;
use crate::drivers::button::ButtonPress;
use crate::watering::{WaterQueue, WateringLog};

const NET_EVENTS_DEPTH: usize = 8;
const INBOUND_DEPTH: usize = 4;
pub const OUTBOX_DEPTH: usize = 32;
const RADIO_EVENTS_DEPTH: usize = 8;
const BUTTON_EVENTS_DEPTH: usize = 2;

/// MQTT client callbacks → network task.
pub static NET_EVENTS: Channel<CriticalSectionRawMutex, NetEvent, NET_EVENTS_DEPTH> = Channel::new();

/// Classified inbound messages → orchestrator.
pub static INBOUND: Channel<CriticalSectionRawMutex, InboundMessage, INBOUND_DEPTH> = Channel::new();

/// Alerts and telemetry from every other task → network task.
pub static OUTBOX: Channel<CriticalSectionRawMutex, Outbound, OUTBOX_DEPTH> = Channel::new();

/// GATT callbacks → commissioning task.
pub static RADIO_EVENTS: Channel<CriticalSectionRawMutex, RadioEvent, RADIO_EVENTS_DEPTH> = Channel::new();

/// Button task → commissioning task.
pub static BUTTON_EVENTS: Channel<CriticalSectionRawMutex, ButtonPress, BUTTON_EVENTS_DEPTH> = Channel::new();

/// Orchestrator → watering worker.
pub static WATER_QUEUE: WaterQueue = WaterQueue::new();

/// Written by the watering worker, read by the orchestrator.
pub static WATERING_LOG: WateringLog = WateringLog::new();

/// Cuts the orchestrator's sleep short (reconnect).
pub static ORCHESTRATOR_WAKE: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Link status mirrored by the network task after every step.
pub static LINK: LinkStatus = LinkStatus::new();

// ── Outbound items ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Alert(AlertRecord),
    Telemetry(TelemetryRecord),
}

pub struct LinkStatus {
    connected: AtomicBool,
    consecutive_buffered: AtomicU32,
    outbox_alerts_dropped: AtomicU32,
    outbox_telemetry_dropped: AtomicU32,
}

impl LinkStatus {
    pub const fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            consecutive_buffered: AtomicU32::new(0),
            outbox_alerts_dropped: AtomicU32::new(0),
            outbox_telemetry_dropped: AtomicU32::new(0),
        }
    }

    pub fn update(&self, connected: bool, consecutive_buffered: u32) {
        self.connected.store(connected, Ordering::Relaxed);
        self.consecutive_buffered.store(consecutive_buffered, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn consecutive_buffered(&self) -> u32 {
        self.consecutive_buffered.load(Ordering::Relaxed)
    }

    fn record_outbox_drop(&self, item: &Outbound) {
        let counter = match item {
            Outbound::Alert(_) => &self.outbox_alerts_dropped,
            Outbound::Telemetry(_) => &self.outbox_telemetry_dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Outbox drops since the last call, as `(alerts, telemetry)`.
    pub fn take_outbox_drops(&self) -> (u32, u32) {
        (
            self.outbox_alerts_dropped.swap(0, Ordering::Relaxed),
            self.outbox_telemetry_dropped.swap(0, Ordering::Relaxed),
        )
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Sink handed to tasks that do not own the connectivity layer.
#[derive(Clone, Copy)]
pub struct Outbox {
    channel: &'static Channel<CriticalSectionRawMutex, Outbound, OUTBOX_DEPTH>,
    link: &'static LinkStatus,
}

impl Outbox {
    pub const fn new() -> Self {
        Self::with(&OUTBOX, &LINK)
    }

    pub const fn with(
        channel: &'static Channel<CriticalSectionRawMutex, Outbound, OUTBOX_DEPTH>,
        link: &'static LinkStatus,
    ) -> Self {
        Self { channel, link }
    }

    fn push(&self, item: Outbound) {
        if let Err(embassy_sync::channel::TrySendError::Full(item)) = self.channel.try_send(item) {
            self.link.record_outbox_drop(&item);
            match item {
                Outbound::Alert(a) => warn!("Outbox: full, alert {} dropped", a.code),
                Outbound::Telemetry(_) => warn!("Outbox: full, telemetry dropped"),
            }
        }
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertSink for Outbox {
    fn submit(&mut self, alert: AlertRecord) {
        self.push(Outbound::Alert(alert));
    }
}

impl TelemetrySink for Outbox {
    fn submit_telemetry(&mut self, record: TelemetryRecord) {
        self.push(Outbound::Telemetry(record));
    }

    fn consecutive_buffered(&self) -> u32 {
        self.link.consecutive_buffered()
    }
}
