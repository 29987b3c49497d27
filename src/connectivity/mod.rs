//! Connectivity layer: offline buffering and reconnect reconciliation.
//!
//! ```text
//!  producers ──▶ publish_alert / publish_telemetry
//!                      │
//!        ┌─────────────┼───────────────────────────────┐
//!        │ client not  │ Connected        otherwise    │
//!        │ started     │                               │
//!        ▼             ▼                  ▼            │
//!   pre-init (12)   transport ◀── drain ─ alert (20)   │
//!                       ▲       on        telemetry(50)│
//!                       └────── connect ───────────────┘
//! ```
//!
//! The layer is owned by the network task.  MQTT client callbacks never
//! touch it directly; they post [`NetEvent`]s which the task feeds into
//! [`ConnectivityLayer::handle_event`].  Queues are bounded and drop the
//! *newest* item when full, counting every drop for a later alert.
//!
//! ## Reconnect sequence
//!
//! 1. `connection.mqtt_connected` alert
//! 2. subscribe to `command/water`, `command/read`, `settings`
//! 3. move the pre-init buffer into the alert queue
//! 4. drain alerts oldest-first, 20 ms apart
//! 5. report alerts dropped while offline
//! 6. drain telemetry oldest-first, 50 ms apart
//! 7. report telemetry still counted as dropped
//! 8. publish the retained capability descriptor
//!
//! The reconnect reports bypass the alert cooldown, so every drop is
//! accounted for in some `*.buffer_full_dropped` alert.

pub mod availability;
pub mod payload;

use embedded_hal::delay::DelayNs;
use heapless::Deque;
use log::{error, info, warn};
use serde_json::{Value, json};

use crate::alerts::{AlertRecord, COOLDOWN_1MIN, COOLDOWN_5MIN, RateLimiter, Severity, Subsystem, Verdict};
use crate::app::ports::{AlertSink, Clock, QoS, TelemetrySink, TransportError, TransportPort};
use crate::app::telemetry::{FieldMask, TelemetryRecord};
use payload::{Identity, SUBSCRIPTIONS, TOPIC_ALERT, TOPIC_CAPABILITIES, TOPIC_TELEMETRY};

pub const TELEMETRY_QUEUE_LEN: usize = 50;
pub const ALERT_QUEUE_LEN: usize = 20;
pub const PREINIT_ALERTS_LEN: usize = 12;

const ALERT_DRAIN_PACING_MS: u32 = 20;
const TELEMETRY_DRAIN_PACING_MS: u32 = 50;

const ALERT_DROPS_CODE: &str = "alert.buffer_full_dropped";
const TELEMETRY_DROPS_CODE: &str = "telemetry.buffer_full_dropped";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// What the MQTT client reported.  Produced from client callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetEvent {
    Connecting,
    Connected,
    Disconnected,
    Error,
    /// An inbound message could not be handed to the orchestrator.
    InboundDropped { topic_len: usize, payload_len: usize },
}

pub struct ConnectivityLayer<'a, T, C, D> {
    /// `None` until [`start`](Self::start); alerts go to the pre-init buffer.
    transport: Option<T>,
    clock: C,
    delay: D,
    limiter: &'a RateLimiter,
    identity: Identity,
    capabilities: FieldMask,
    state: ConnectionState,
    telemetry: Deque<TelemetryRecord, TELEMETRY_QUEUE_LEN>,
    alerts: Deque<AlertRecord, ALERT_QUEUE_LEN>,
    preinit: heapless::Vec<AlertRecord, PREINIT_ALERTS_LEN>,
    buffering: bool,
    telemetry_dropped: u32,
    alerts_dropped: u32,
    consecutive_buffered: u32,
}

impl<'a, T, C, D> ConnectivityLayer<'a, T, C, D>
where
    T: TransportPort,
    C: Clock,
    D: DelayNs,
{
    pub fn new(limiter: &'a RateLimiter, clock: C, delay: D) -> Self {
        Self {
            transport: None,
            clock,
            delay,
            limiter,
            identity: Identity::default(),
            capabilities: FieldMask::NONE,
            state: ConnectionState::Disconnected,
            telemetry: Deque::new(),
            alerts: Deque::new(),
            preinit: heapless::Vec::new(),
            buffering: false,
            telemetry_dropped: 0,
            alerts_dropped: 0,
            consecutive_buffered: 0,
        }
    }

    /// Attach a started MQTT client.  Called only once broker, user id and
    /// both MQTT credentials are known.
    pub fn start(&mut self, transport: T, identity: Identity, capabilities: FieldMask) {
        info!(
            "MQTT: client started for garden/{}/{}",
            identity.user_id, identity.device_id
        );
        self.transport = Some(transport);
        self.identity = identity;
        self.capabilities = capabilities;
        self.state = ConnectionState::Connecting;
    }

    // ── Accessors ────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_started(&self) -> bool {
        self.transport.is_some()
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    pub fn queued_telemetry(&self) -> usize {
        self.telemetry.len()
    }

    pub fn queued_alerts(&self) -> usize {
        self.alerts.len()
    }

    pub fn preinit_alerts(&self) -> usize {
        self.preinit.len()
    }

    pub fn telemetry_dropped(&self) -> u32 {
        self.telemetry_dropped
    }

    pub fn alerts_dropped(&self) -> u32 {
        self.alerts_dropped
    }

    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    pub fn transport_mut(&mut self) -> Option<&mut T> {
        self.transport.as_mut()
    }

    // ── Events ───────────────────────────────────────────────

    pub fn handle_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::Connecting => {
                if self.state == ConnectionState::Disconnected {
                    self.state = ConnectionState::Connecting;
                }
            }
            NetEvent::Connected => self.on_connected(),
            NetEvent::Disconnected => {
                info!("MQTT: disconnected");
                self.state = ConnectionState::Disconnected;
                self.raise(
                    "connection.mqtt_disconnected",
                    COOLDOWN_1MIN,
                    Severity::Warning,
                    Subsystem::Mqtt,
                    "MQTT disconnected",
                    |suppressed| json!({ "suppressed": suppressed }),
                );
            }
            NetEvent::Error => {
                error!("MQTT: error event");
                self.raise(
                    "connection.mqtt_error",
                    COOLDOWN_1MIN,
                    Severity::Error,
                    Subsystem::Mqtt,
                    "MQTT error event",
                    |suppressed| json!({ "suppressed": suppressed }),
                );
            }
            NetEvent::InboundDropped { topic_len, payload_len } => {
                warn!("MQTT: inbound message dropped ({} B topic, {} B payload)", topic_len, payload_len);
                self.raise(
                    "mqtt.inbound_dropped",
                    COOLDOWN_1MIN,
                    Severity::Error,
                    Subsystem::Mqtt,
                    "Dropped inbound MQTT message",
                    |suppressed| {
                        json!({ "topic_len": topic_len, "payload_len": payload_len, "suppressed": suppressed })
                    },
                );
            }
        }
    }

    fn on_connected(&mut self) {
        info!("MQTT: connected");
        self.state = ConnectionState::Connected;

        self.raise(
            "connection.mqtt_connected",
            COOLDOWN_1MIN,
            Severity::Info,
            Subsystem::Mqtt,
            "MQTT connected",
            |suppressed| json!({ "suppressed": suppressed }),
        );

        if let Some(transport) = self.transport.as_mut() {
            for suffix in SUBSCRIPTIONS {
                let topic = self.identity.topic(suffix);
                match transport.subscribe(&topic, QoS::AtLeastOnce) {
                    Ok(()) => info!("MQTT: subscribed {}", topic),
                    Err(e) => warn!("MQTT: subscribe {} failed: {}", topic, e),
                }
            }
        }

        for alert in core::mem::take(&mut self.preinit) {
            self.enqueue_alert(alert);
        }

        self.drain_alerts();

        self.report_alert_drops(true);

        self.buffering = false;
        self.drain_telemetry();
        self.report_telemetry_drops(true);
        self.publish_capabilities();
        self.consecutive_buffered = 0;
    }

    // ── Alerts ───────────────────────────────────────────────

    pub fn publish_alert(&mut self, alert: AlertRecord) {
        if self.transport.is_none() {
            if self.preinit.push(alert).is_err() {
                warn!("MQTT: pre-init alert buffer full, alert dropped");
            }
            return;
        }

        if self.is_connected() {
            if let Err((alert, e)) = self.send_alert(alert) {
                warn!("MQTT: alert publish failed ({}), buffering", e);
                self.enqueue_alert(alert);
            }
            return;
        }

        self.enqueue_alert(alert);
    }

    fn enqueue_alert(&mut self, alert: AlertRecord) {
        if self.alerts.push_back(alert).is_err() {
            self.alerts_dropped = self.alerts_dropped.saturating_add(1);
            warn!("MQTT: alert queue full ({} dropped)", self.alerts_dropped);
        }
    }

    fn send_alert(&mut self, alert: AlertRecord) -> Result<(), (AlertRecord, TransportError)> {
        let Some(transport) = self.transport.as_mut() else {
            return Err((alert, TransportError::NotConnected));
        };
        let topic = self.identity.topic(TOPIC_ALERT);
        let body = payload::alert_json(&self.identity, &alert).to_string();
        transport
            .publish(&topic, body.as_bytes(), QoS::ExactlyOnce, false)
            .map_err(|e| (alert, e))
    }

    fn drain_alerts(&mut self) {
        if self.alerts.is_empty() {
            return;
        }
        info!("MQTT: sending {} buffered alerts", self.alerts.len());
        while let Some(alert) = self.alerts.pop_front() {
            if let Err((alert, e)) = self.send_alert(alert) {
                warn!("MQTT: drain interrupted: {}", e);
                // Cannot fail: one slot was just freed.
                let _ = self.alerts.push_front(alert);
                return;
            }
            self.delay.delay_ms(ALERT_DRAIN_PACING_MS);
        }
    }

    /// Rate-limited internal alert; `details` receives the suppressed count.
    fn raise(
        &mut self,
        code: &'static str,
        cooldown_ms: u32,
        severity: Severity,
        subsystem: Subsystem,
        message: &str,
        details: impl FnOnce(u32) -> Value,
    ) {
        let now = self.clock.now();
        if let Verdict::Allowed { suppressed } = self.limiter.allow(code, now.monotonic_ms, cooldown_ms) {
            let alert = AlertRecord::new(now.wall_ms, code, severity, subsystem, message)
                .with_details(details(suppressed));
            self.publish_alert(alert);
        }
    }

    // ── Drop accounting ──────────────────────────────────────

    /// Count items lost before they reached the layer, e.g. on a full
    /// outbox channel.  Reported together with local queue drops.
    pub fn record_upstream_drops(&mut self, alerts: u32, telemetry: u32) {
        self.alerts_dropped = self.alerts_dropped.saturating_add(alerts);
        self.telemetry_dropped = self.telemetry_dropped.saturating_add(telemetry);
    }

    /// Periodic housekeeping while connected: retry an interrupted drain
    /// and report drop counts the cooldown held back.
    pub fn service(&mut self) {
        if !self.is_connected() {
            return;
        }
        self.drain_alerts();
        self.drain_telemetry();
        self.report_alert_drops(false);
        self.report_telemetry_drops(false);
    }

    fn report_alert_drops(&mut self, force: bool) {
        if self.alerts_dropped == 0 {
            return;
        }
        let Some((wall_ms, suppressed)) = self.drop_report_slot(ALERT_DROPS_CODE, force) else {
            return;
        };
        let dropped = core::mem::take(&mut self.alerts_dropped);
        let alert = AlertRecord::new(
            wall_ms,
            ALERT_DROPS_CODE,
            Severity::Error,
            Subsystem::Mqtt,
            &format!("Dropped {} alerts while offline", dropped),
        )
        .with_details(json!({ "dropped": dropped, "queue_size": ALERT_QUEUE_LEN, "suppressed": suppressed }));
        self.publish_alert(alert);
    }

    fn report_telemetry_drops(&mut self, force: bool) {
        if self.telemetry_dropped == 0 {
            return;
        }
        let Some((wall_ms, suppressed)) = self.drop_report_slot(TELEMETRY_DROPS_CODE, force) else {
            return;
        };
        let dropped = core::mem::take(&mut self.telemetry_dropped);
        let alert = AlertRecord::new(
            wall_ms,
            TELEMETRY_DROPS_CODE,
            Severity::Error,
            Subsystem::Telemetry,
            "Telemetry dropped: offline queue full",
        )
        .with_details(json!({ "dropped": dropped, "queue_size": TELEMETRY_QUEUE_LEN, "suppressed": suppressed }));
        self.publish_alert(alert);
    }

    /// A forced report (reconnect) bypasses the cooldown so no pending
    /// count is left behind; otherwise the count waits for the next slot.
    fn drop_report_slot(&self, code: &str, force: bool) -> Option<(u64, u32)> {
        let now = self.clock.now();
        if force {
            return Some((now.wall_ms, self.limiter.force(code, now.monotonic_ms)));
        }
        match self.limiter.allow(code, now.monotonic_ms, COOLDOWN_1MIN) {
            Verdict::Allowed { suppressed } => Some((now.wall_ms, suppressed)),
            Verdict::Suppressed { .. } => None,
        }
    }

    // ── Telemetry ────────────────────────────────────────────

    pub fn publish_telemetry(&mut self, record: TelemetryRecord) {
        // A backlog left by an interrupted drain goes out first.
        if self.is_connected() && !self.telemetry.is_empty() {
            self.drain_telemetry();
        }
        if self.is_connected() && self.telemetry.is_empty() {
            match self.send_telemetry(&record) {
                Ok(()) => {
                    self.consecutive_buffered = 0;
                    return;
                }
                Err(e) => warn!("MQTT: telemetry publish failed ({}), buffering", e),
            }
        }
        self.buffer_telemetry(record);
    }

    fn buffer_telemetry(&mut self, record: TelemetryRecord) {
        self.consecutive_buffered = self.consecutive_buffered.saturating_add(1);

        if !self.buffering {
            self.buffering = true;
            self.raise(
                "telemetry.buffering_started",
                COOLDOWN_5MIN,
                Severity::Warning,
                Subsystem::Telemetry,
                "MQTT offline. Buffering telemetry.",
                |suppressed| json!({ "queue_size": TELEMETRY_QUEUE_LEN, "suppressed": suppressed }),
            );
        }

        if self.telemetry.push_back(record).is_ok() {
            warn!("MQTT: offline, telemetry buffered ({} queued)", self.telemetry.len());
            return;
        }

        self.telemetry_dropped = self.telemetry_dropped.saturating_add(1);
        error!("MQTT: offline telemetry queue full");
        self.report_telemetry_drops(false);
    }

    fn send_telemetry(&mut self, record: &TelemetryRecord) -> Result<(), TransportError> {
        let transport = self.transport.as_mut().ok_or(TransportError::NotConnected)?;
        let topic = self.identity.topic(TOPIC_TELEMETRY);
        let body = payload::telemetry_json(&self.identity, record).to_string();
        transport.publish(&topic, body.as_bytes(), QoS::AtLeastOnce, false)
    }

    fn drain_telemetry(&mut self) {
        if self.telemetry.is_empty() {
            return;
        }
        info!("MQTT: sending {} buffered telemetry records", self.telemetry.len());
        while let Some(record) = self.telemetry.pop_front() {
            if let Err(e) = self.send_telemetry(&record) {
                warn!("MQTT: drain interrupted: {}", e);
                let _ = self.telemetry.push_front(record);
                return;
            }
            self.delay.delay_ms(TELEMETRY_DRAIN_PACING_MS);
        }
    }

    // ── Capabilities ─────────────────────────────────────────

    pub fn publish_capabilities(&mut self) {
        if !self.identity.is_complete() {
            return;
        }
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let topic = self.identity.topic(TOPIC_CAPABILITIES);
        let body = payload::capabilities_json(&self.identity, self.clock.now().wall_ms, self.capabilities)
            .to_string();
        if let Err(e) = transport.publish(&topic, body.as_bytes(), QoS::AtLeastOnce, true) {
            warn!("MQTT: capabilities publish failed: {}", e);
        }
    }
}

impl<T: TransportPort, C: Clock, D: DelayNs> AlertSink for ConnectivityLayer<'_, T, C, D> {
    fn submit(&mut self, alert: AlertRecord) {
        self.publish_alert(alert);
    }
}

impl<T: TransportPort, C: Clock, D: DelayNs> TelemetrySink for ConnectivityLayer<'_, T, C, D> {
    fn submit_telemetry(&mut self, record: TelemetryRecord) {
        self.publish_telemetry(record);
    }

    fn consecutive_buffered(&self) -> u32 {
        self.consecutive_buffered
    }
}
