//! Offline buffering, reconnect drain and the network task's MQTT startup.

use std::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use serde_json::Value;
use smartgarden::adapters::mqtt::{MqttSettings, MqttTransport, SimPublish};
use smartgarden::adapters::wifi::WifiEvent;
use smartgarden::alerts::{AlertRecord, RateLimiter, Severity, Subsystem};
use smartgarden::app::ports::{AlertSink, QoS, TelemetrySink, TransportError};
use smartgarden::app::telemetry::{FieldMask, Metric, Readings, TelemetryRecord};
use smartgarden::channels::{LinkStatus, OUTBOX_DEPTH, Outbound, Outbox};
use smartgarden::config::{ProvisioningConfig, ProvisioningField};
use smartgarden::connectivity::payload::Identity;
use smartgarden::connectivity::{
    ALERT_QUEUE_LEN, ConnectionState, ConnectivityLayer, NetEvent, PREINIT_ALERTS_LEN, TELEMETRY_QUEUE_LEN,
};
use smartgarden::tasks::{NetWake, NetworkTask};

use crate::mock_hw::{ManualClock, NoDelay};

const DEVICE_ID: &str = "24A160C3F2A8";
const USER_ID: &str = "user-1";

type Layer<'a> = ConnectivityLayer<'a, MqttTransport, ManualClock, NoDelay>;

fn transport() -> MqttTransport {
    MqttTransport::start(&MqttSettings {
        broker_uri: "mqtt://broker.local",
        client_id: DEVICE_ID,
        login: "gw",
        password: "secret",
    })
    .unwrap()
}

fn started(limiter: &RateLimiter, clock: ManualClock) -> Layer<'_> {
    let mut layer = ConnectivityLayer::new(limiter, clock, NoDelay::default());
    layer.start(transport(), Identity::new(USER_ID, DEVICE_ID), FieldMask::ALL);
    layer
}

fn alert(code: &'static str) -> AlertRecord {
    AlertRecord::new(1_000, code, Severity::Info, Subsystem::System, "test")
}

fn record(soil: i32) -> TelemetryRecord {
    TelemetryRecord::new(
        2_000,
        Readings {
            soil_moisture_pct: Some(soil),
            ..Readings::default()
        },
    )
}

fn topic(suffix: &str) -> String {
    format!("garden/{}/{}/{}", USER_ID, DEVICE_ID, suffix)
}

fn body(p: &SimPublish) -> Value {
    serde_json::from_slice(&p.payload).unwrap()
}

fn published(layer: &Layer<'_>) -> Vec<SimPublish> {
    layer.transport().unwrap().published().to_vec()
}

fn telemetry_soils(layer: &Layer<'_>) -> Vec<i64> {
    published(layer)
        .iter()
        .filter(|p| p.topic == topic("telemetry"))
        .map(|p| body(p)["sensors"]["soil_moisture_pct"].as_i64().unwrap())
        .collect()
}

fn alert_codes(layer: &Layer<'_>) -> Vec<String> {
    published(layer)
        .iter()
        .filter(|p| p.topic == topic("alert"))
        .map(|p| body(p)["code"].as_str().unwrap_or_default().to_string())
        .collect()
}

// ── Connectivity layer ────────────────────────────────────────

#[test]
fn alerts_before_start_are_replayed_after_connect() {
    let limiter = RateLimiter::new();
    let mut layer: Layer<'_> = ConnectivityLayer::new(&limiter, ManualClock::new(), NoDelay::default());

    layer.publish_alert(alert("boot.a"));
    layer.publish_alert(alert("boot.b"));
    assert_eq!(layer.preinit_alerts(), 2);
    assert!(!layer.is_started());

    layer.start(transport(), Identity::new(USER_ID, DEVICE_ID), FieldMask::ALL);
    assert_eq!(layer.state(), ConnectionState::Connecting);
    layer.handle_event(NetEvent::Connected);

    assert_eq!(layer.preinit_alerts(), 0);
    assert_eq!(alert_codes(&layer), vec!["connection.mqtt_connected", "boot.a", "boot.b"]);
}

#[test]
fn preinit_buffer_is_bounded() {
    let limiter = RateLimiter::new();
    let mut layer: Layer<'_> = ConnectivityLayer::new(&limiter, ManualClock::new(), NoDelay::default());

    for _ in 0..PREINIT_ALERTS_LEN + 3 {
        layer.publish_alert(alert("boot.spam"));
    }
    assert_eq!(layer.preinit_alerts(), PREINIT_ALERTS_LEN);
}

#[test]
fn connect_subscribes_and_publishes_retained_capabilities() {
    let limiter = RateLimiter::new();
    let mut layer = ConnectivityLayer::new(&limiter, ManualClock::new(), NoDelay::default());
    let caps = FieldMask::NONE.with(Metric::SoilMoisture).with(Metric::WaterTank);
    layer.start(transport(), Identity::new(USER_ID, DEVICE_ID), caps);

    layer.handle_event(NetEvent::Connected);

    let t = layer.transport().unwrap();
    assert_eq!(
        t.subscriptions(),
        [topic("command/water"), topic("command/read"), topic("settings")]
    );
    let last = t.published().last().unwrap();
    assert_eq!(last.topic, topic("capabilities"));
    assert!(last.retain);
    assert_eq!(last.qos, QoS::AtLeastOnce);
    let json = body(last);
    assert_eq!(json["device"], DEVICE_ID);
    assert_eq!(json["fields"], serde_json::json!(["soil_moisture_pct", "water_tank_ok"]));
    assert_eq!(json["measured"]["light_lux"], false);
}

#[test]
fn offline_telemetry_is_buffered_then_drained_in_order() {
    let limiter = RateLimiter::new();
    let mut layer = started(&limiter, ManualClock::new());

    for soil in [10, 20, 30] {
        layer.publish_telemetry(record(soil));
    }
    assert!(layer.is_buffering());
    assert_eq!(layer.queued_telemetry(), 3);
    assert_eq!(layer.consecutive_buffered(), 3);
    // The buffering notice waits in the alert queue.
    assert_eq!(layer.queued_alerts(), 1);

    layer.handle_event(NetEvent::Connected);

    assert_eq!(telemetry_soils(&layer), vec![10, 20, 30]);
    assert!(!layer.is_buffering());
    assert_eq!(layer.consecutive_buffered(), 0);
    assert_eq!(layer.queued_telemetry(), 0);
    assert!(alert_codes(&layer).contains(&"telemetry.buffering_started".to_string()));
}

#[test]
fn full_telemetry_queue_drops_newest_and_alerts_once() {
    let limiter = RateLimiter::new();
    let mut layer = started(&limiter, ManualClock::new());

    for i in 0..TELEMETRY_QUEUE_LEN + 2 {
        layer.publish_telemetry(record(i as i32));
    }

    assert_eq!(layer.queued_telemetry(), TELEMETRY_QUEUE_LEN);
    // buffering_started + one rate-limited buffer_full_dropped
    assert_eq!(layer.queued_alerts(), 2);
    assert_eq!(layer.telemetry_dropped(), 1);

    layer.handle_event(NetEvent::Connected);
    let first = published(&layer)
        .into_iter()
        .find(|p| p.topic == topic("telemetry"))
        .unwrap();
    assert_eq!(body(&first)["sensors"]["soil_moisture_pct"], 0);
}

#[test]
fn alert_overflow_is_reported_after_reconnect() {
    let limiter = RateLimiter::new();
    let mut layer = started(&limiter, ManualClock::new());

    for _ in 0..ALERT_QUEUE_LEN + 5 {
        layer.publish_alert(alert("offline.alert"));
    }
    assert_eq!(layer.queued_alerts(), ALERT_QUEUE_LEN);
    assert_eq!(layer.alerts_dropped(), 5);

    layer.handle_event(NetEvent::Connected);

    let sent = published(&layer);
    let overflow = sent
        .iter()
        .filter(|p| p.topic == topic("alert"))
        .map(body)
        .find(|b| b["code"] == "alert.buffer_full_dropped")
        .unwrap();
    assert_eq!(overflow["details"]["dropped"], 5);
    assert_eq!(overflow["details"]["queue_size"], ALERT_QUEUE_LEN);
    assert_eq!(layer.alerts_dropped(), 0);
    assert_eq!(layer.queued_alerts(), 0);
}

#[test]
fn reconnect_reports_every_dropped_record() {
    let limiter = RateLimiter::new();
    let mut layer = started(&limiter, ManualClock::new());
    let overflow = 10;

    for i in 0..TELEMETRY_QUEUE_LEN + overflow {
        layer.publish_telemetry(record(i as i32));
    }
    // Only the first drop got past the cooldown while offline.
    assert_eq!(layer.telemetry_dropped(), overflow as u32 - 1);

    layer.handle_event(NetEvent::Connected);

    let reported: u64 = published(&layer)
        .iter()
        .filter(|p| p.topic == topic("alert"))
        .map(body)
        .filter(|b| b["code"] == "telemetry.buffer_full_dropped")
        .map(|b| b["details"]["dropped"].as_u64().unwrap())
        .sum();
    assert_eq!(reported, overflow as u64);
    assert_eq!(layer.telemetry_dropped(), 0);
}

#[test]
fn new_telemetry_waits_behind_an_interrupted_drain() {
    let limiter = RateLimiter::new();
    let mut layer = started(&limiter, ManualClock::new());
    layer.publish_telemetry(record(10));
    layer.publish_telemetry(record(20));

    layer.transport_mut().unwrap().sim_fail_publish(true);
    layer.handle_event(NetEvent::Connected);
    assert_eq!(layer.queued_telemetry(), 2);

    layer.transport_mut().unwrap().sim_fail_publish(false);
    layer.publish_telemetry(record(30));

    assert_eq!(telemetry_soils(&layer), vec![10, 20, 30]);
    assert_eq!(layer.queued_telemetry(), 0);
}

#[test]
fn rejected_publish_falls_back_to_the_queue() {
    let limiter = RateLimiter::new();
    let mut layer = started(&limiter, ManualClock::new());
    layer.handle_event(NetEvent::Connected);
    layer.transport_mut().unwrap().sim_fail_publish(true);

    layer.publish_telemetry(record(40));
    layer.publish_alert(alert("late.alert"));

    assert_eq!(layer.queued_telemetry(), 1);
    assert!(layer.queued_alerts() >= 1);
}

#[test]
fn alert_payload_carries_legacy_fields() {
    let limiter = RateLimiter::new();
    let mut layer = started(&limiter, ManualClock::new());
    layer.handle_event(NetEvent::Connected);

    layer.publish_alert(alert("custom.code"));

    let last = published(&layer).pop().unwrap();
    assert_eq!(last.qos, QoS::ExactlyOnce);
    assert!(!last.retain);
    let json = body(&last);
    assert_eq!(json["type"], "custom.code");
    assert_eq!(json["code"], "custom.code");
    assert_eq!(json["msg"], "test");
    assert_eq!(json["user"], USER_ID);
    assert_eq!(json["details"], Value::Null);
}

#[test]
fn disconnect_goes_back_to_buffering() {
    let limiter = RateLimiter::new();
    let mut layer = started(&limiter, ManualClock::new());
    layer.handle_event(NetEvent::Connected);

    layer.handle_event(NetEvent::Disconnected);

    assert_eq!(layer.state(), ConnectionState::Disconnected);
    assert_eq!(layer.queued_alerts(), 1);
    layer.publish_telemetry(record(5));
    assert!(layer.is_buffering());
}

// ── Network task ──────────────────────────────────────────────

fn provisioning() -> ProvisioningConfig {
    let mut cfg = ProvisioningConfig::default();
    for (field, value) in [
        (ProvisioningField::Ssid, "GardenNet"),
        (ProvisioningField::Broker, "mqtt://broker.local"),
        (ProvisioningField::MqttLogin, "gw"),
        (ProvisioningField::MqttPassword, "secret"),
        (ProvisioningField::UserId, USER_ID),
    ] {
        cfg.set(field, value).unwrap();
    }
    cfg
}

const GOT_IP: NetWake = NetWake::Wifi(WifiEvent::GotIp { ip: [192, 168, 1, 50] });

#[test]
fn first_ip_starts_mqtt_and_connect_updates_link() {
    let limiter = RateLimiter::new();
    let link = LinkStatus::new();
    let mut task = NetworkTask::new(
        &limiter,
        &link,
        ManualClock::new(),
        NoDelay::default(),
        None,
        provisioning(),
        DEVICE_ID,
        FieldMask::ALL,
        MqttTransport::start,
    );

    task.step(GOT_IP);
    assert!(task.monitor().is_up());
    assert!(task.layer().is_started());
    assert!(!link.is_connected());

    task.step(NetWake::Mqtt(NetEvent::Connected));
    assert!(link.is_connected());
    let t = task.layer().transport().unwrap();
    let got_ip = t
        .published()
        .iter()
        .map(body)
        .find(|b| b["code"] == "wifi.got_ip")
        .unwrap();
    assert_eq!(got_ip["details"]["ip"], "192.168.1.50");
}

#[test]
fn incomplete_credentials_keep_mqtt_stopped() {
    let limiter = RateLimiter::new();
    let link = LinkStatus::new();
    let mut cfg = provisioning();
    cfg.set(ProvisioningField::UserId, "").unwrap();
    let mut task = NetworkTask::new(
        &limiter,
        &link,
        ManualClock::new(),
        NoDelay::default(),
        None,
        cfg,
        DEVICE_ID,
        FieldMask::ALL,
        MqttTransport::start,
    );

    task.step(GOT_IP);
    task.step(NetWake::Tick);

    assert!(!task.layer().is_started());
    assert_eq!(task.layer().preinit_alerts(), 1);
}

#[test]
fn failed_client_start_is_retried_after_backoff() {
    let limiter = RateLimiter::new();
    let link = LinkStatus::new();
    let clock = ManualClock::new();
    let attempts = Cell::new(0u32);
    let mut task = NetworkTask::new(
        &limiter,
        &link,
        clock.clone(),
        NoDelay::default(),
        None,
        provisioning(),
        DEVICE_ID,
        FieldMask::ALL,
        |_: &MqttSettings<'_>| -> Result<MqttTransport, TransportError> {
            attempts.set(attempts.get() + 1);
            Err(TransportError::NotConnected)
        },
    );

    task.step(GOT_IP);
    assert_eq!(attempts.get(), 1);

    clock.advance(10_000);
    task.step(NetWake::Tick);
    assert_eq!(attempts.get(), 1);

    clock.advance(20_000);
    task.step(NetWake::Tick);
    assert_eq!(attempts.get(), 2);
}

#[test]
fn wifi_loss_marks_link_down() {
    let limiter = RateLimiter::new();
    let link = LinkStatus::new();
    let mut task = NetworkTask::new(
        &limiter,
        &link,
        ManualClock::new(),
        NoDelay::default(),
        None,
        provisioning(),
        DEVICE_ID,
        FieldMask::ALL,
        MqttTransport::start,
    );
    task.step(GOT_IP);

    task.step(NetWake::Wifi(WifiEvent::Disconnected { reason: 8 }));

    assert!(!task.monitor().is_up());
    assert_eq!(task.monitor().ip(), None);
    // got_ip went to the pre-init buffer before the client existed;
    // the disconnect lands in the offline queue.
    assert_eq!(task.layer().queued_alerts(), 1);
}

static BURST_OUTBOX: Channel<CriticalSectionRawMutex, Outbound, OUTBOX_DEPTH> = Channel::new();
static BURST_LINK: LinkStatus = LinkStatus::new();

#[test]
fn outbox_overflow_is_reported_on_the_next_tick() {
    let limiter = RateLimiter::new();
    let mut task = NetworkTask::new(
        &limiter,
        &BURST_LINK,
        ManualClock::new(),
        NoDelay::default(),
        None,
        provisioning(),
        DEVICE_ID,
        FieldMask::ALL,
        MqttTransport::start,
    );
    task.step(GOT_IP);
    task.step(NetWake::Mqtt(NetEvent::Connected));

    let mut outbox = Outbox::with(&BURST_OUTBOX, &BURST_LINK);
    for _ in 0..OUTBOX_DEPTH + 4 {
        outbox.submit(alert("burst.alert"));
    }
    task.step(NetWake::Tick);

    let report = task
        .layer()
        .transport()
        .unwrap()
        .published()
        .iter()
        .map(body)
        .find(|b| b["code"] == "alert.buffer_full_dropped")
        .unwrap();
    assert_eq!(report["details"]["dropped"], 4);
    assert_eq!(task.layer().alerts_dropped(), 0);
}
