//! Property and fuzz-style tests for robustness of core data structures.
//!
//! Runs on host (x86_64) only: proptest is not available for ESP32 targets.
//! On ESP32, these tests are compiled out.

#![cfg(not(target_os = "espidf"))]

use embedded_hal::delay::DelayNs;
use proptest::prelude::*;
use smartgarden::adapters::mqtt::{MqttSettings, MqttTransport};
use smartgarden::alerts::{AlertRecord, RateLimiter, Severity, Subsystem, Verdict};
use smartgarden::app::commands::fields_from_json;
use smartgarden::app::ports::{AlertSink, Clock, Timestamp};
use smartgarden::app::telemetry::{FieldMask, Metric, Readings, TelemetryRecord};
use smartgarden::app::thresholds::ThresholdMonitor;
use smartgarden::commissioning::fields::Scratch;
use smartgarden::config::{
    Bounds, DeviceSettings, MIN_MEASUREMENT_INTERVAL_SECS, MIN_WATERING_DURATION_SECS, ProvisioningField,
    SettingsPatch,
};
use smartgarden::connectivity::payload::Identity;
use smartgarden::connectivity::{
    ALERT_QUEUE_LEN, ConnectivityLayer, NetEvent, PREINIT_ALERTS_LEN, TELEMETRY_QUEUE_LEN,
};
use smartgarden::watering::clamp_manual;

#[derive(Clone, Copy)]
struct FixedClock;

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        Timestamp {
            monotonic_ms: 1_000,
            wall_ms: 1_700_000_000_000,
        }
    }
}

struct NullDelay;

impl DelayNs for NullDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

#[derive(Default)]
struct Codes(Vec<&'static str>);

impl AlertSink for Codes {
    fn submit(&mut self, alert: AlertRecord) {
        self.0.push(alert.code);
    }
}

// ── Rate limiter accounting ──────────────────────────────────

proptest! {
    /// Every blocked call is reported exactly once: either in the next
    /// `Allowed { suppressed }` or in the running `pending` count.
    #[test]
    fn limiter_never_loses_suppressed_calls(
        cooldown in 1u32..=10_000,
        steps in proptest::collection::vec(0u32..=5_000, 1..=200),
    ) {
        let limiter = RateLimiter::new();
        let mut now = 0u32;
        let mut last_allowed: Option<u32> = None;
        let mut blocked = 0u32;
        let mut reported = 0u32;
        let mut pending = 0u32;

        for step in steps {
            now += step;
            match limiter.allow("sensor.soil_read_failed", now, cooldown) {
                Verdict::Allowed { suppressed } => {
                    if let Some(prev) = last_allowed {
                        prop_assert!(now - prev >= cooldown);
                    }
                    prop_assert_eq!(suppressed, pending);
                    reported += suppressed;
                    pending = 0;
                    last_allowed = Some(now);
                }
                Verdict::Suppressed { pending: p } => {
                    blocked += 1;
                    pending += 1;
                    prop_assert_eq!(p, pending);
                }
            }
        }
        prop_assert_eq!(blocked, reported + pending);
    }

    #[test]
    fn once_fires_a_single_time(key in "[a-z._]{1,80}", calls in 1usize..=10) {
        let limiter = RateLimiter::new();
        let fired = (0..calls).filter(|_| limiter.once(&key)).count();
        prop_assert_eq!(fired, 1);
    }
}

// ── Manual watering clamp ────────────────────────────────────

proptest! {
    #[test]
    fn manual_duration_always_in_range(requested in any::<i64>()) {
        let (used, clamped) = clamp_manual(requested);
        prop_assert!((1..=60).contains(&used));
        prop_assert_eq!(clamped, i64::from(used) != requested);
    }
}

// ── Settings merge ───────────────────────────────────────────

fn arb_f32_bound() -> impl Strategy<Value = Option<f32>> {
    proptest::option::of(-50.0f32..=150.0)
}

prop_compose! {
    fn arb_patch()(
        temp_min in arb_f32_bound(),
        temp_max in arb_f32_bound(),
        hum_min in arb_f32_bound(),
        hum_max in arb_f32_bound(),
        soil_min in proptest::option::of(0i32..=100),
        soil_max in proptest::option::of(0i32..=100),
        light_min in arb_f32_bound(),
        light_max in arb_f32_bound(),
        watering_duration_secs in proptest::option::of(-100i64..=1_000),
        measurement_interval_secs in proptest::option::of(-100i64..=10_000),
    ) -> SettingsPatch {
        SettingsPatch {
            temp_min, temp_max, hum_min, hum_max, soil_min, soil_max,
            light_min, light_max, watering_duration_secs, measurement_interval_secs,
        }
    }
}

fn inverted(s: &DeviceSettings) -> bool {
    s.temperature.is_inverted() || s.humidity.is_inverted() || s.soil.is_inverted() || s.light.is_inverted()
}

proptest! {
    /// Accepted settings never carry an inverted pair and respect the
    /// duration floors; rejected ones always had one.
    #[test]
    fn merged_settings_are_consistent(patches in proptest::collection::vec(arb_patch(), 1..=8)) {
        let mut current = DeviceSettings::default();
        for patch in patches {
            match patch.apply(&current) {
                Ok(next) => {
                    prop_assert!(!inverted(&next));
                    prop_assert!(next.watering_duration_secs >= MIN_WATERING_DURATION_SECS);
                    prop_assert!(next.measurement_interval_secs >= MIN_MEASUREMENT_INTERVAL_SECS);
                    current = next;
                }
                Err(rejected) => prop_assert!(inverted(&rejected.candidate)),
            }
        }
    }

    #[test]
    fn empty_patch_changes_nothing(soil_min in 0i32..=50, soil_max in 50i32..=100, secs in 5u32..=600) {
        let current = DeviceSettings {
            soil: Bounds::new(Some(soil_min), Some(soil_max)),
            measurement_interval_secs: secs,
            ..DeviceSettings::default()
        };
        prop_assert_eq!(SettingsPatch::default().apply(&current), Ok(current));
    }
}

// ── Threshold latching ───────────────────────────────────────

proptest! {
    /// A reading that stays out of range raises its alert once.
    #[test]
    fn steady_excursion_alerts_once(
        temp in -40.0f32..=80.0,
        soil in 0i32..=100,
        repeats in 1usize..=20,
    ) {
        let settings = DeviceSettings {
            temperature: Bounds::new(Some(10.0), Some(30.0)),
            soil: Bounds::new(Some(40), Some(70)),
            ..DeviceSettings::default()
        };
        let readings = Readings {
            air_temperature_c: Some(temp),
            soil_moisture_pct: Some(soil),
            ..Readings::default()
        };
        let mut monitor = ThresholdMonitor::new();
        let mut sink = Codes::default();
        for _ in 0..repeats {
            monitor.evaluate(&readings, &settings, 0, &mut sink);
        }
        for code in &sink.0 {
            prop_assert_eq!(sink.0.iter().filter(|c| *c == code).count(), 1);
        }
        prop_assert_eq!(monitor.active(), sink.0.len());
    }
}

// ── Offline queues ───────────────────────────────────────────

#[derive(Debug, Clone)]
enum NetOp {
    Start,
    Alert,
    Telemetry,
    Connected,
    Disconnected,
}

fn arb_net_op() -> impl Strategy<Value = NetOp> {
    prop_oneof![
        1 => Just(NetOp::Start),
        4 => Just(NetOp::Alert),
        6 => Just(NetOp::Telemetry),
        1 => Just(NetOp::Connected),
        1 => Just(NetOp::Disconnected),
    ]
}

proptest! {
    /// No sequence of events grows a queue past its bound.
    #[test]
    fn offline_queues_stay_bounded(ops in proptest::collection::vec(arb_net_op(), 1..=300)) {
        let limiter = RateLimiter::new();
        let mut layer: ConnectivityLayer<'_, MqttTransport, FixedClock, NullDelay> =
            ConnectivityLayer::new(&limiter, FixedClock, NullDelay);

        for op in ops {
            match op {
                NetOp::Start => {
                    if !layer.is_started() {
                        let transport = MqttTransport::start(&MqttSettings {
                            broker_uri: "mqtt://broker.local",
                            client_id: "24A160C3F2A8",
                            login: "gw",
                            password: "pw",
                        })
                        .unwrap();
                        layer.start(transport, Identity::new("u", "24A160C3F2A8"), FieldMask::ALL);
                    }
                }
                NetOp::Alert => layer.publish_alert(AlertRecord::new(
                    0,
                    "prop.alert",
                    Severity::Info,
                    Subsystem::System,
                    "prop",
                )),
                NetOp::Telemetry => layer.publish_telemetry(TelemetryRecord::new(0, Readings::default())),
                NetOp::Connected => layer.handle_event(NetEvent::Connected),
                NetOp::Disconnected => layer.handle_event(NetEvent::Disconnected),
            }
            prop_assert!(layer.queued_alerts() <= ALERT_QUEUE_LEN);
            prop_assert!(layer.queued_telemetry() <= TELEMETRY_QUEUE_LEN);
            prop_assert!(layer.preinit_alerts() <= PREINIT_ALERTS_LEN);
            if layer.is_connected() && layer.is_started() {
                prop_assert_eq!(layer.queued_telemetry(), 0);
            }
        }
    }
}

// ── Inbound parsing and BLE writes ───────────────────────────

proptest! {
    #[test]
    fn read_selection_is_never_empty(picks in proptest::collection::vec(0usize..8, 0..6)) {
        let names: Vec<&str> = picks
            .iter()
            .map(|&i| Metric::ALL.get(i).map_or("unknown_metric", |m| m.wire_name()))
            .collect();
        let mask = fields_from_json(&serde_json::json!({ "fields": names }));
        prop_assert!(!mask.is_empty());
        for &i in &picks {
            if let Some(&m) = Metric::ALL.get(i) {
                prop_assert!(mask.contains(m));
            }
        }
    }

    /// Arbitrary GATT writes are staged within the field limit.
    #[test]
    fn staged_values_respect_field_limits(
        field_idx in 0usize..ProvisioningField::ALL.len(),
        raw in proptest::collection::vec(any::<u8>(), 0..=200),
    ) {
        let field = ProvisioningField::ALL[field_idx];
        let mut scratch = Scratch::default();
        scratch.write(field, &raw);
        let staged = scratch.get(field).unwrap();
        prop_assert!(staged.len() <= field.max_len());
        prop_assert!(scratch.is_dirty());
    }
}
