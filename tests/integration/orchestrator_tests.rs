//! Measurement cycle and inbound command handling against mock sensors.

use smartgarden::adapters::nvs::NvsAdapter;
use smartgarden::alerts::RateLimiter;
use smartgarden::app::commands::{InboundKind, InboundMessage};
use smartgarden::app::ports::ConfigStore;
use smartgarden::app::service::Orchestrator;
use smartgarden::app::telemetry::{FieldMask, Metric};
use smartgarden::config::{Bounds, DeviceSettings, OFFLINE_INTERVAL_SECS};
use smartgarden::watering::{WaterQueue, WateringLog, WateringSource};

use crate::mock_hw::{FullStorage, ManualClock, MockSensors, RecordingSink};

fn msg(kind: InboundKind, payload: &str) -> InboundMessage {
    InboundMessage::new(kind, payload.as_bytes()).unwrap()
}

fn store_with(settings: DeviceSettings) -> NvsAdapter {
    let mut nvs = NvsAdapter::new().unwrap();
    nvs.save_settings(&settings).unwrap();
    nvs
}

#[test]
fn cycle_publishes_full_telemetry() {
    let limiter = RateLimiter::new();
    let queue = WaterQueue::new();
    let log = WateringLog::new();
    let mut orch = Orchestrator::new(
        MockSensors::new(),
        NvsAdapter::new().unwrap(),
        ManualClock::new(),
        &limiter,
        queue.sender(),
        &log,
    );
    let mut sink = RecordingSink::new();

    orch.run_cycle(&mut sink);

    assert_eq!(orch.cycles(), 1);
    assert_eq!(sink.telemetry.len(), 1);
    let record = &sink.telemetry[0];
    assert_eq!(record.fields, FieldMask::ALL);
    assert_eq!(record.readings.soil_moisture_pct, Some(55));
    assert_eq!(record.readings.water_tank_ok, Some(true));
    assert!(sink.alerts.is_empty());
    assert!(queue.is_empty());
}

#[test]
fn threshold_alert_fires_once_per_excursion() {
    let mut settings = DeviceSettings::default();
    settings.temperature = Bounds::new(None, Some(20.0));
    let limiter = RateLimiter::new();
    let queue = WaterQueue::new();
    let log = WateringLog::new();
    let mut orch = Orchestrator::new(
        MockSensors::new(),
        store_with(settings),
        ManualClock::new(),
        &limiter,
        queue.sender(),
        &log,
    );
    let mut sink = RecordingSink::new();

    orch.run_cycle(&mut sink);
    orch.run_cycle(&mut sink);
    assert_eq!(sink.count("temperature_high"), 1);

    orch.sensors_mut().sample.climate.as_mut().unwrap().temperature_c = 18.0;
    orch.run_cycle(&mut sink);
    orch.sensors_mut().sample.climate.as_mut().unwrap().temperature_c = 25.0;
    orch.run_cycle(&mut sink);
    assert_eq!(sink.count("temperature_high"), 2);
}

#[test]
fn dry_soil_queues_auto_watering_until_cooldown() {
    let mut settings = DeviceSettings::default();
    settings.soil = Bounds::new(Some(30), None);
    let limiter = RateLimiter::new();
    let queue = WaterQueue::new();
    let log = WateringLog::new();
    let clock = ManualClock::new();
    clock.set(10_000);
    let mut orch = Orchestrator::new(
        MockSensors::new().with_soil(12),
        store_with(settings),
        clock.clone(),
        &limiter,
        queue.sender(),
        &log,
    );
    let mut sink = RecordingSink::new();

    orch.run_cycle(&mut sink);
    let cmd = queue.try_receive().unwrap();
    assert_eq!(cmd.source, WateringSource::Auto);
    assert_eq!(cmd.duration_secs, settings.watering_duration_secs);

    log.record_completion(10_000);
    clock.advance(60_000);
    orch.run_cycle(&mut sink);
    assert!(queue.is_empty());
    assert_eq!(sink.count("soil_moisture_low"), 1);
}

#[test]
fn manual_water_is_clamped_and_reported() {
    let limiter = RateLimiter::new();
    let queue = WaterQueue::new();
    let log = WateringLog::new();
    let mut orch = Orchestrator::new(
        MockSensors::new(),
        NvsAdapter::new().unwrap(),
        ManualClock::new(),
        &limiter,
        queue.sender(),
        &log,
    );
    let mut sink = RecordingSink::new();

    orch.handle_inbound(&msg(InboundKind::Water, r#"{"duration":120}"#), &mut sink);

    let cmd = queue.try_receive().unwrap();
    assert_eq!(cmd.duration_secs, 60);
    assert_eq!(cmd.source, WateringSource::Manual);
    let clamped = &sink.alerts[0];
    assert_eq!(clamped.code, "command.watering_duration_clamped");
    let details = clamped.details.as_ref().unwrap();
    assert_eq!(details["requested"], 120);
    assert_eq!(details["used"], 60);
}

#[test]
fn manual_water_with_empty_tank_warns() {
    let limiter = RateLimiter::new();
    let queue = WaterQueue::new();
    let log = WateringLog::new();
    let mut sensors = MockSensors::new();
    sensors.sample.water_low = true;
    let mut orch = Orchestrator::new(sensors, NvsAdapter::new().unwrap(), ManualClock::new(), &limiter, queue.sender(), &log);
    let mut sink = RecordingSink::new();

    orch.handle_inbound(&msg(InboundKind::Water, "{}"), &mut sink);

    assert_eq!(queue.len(), 1);
    assert_eq!(sink.codes(), vec!["water_level_critical"]);
}

#[test]
fn invalid_command_json_is_reported() {
    let limiter = RateLimiter::new();
    let queue = WaterQueue::new();
    let log = WateringLog::new();
    let mut orch = Orchestrator::new(
        MockSensors::new(),
        NvsAdapter::new().unwrap(),
        ManualClock::new(),
        &limiter,
        queue.sender(),
        &log,
    );
    let mut sink = RecordingSink::new();

    orch.handle_inbound(&msg(InboundKind::Water, "{not json"), &mut sink);
    assert!(queue.is_empty());
    assert_eq!(sink.codes(), vec!["command.invalid_json"]);

    // A broken read still reports every metric.
    orch.handle_inbound(&msg(InboundKind::Read, "oops"), &mut sink);
    assert_eq!(sink.telemetry.len(), 1);
    assert_eq!(sink.telemetry[0].fields, FieldMask::ALL);
}

#[test]
fn read_command_selects_fields() {
    let limiter = RateLimiter::new();
    let queue = WaterQueue::new();
    let log = WateringLog::new();
    let mut orch = Orchestrator::new(
        MockSensors::new(),
        NvsAdapter::new().unwrap(),
        ManualClock::new(),
        &limiter,
        queue.sender(),
        &log,
    );
    let mut sink = RecordingSink::new();

    orch.handle_inbound(
        &msg(InboundKind::Read, r#"{"fields":["soil_moisture_pct","light_lux","bogus"]}"#),
        &mut sink,
    );

    let fields = sink.telemetry[0].fields;
    assert!(fields.contains(Metric::SoilMoisture));
    assert!(fields.contains(Metric::Light));
    assert!(!fields.contains(Metric::AirTemperature));
}

#[test]
fn settings_update_persists_and_reloads() {
    let limiter = RateLimiter::new();
    let queue = WaterQueue::new();
    let log = WateringLog::new();
    let nvs = NvsAdapter::new().unwrap();
    let mut orch = Orchestrator::new(MockSensors::new(), nvs.clone(), ManualClock::new(), &limiter, queue.sender(), &log);
    let mut sink = RecordingSink::new();

    orch.handle_inbound(
        &msg(InboundKind::Settings, r#"{"soil_min":25,"measurement_interval_sec":2,"watering_duration_sec":9}"#),
        &mut sink,
    );

    assert!(sink.alerts.is_empty());
    assert_eq!(orch.settings().soil.min, Some(25));
    // Interval floor is 5 s.
    assert_eq!(orch.settings().measurement_interval_secs, 5);
    assert_eq!(orch.settings().watering_duration_secs, 9);
    assert_eq!(nvs.load_settings().unwrap(), *orch.settings());
}

#[test]
fn inverted_bounds_are_rejected() {
    let limiter = RateLimiter::new();
    let queue = WaterQueue::new();
    let log = WateringLog::new();
    let mut orch = Orchestrator::new(
        MockSensors::new(),
        NvsAdapter::new().unwrap(),
        ManualClock::new(),
        &limiter,
        queue.sender(),
        &log,
    );
    let mut sink = RecordingSink::new();

    orch.handle_inbound(&msg(InboundKind::Settings, r#"{"hum_min":80,"hum_max":20}"#), &mut sink);

    assert_eq!(*orch.settings(), DeviceSettings::default());
    assert_eq!(sink.codes(), vec!["settings.rejected"]);
}

#[test]
fn non_object_settings_raise_invalid_json() {
    let limiter = RateLimiter::new();
    let queue = WaterQueue::new();
    let log = WateringLog::new();
    let clock = ManualClock::new();
    let mut orch = Orchestrator::new(
        MockSensors::new(),
        NvsAdapter::new().unwrap(),
        clock.clone(),
        &limiter,
        queue.sender(),
        &log,
    );
    let mut sink = RecordingSink::new();

    orch.handle_inbound(&msg(InboundKind::Settings, "[1,2,3]"), &mut sink);
    assert_eq!(sink.codes(), vec!["settings.invalid_json"]);
    assert_eq!(*orch.settings(), DeviceSettings::default());

    clock.advance(10_000);
    orch.handle_inbound(&msg(InboundKind::Settings, "{broken"), &mut sink);
    assert_eq!(sink.codes(), vec!["settings.invalid_json", "settings.invalid_json"]);
}

#[test]
fn settings_save_failure_keeps_new_values() {
    let limiter = RateLimiter::new();
    let queue = WaterQueue::new();
    let log = WateringLog::new();
    let mut orch = Orchestrator::new(MockSensors::new(), FullStorage, ManualClock::new(), &limiter, queue.sender(), &log);
    let mut sink = RecordingSink::new();

    orch.handle_inbound(&msg(InboundKind::Settings, r#"{"light_max":900}"#), &mut sink);

    assert_eq!(orch.settings().light.max, Some(900.0));
    assert_eq!(sink.codes(), vec!["settings.save_failed"]);
}

#[test]
fn long_offline_stretch_backs_off_sampling() {
    let limiter = RateLimiter::new();
    let queue = WaterQueue::new();
    let log = WateringLog::new();
    let orch = Orchestrator::new(
        MockSensors::new(),
        NvsAdapter::new().unwrap(),
        ManualClock::new(),
        &limiter,
        queue.sender(),
        &log,
    );
    let mut sink = RecordingSink::new();

    assert_eq!(orch.next_interval_secs(&sink), 60);
    sink.buffered = 5;
    assert_eq!(orch.next_interval_secs(&sink), OFFLINE_INTERVAL_SECS);
}
