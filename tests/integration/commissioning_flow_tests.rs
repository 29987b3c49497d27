//! End-to-end BLE commissioning: window, field writes, commit, restart.

use smartgarden::adapters::ble::decode_write;
use smartgarden::adapters::nvs::NvsAdapter;
use smartgarden::alerts::RateLimiter;
use smartgarden::app::ports::{ConfigStore, StoragePort};
use smartgarden::commissioning::fields::Characteristic;
use smartgarden::commissioning::{Commissioning, CommissioningState, Input, RESTART_GRACE_MS, RadioEvent, WINDOW_MS};
use smartgarden::config::ProvisioningField;
use smartgarden::restart::{RESTART_KEY, RESTART_NAMESPACE};

use crate::mock_hw::{ManualClock, MockRadio, MockRestart, RecordingSink};

const DEVICE_ID: &str = "24A160C3F2A8";

type Machine<'a> = Commissioning<'a, MockRadio, NvsAdapter, MockRestart, ManualClock>;

fn machine<'a>(nvs: &NvsAdapter, clock: &ManualClock, limiter: &'a RateLimiter) -> Machine<'a> {
    Commissioning::new(
        MockRadio::default(),
        nvs.clone(),
        MockRestart::default(),
        clock.clone(),
        limiter,
        DEVICE_ID,
    )
}

fn write(ch: Characteristic, value: &str) -> Input {
    Input::Radio(decode_write(ch, value.as_bytes()).unwrap())
}

fn commit() -> Input {
    Input::Radio(decode_write(Characteristic::Control, &[0x01]).unwrap())
}

fn provision(nvs: &mut NvsAdapter) {
    for (field, value) in [
        (ProvisioningField::Ssid, "GardenNet"),
        (ProvisioningField::Broker, "mqtt://broker.local"),
        (ProvisioningField::MqttLogin, "gw"),
        (ProvisioningField::MqttPassword, "secret"),
        (ProvisioningField::UserId, "user-1"),
    ] {
        nvs.save_provisioning_field(field, value).unwrap();
    }
}

#[test]
fn unprovisioned_boot_opens_window() {
    let nvs = NvsAdapter::new().unwrap();
    let clock = ManualClock::new();
    let limiter = RateLimiter::new();
    let mut m = machine(&nvs, &clock, &limiter);
    let mut sink = RecordingSink::new();

    assert!(!m.boot(&mut sink));

    assert_eq!(m.state(), CommissioningState::AdvertisingOpen);
    assert!(m.radio().advertising);
    assert_eq!(m.window_deadline_ms(), Some(WINDOW_MS));
    assert_eq!(m.radio().read_value(Characteristic::DeviceId), Some(DEVICE_ID));
    assert_eq!(m.radio().read_value(Characteristic::Ssid), Some(""));
    assert_eq!(sink.codes(), vec!["provisioning.incomplete"]);
}

#[test]
fn provisioned_boot_stays_quiet() {
    let mut nvs = NvsAdapter::new().unwrap();
    provision(&mut nvs);
    let clock = ManualClock::new();
    let limiter = RateLimiter::new();
    let mut m = machine(&nvs, &clock, &limiter);
    let mut sink = RecordingSink::new();

    assert!(m.boot(&mut sink));
    assert_eq!(m.state(), CommissioningState::Idle);
    assert!(!m.radio().advertising);
    assert!(sink.alerts.is_empty());
}

#[test]
fn full_commissioning_session_persists_and_restarts() {
    let nvs = NvsAdapter::new().unwrap();
    let clock = ManualClock::new();
    let limiter = RateLimiter::new();
    let mut m = machine(&nvs, &clock, &limiter);
    let mut sink = RecordingSink::new();
    m.boot(&mut sink);

    m.handle(Input::Radio(RadioEvent::PeerConnected), &mut sink);
    assert_eq!(m.state(), CommissioningState::ClientConnected);
    assert_eq!(m.window_deadline_ms(), None);

    m.handle(write(Characteristic::Ssid, "GardenNet"), &mut sink);
    m.handle(write(Characteristic::Password, "hunter22"), &mut sink);
    m.handle(write(Characteristic::Broker, "mqtt://broker.local"), &mut sink);
    m.handle(write(Characteristic::MqttLogin, "gw"), &mut sink);
    m.handle(write(Characteristic::MqttPassword, "secret"), &mut sink);
    m.handle(write(Characteristic::UserId, "user-1"), &mut sink);
    m.handle(commit(), &mut sink);

    assert_eq!(m.state(), CommissioningState::Done);
    assert!(!m.radio().advertising);
    assert_eq!(m.radio().disconnects, 1);
    let cfg = nvs.load_provisioning();
    assert!(cfg.is_fully_provisioned());
    assert_eq!(cfg.password.as_str(), "hunter22");
    assert!(nvs.exists(RESTART_NAMESPACE, RESTART_KEY));

    m.handle(Input::Radio(RadioEvent::PeerDisconnected), &mut sink);
    m.handle(Input::Tick, &mut sink);
    assert_eq!(m.restarter().restarts, 0);

    clock.advance(RESTART_GRACE_MS);
    m.handle(Input::Tick, &mut sink);
    assert_eq!(m.restarter().restarts, 1);

    // Next boot reports why the device restarted.
    let mut next = machine(&nvs, &clock, &limiter);
    let mut boot_sink = RecordingSink::new();
    assert!(next.boot(&mut boot_sink));
    assert_eq!(boot_sink.codes(), vec!["provisioning.completed"]);
}

#[test]
fn window_times_out_without_a_peer() {
    let nvs = NvsAdapter::new().unwrap();
    let clock = ManualClock::new();
    let limiter = RateLimiter::new();
    let mut m = machine(&nvs, &clock, &limiter);
    let mut sink = RecordingSink::new();
    m.boot(&mut sink);

    clock.advance(WINDOW_MS - 1);
    m.handle(Input::Tick, &mut sink);
    assert_eq!(m.state(), CommissioningState::AdvertisingOpen);

    clock.advance(1);
    m.handle(Input::Tick, &mut sink);
    assert_eq!(m.state(), CommissioningState::Idle);
    assert!(!m.radio().advertising);
    assert_eq!(sink.count("provisioning.timeout"), 1);

    // A click reopens it.
    m.handle(Input::Button, &mut sink);
    assert_eq!(m.state(), CommissioningState::AdvertisingOpen);
    assert_eq!(m.radio().adv_starts, 2);
}

#[test]
fn peer_leaving_early_reopens_the_window() {
    let nvs = NvsAdapter::new().unwrap();
    let clock = ManualClock::new();
    let limiter = RateLimiter::new();
    let mut m = machine(&nvs, &clock, &limiter);
    let mut sink = RecordingSink::new();
    m.boot(&mut sink);

    m.handle(Input::Radio(RadioEvent::PeerConnected), &mut sink);
    clock.advance(5_000);
    m.handle(Input::Radio(RadioEvent::ConnectionClosed), &mut sink);

    assert_eq!(m.state(), CommissioningState::AdvertisingOpen);
    assert_eq!(m.window_deadline_ms(), Some(5_000 + WINDOW_MS));
    // A second close for the same link changes nothing.
    m.handle(Input::Radio(RadioEvent::PeerDisconnected), &mut sink);
    assert_eq!(m.state(), CommissioningState::AdvertisingOpen);
}

#[test]
fn repeated_peer_connect_is_idempotent() {
    let nvs = NvsAdapter::new().unwrap();
    let clock = ManualClock::new();
    let limiter = RateLimiter::new();
    let mut m = machine(&nvs, &clock, &limiter);
    let mut sink = RecordingSink::new();
    m.boot(&mut sink);
    m.handle(Input::Radio(RadioEvent::PeerConnected), &mut sink);
    let alerts_before = sink.alerts.len();

    clock.advance(3_000);
    m.handle(Input::Radio(RadioEvent::PeerConnected), &mut sink);

    assert_eq!(m.state(), CommissioningState::ClientConnected);
    assert_eq!(m.window_deadline_ms(), None);
    assert_eq!(m.radio().adv_starts, 1);
    assert!(!m.restart_pending());
    assert_eq!(sink.alerts.len(), alerts_before);

    // The window still does not expire under a connected peer.
    clock.advance(WINDOW_MS);
    m.handle(Input::Tick, &mut sink);
    assert_eq!(m.state(), CommissioningState::ClientConnected);
}

#[test]
fn commit_without_writes_is_ignored() {
    let nvs = NvsAdapter::new().unwrap();
    let clock = ManualClock::new();
    let limiter = RateLimiter::new();
    let mut m = machine(&nvs, &clock, &limiter);
    let mut sink = RecordingSink::new();
    m.boot(&mut sink);
    m.handle(Input::Radio(RadioEvent::PeerConnected), &mut sink);

    m.handle(commit(), &mut sink);

    assert_eq!(m.state(), CommissioningState::ClientConnected);
    assert!(!m.restart_pending());
}

#[test]
fn commit_of_only_empty_values_is_ignored() {
    let nvs = NvsAdapter::new().unwrap();
    let clock = ManualClock::new();
    let limiter = RateLimiter::new();
    let mut m = machine(&nvs, &clock, &limiter);
    let mut sink = RecordingSink::new();
    m.boot(&mut sink);
    m.handle(Input::Radio(RadioEvent::PeerConnected), &mut sink);

    m.handle(write(Characteristic::Ssid, ""), &mut sink);
    m.handle(write(Characteristic::UserId, ""), &mut sink);
    m.handle(commit(), &mut sink);

    assert_eq!(m.state(), CommissioningState::ClientConnected);
    assert!(!m.restart_pending());
    assert!(!nvs.exists(RESTART_NAMESPACE, RESTART_KEY));
    assert_eq!(m.radio().disconnects, 0);

    // A real value afterwards still commits.
    m.handle(write(Characteristic::Ssid, "GardenNet"), &mut sink);
    m.handle(commit(), &mut sink);
    assert_eq!(m.state(), CommissioningState::Done);
}

#[test]
fn click_while_peer_connected_changes_nothing() {
    let nvs = NvsAdapter::new().unwrap();
    let clock = ManualClock::new();
    let limiter = RateLimiter::new();
    let mut m = machine(&nvs, &clock, &limiter);
    let mut sink = RecordingSink::new();
    m.boot(&mut sink);
    m.handle(Input::Radio(RadioEvent::PeerConnected), &mut sink);

    m.handle(Input::Button, &mut sink);

    assert_eq!(m.state(), CommissioningState::ClientConnected);
    assert_eq!(m.radio().adv_starts, 1);
}

#[test]
fn button_hold_factory_resets() {
    let mut nvs = NvsAdapter::new().unwrap();
    provision(&mut nvs);
    let clock = ManualClock::new();
    let limiter = RateLimiter::new();
    let mut m = machine(&nvs, &clock, &limiter);
    let mut sink = RecordingSink::new();
    assert!(m.boot(&mut sink));

    m.handle(Input::ButtonHeld, &mut sink);

    assert_eq!(m.restarter().restarts, 1);
    assert!(!nvs.load_provisioning().is_fully_provisioned());

    let mut next = machine(&nvs, &clock, &limiter);
    let mut boot_sink = RecordingSink::new();
    assert!(!next.boot(&mut boot_sink));
    assert_eq!(boot_sink.codes(), vec!["system.factory_reset", "provisioning.incomplete"]);
}
