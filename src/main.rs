//! Smart Garden Firmware: Main Entry Point
//!
//! Boots the peripherals, runs the commissioning check, then hands every
//! long-lived component to its task thread.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SensorHub      PumpDriver    NvsAdapter     SystemClock       │
//! │  (SensorPort)   (PumpPort)    (ConfigStore)  (Clock)           │
//! │  BleRadio       MqttTransport WifiStation    SystemRestart     │
//! │  (RadioPort)    (Transport)   (link events)  (RestartPort)     │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │ Orchestrator · ConnectivityLayer · Commissioning       │    │
//! │  │ WateringWorker                                         │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::Result;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::delay::{Delay, FreeRtos};
use esp_idf_svc::hal::gpio::{PinDriver, Pull};
use esp_idf_svc::hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::prelude::*;
use log::{error, info, warn};

use smartgarden::adapters::ble::BleRadio;
use smartgarden::adapters::device_id;
use smartgarden::adapters::mqtt::MqttTransport;
use smartgarden::adapters::nvs::NvsAdapter;
use smartgarden::adapters::system::SystemRestart;
use smartgarden::adapters::time::SystemClock;
use smartgarden::adapters::wifi::WifiStation;
use smartgarden::alerts::ALERT_LIMITER;
use smartgarden::app::ports::ConfigStore;
use smartgarden::channels::Outbox;
use smartgarden::commissioning::Commissioning;
use smartgarden::drivers::button::ButtonDriver;
use smartgarden::drivers::hw_init;
use smartgarden::drivers::pump::PumpDriver;
use smartgarden::error::Error;
use smartgarden::pins;
use smartgarden::sensors::SensorHub;
use smartgarden::tasks;

const UNPROVISIONED_RETRY_MS: u32 = 10_000;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Smart Garden v{}                  ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Peripherals and storage ────────────────────────────
    hw_init::init_peripherals().map_err(Error::from)?;
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = NvsAdapter::new().map_err(Error::from)?;

    let mac = device_id::read_mac();
    let dev_id = device_id::device_id(&mac);
    info!("Device ID: {}", dev_id);

    // ── 3. Sensors and actuators ──────────────────────────────
    let i2c = I2cDriver::new(
        peripherals.i2c0,
        peripherals.pins.gpio21,
        peripherals.pins.gpio22,
        &I2cConfig::new().baudrate(pins::I2C_FREQ_HZ.Hz().into()),
    )?;
    let sensors = SensorHub::new(i2c, Delay::new_default());
    let capabilities = sensors.available_fields();
    info!("Sensors: available {:?}", capabilities);

    let pump = PumpDriver::new();

    let mut button_pin = PinDriver::input(peripherals.pins.gpio0)?;
    button_pin.set_pull(Pull::Up)?;

    // ── 4. Commissioning ──────────────────────────────────────
    let radio = BleRadio::new().map_err(Error::from)?;
    let mut commissioning = Commissioning::new(
        radio,
        nvs.clone(),
        SystemRestart::new(),
        SystemClock::new(),
        &ALERT_LIMITER,
        &dev_id,
    );
    let provisioned = commissioning.boot(&mut Outbox::new());
    let provisioning = nvs.load_provisioning();

    let mut handles = vec![
        tasks::spawn_commissioning(commissioning)?,
        tasks::spawn_button(ButtonDriver::new(button_pin))?,
    ];

    // ── 5. Network ────────────────────────────────────────────
    let station = if provisioning.ssid.is_empty() {
        None
    } else {
        match WifiStation::start(peripherals.modem, sysloop, &provisioning.ssid, &provisioning.password) {
            Ok(station) => Some(station),
            Err(e) => {
                error!("WiFi: start failed: {}", e);
                None
            }
        }
    };
    handles.push(tasks::spawn_network(
        station,
        provisioning,
        &dev_id,
        capabilities,
        MqttTransport::start,
    )?);

    // ── 6. Measurements wait for a complete configuration ─────
    if !provisioned {
        loop {
            warn!(
                "Provisioning: incomplete, measurements blocked. Checking again in {} s",
                UNPROVISIONED_RETRY_MS / 1000
            );
            FreeRtos::delay_ms(UNPROVISIONED_RETRY_MS);
            if nvs.load_provisioning().is_fully_provisioned() {
                break;
            }
        }
    }

    handles.push(tasks::spawn_watering(pump)?);
    handles.push(tasks::spawn_orchestrator(sensors, nvs)?);
    info!("System ready.");

    for handle in handles {
        if handle.join().is_err() {
            error!("System: a task panicked");
        }
    }
    Ok(())
}
