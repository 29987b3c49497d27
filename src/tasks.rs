//! Firmware tasks: one thread each, wired together by [`crate::channels`].
//!
//! ```text
//!  ┌───────────────┐ NET_EVENTS / OUTBOX / WIFI_EVENTS  ┌──────────────┐
//!  │ network       │◀────────────────────────────────────│ callbacks,   │
//!  │ WiFi · SNTP · │──── ORCHESTRATOR_WAKE ─────┐        │ other tasks  │
//!  │ MQTT layer    │──── INBOUND (routed) ──────┤        └──────────────┘
//!  └───────────────┘                            ▼
//!                                      ┌───────────────┐ WATER_QUEUE ┌──────────┐
//!                                      │ orchestrator  │────────────▶│ watering │
//!                                      └───────────────┘             └──────────┘
//!  ┌───────────────┐ BUTTON_EVENTS ┌───────────────┐
//!  │ button (50ms) │──────────────▶│ commissioning │◀── RADIO_EVENTS (GATT)
//!  └───────────────┘               └───────────────┘
//! ```
//!
//! Threads with a periodic loop beside their event intake run both on an
//! `edge_executor` [`LocalExecutor`] driven by `futures_lite::future::block_on`,
//! with `async_io_mini` timers for the periodic work.  Shared state inside one
//! thread lives in `Rc<RefCell<..>>` and is never borrowed across an
//! `.await`.

use core::cell::RefCell;
use core::future::Future;
use core::time::Duration;
use std::io;
use std::rc::Rc;
use std::thread::JoinHandle;
use std::time::Instant;

use async_io_mini::Timer;
use edge_executor::LocalExecutor;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::InputPin;
use futures_lite::future;
use log::{error, info, warn};

use crate::adapters::mqtt::MqttSettings;
use crate::adapters::time::{SystemClock, TimeSync, task_delay};
use crate::adapters::wifi::{WIFI_EVENTS, WifiEvent, WifiMonitor, WifiStation};
use crate::alerts::{ALERT_LIMITER, RateLimiter};
use crate::app::ports::{
    Clock, ConfigStore, PumpPort, RadioPort, RestartPort, SensorPort, StoragePort, TelemetrySink, TransportError,
    TransportPort,
};
use crate::app::service::Orchestrator;
use crate::app::telemetry::FieldMask;
use crate::channels::{
    BUTTON_EVENTS, INBOUND, LINK, LinkStatus, NET_EVENTS, ORCHESTRATOR_WAKE, OUTBOX, Outbound, Outbox,
    RADIO_EVENTS, WATER_QUEUE, WATERING_LOG,
};
use crate::commissioning::{Commissioning, Input};
use crate::config::ProvisioningConfig;
use crate::connectivity::payload::Identity;
use crate::connectivity::{ConnectivityLayer, NetEvent};
use crate::drivers::button::{ButtonDriver, ButtonPress, POLL_MS};
use crate::drivers::task_pin::{Core, spawn_on_core};
use crate::watering::WateringWorker;

const NETWORK_TICK: Duration = Duration::from_secs(1);
const COMMISSIONING_TICK: Duration = Duration::from_secs(1);
const MQTT_RETRY_MS: u32 = 30_000;

/// Drive two cooperating loops on a fresh single-threaded executor.
fn run_local<A, B>(a: A, b: B)
where
    A: Future<Output = ()>,
    B: Future<Output = ()>,
{
    let executor: LocalExecutor<'_, 4> = LocalExecutor::new();
    let a = executor.spawn(a);
    let b = executor.spawn(b);
    future::block_on(executor.run(future::zip(a, b)));
}

// ───────────────────────────────────────────────────────────────
// Network
// ───────────────────────────────────────────────────────────────

/// One input to the network task.
#[derive(Debug, Clone, PartialEq)]
pub enum NetWake {
    Mqtt(NetEvent),
    Outbound(Outbound),
    Wifi(WifiEvent),
    Tick,
}

/// Owns the connectivity layer and the WiFi link.  Starts SNTP on the
/// first IP and the MQTT client once credentials allow.
pub struct NetworkTask<'a, T, C, D, F> {
    layer: ConnectivityLayer<'a, T, C, D>,
    monitor: WifiMonitor<'a>,
    station: Option<WifiStation>,
    time_sync: Option<TimeSync>,
    clock: C,
    link: &'a LinkStatus,
    provisioning: ProvisioningConfig,
    device_id: heapless::String<12>,
    capabilities: FieldMask,
    connect: F,
    mqtt_retry_at_ms: Option<u32>,
}

impl<'a, T, C, D, F> NetworkTask<'a, T, C, D, F>
where
    T: TransportPort,
    C: Clock + Clone,
    D: DelayNs,
    F: FnMut(&MqttSettings<'_>) -> Result<T, TransportError>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        limiter: &'a RateLimiter,
        link: &'a LinkStatus,
        clock: C,
        delay: D,
        station: Option<WifiStation>,
        provisioning: ProvisioningConfig,
        device_id: &str,
        capabilities: FieldMask,
        connect: F,
    ) -> Self {
        let mut id = heapless::String::new();
        let _ = id.push_str(device_id);
        Self {
            layer: ConnectivityLayer::new(limiter, clock.clone(), delay),
            monitor: WifiMonitor::new(limiter),
            station,
            time_sync: None,
            clock,
            link,
            provisioning,
            device_id: id,
            capabilities,
            connect,
            mqtt_retry_at_ms: None,
        }
    }

    pub fn layer(&self) -> &ConnectivityLayer<'a, T, C, D> {
        &self.layer
    }

    pub fn monitor(&self) -> &WifiMonitor<'a> {
        &self.monitor
    }

    pub fn step(&mut self, wake: NetWake) {
        let (alerts, telemetry) = self.link.take_outbox_drops();
        if alerts > 0 || telemetry > 0 {
            self.layer.record_upstream_drops(alerts, telemetry);
        }
        match wake {
            NetWake::Mqtt(event) => {
                self.layer.handle_event(event);
                if event == NetEvent::Connected {
                    ORCHESTRATOR_WAKE.signal(());
                }
            }
            NetWake::Outbound(Outbound::Alert(alert)) => self.layer.publish_alert(alert),
            NetWake::Outbound(Outbound::Telemetry(record)) => self.layer.publish_telemetry(record),
            NetWake::Wifi(event) => {
                self.monitor.on_event(event, self.clock.now(), &mut self.layer);
                if matches!(event, WifiEvent::GotIp { .. }) {
                    self.on_link_up();
                }
            }
            NetWake::Tick => {
                if self.monitor.reconnect_due(self.clock.now().monotonic_ms) {
                    if let Some(station) = self.station.as_mut() {
                        station.reconnect();
                    }
                }
                if self.monitor.is_up() {
                    self.ensure_mqtt();
                }
                self.layer.service();
            }
        }
        self.link
            .update(self.layer.is_connected(), self.layer.consecutive_buffered());
    }

    fn on_link_up(&mut self) {
        if self.time_sync.is_none() {
            match TimeSync::start() {
                Ok(sync) => {
                    sync.wait_for_sync(&mut task_delay());
                    self.time_sync = Some(sync);
                }
                Err(e) => warn!("Time: SNTP start failed: {:?}", e),
            }
        }
        self.ensure_mqtt();
    }

    fn ensure_mqtt(&mut self) {
        if self.layer.is_started() || !self.provisioning.mqtt_ready() {
            return;
        }
        let now_ms = self.clock.now().monotonic_ms;
        if let Some(at) = self.mqtt_retry_at_ms {
            if now_ms.wrapping_sub(at) >= u32::MAX / 2 {
                return;
            }
        }
        let settings = MqttSettings {
            broker_uri: &self.provisioning.broker,
            client_id: &self.device_id,
            login: &self.provisioning.mqtt_login,
            password: &self.provisioning.mqtt_password,
        };
        match (self.connect)(&settings) {
            Ok(transport) => {
                let identity = Identity::new(&self.provisioning.user_id, &self.device_id);
                self.layer.start(transport, identity, self.capabilities);
                self.mqtt_retry_at_ms = None;
            }
            Err(e) => {
                error!("MQTT: client start failed ({}), retrying in {} s", e, MQTT_RETRY_MS / 1000);
                self.mqtt_retry_at_ms = Some(now_ms.wrapping_add(MQTT_RETRY_MS));
            }
        }
    }
}

async fn next_net_wake() -> NetWake {
    let mqtt = async { NetWake::Mqtt(NET_EVENTS.receive().await) };
    let outbound = async { NetWake::Outbound(OUTBOX.receive().await) };
    let wifi = async { NetWake::Wifi(WIFI_EVENTS.receive().await) };
    future::or(mqtt, future::or(wifi, outbound)).await
}

fn run_network<T, C, D, F>(task: NetworkTask<'static, T, C, D, F>)
where
    T: TransportPort + 'static,
    C: Clock + Clone + 'static,
    D: DelayNs + 'static,
    F: FnMut(&MqttSettings<'_>) -> Result<T, TransportError> + 'static,
{
    let task = Rc::new(RefCell::new(task));
    let intake = {
        let task = task.clone();
        async move {
            loop {
                let wake = next_net_wake().await;
                task.borrow_mut().step(wake);
            }
        }
    };
    let ticker = async move {
        loop {
            Timer::after(NETWORK_TICK).await;
            task.borrow_mut().step(NetWake::Tick);
        }
    };
    info!("Network: task started");
    run_local(intake, ticker);
}

pub fn spawn_network<T, F>(
    station: Option<WifiStation>,
    provisioning: ProvisioningConfig,
    device_id: &str,
    capabilities: FieldMask,
    connect: F,
) -> io::Result<JoinHandle<()>>
where
    T: TransportPort + 'static,
    F: FnMut(&MqttSettings<'_>) -> Result<T, TransportError> + Send + 'static,
{
    let mut id = heapless::String::<12>::new();
    let _ = id.push_str(device_id);
    spawn_on_core(Core::Pro, 5, 12, "network\0", move || {
        let task = NetworkTask::new(
            &ALERT_LIMITER,
            &LINK,
            SystemClock::new(),
            task_delay(),
            station,
            provisioning,
            &id,
            capabilities,
            connect,
        );
        run_network(task);
    })
}

// ───────────────────────────────────────────────────────────────
// Orchestrator
// ───────────────────────────────────────────────────────────────

enum Wake {
    Due,
    Reconnected,
    Inbound(crate::app::commands::InboundMessage),
}

async fn orchestrate<S, St, K>(mut orch: Orchestrator<'static, S, St, K>)
where
    S: SensorPort,
    St: ConfigStore,
    K: Clock,
{
    let mut sink = Outbox::new();
    loop {
        orch.run_cycle(&mut sink);
        let secs = orch.next_interval_secs(&sink);
        let deadline = Instant::now() + Duration::from_secs(u64::from(secs));
        loop {
            let due = async {
                Timer::at(deadline).await;
                Wake::Due
            };
            let woken = async {
                ORCHESTRATOR_WAKE.wait().await;
                Wake::Reconnected
            };
            let inbound = async { Wake::Inbound(INBOUND.receive().await) };
            match future::or(inbound, future::or(woken, due)).await {
                Wake::Inbound(msg) => orch.handle_inbound(&msg, &mut sink),
                Wake::Reconnected => {
                    info!("Orchestrator: reconnected, sampling now");
                    break;
                }
                Wake::Due => break,
            }
        }
    }
}

pub fn spawn_orchestrator<S, St>(sensors: S, store: St) -> io::Result<JoinHandle<()>>
where
    S: SensorPort + Send + 'static,
    St: StoragePort + Send + 'static,
{
    spawn_on_core(Core::App, 5, 10, "orchestrator\0", move || {
        let orch = Orchestrator::new(
            sensors,
            store,
            SystemClock::new(),
            &ALERT_LIMITER,
            WATER_QUEUE.sender(),
            &WATERING_LOG,
        );
        future::block_on(orchestrate(orch));
    })
}

// ───────────────────────────────────────────────────────────────
// Watering
// ───────────────────────────────────────────────────────────────

pub fn spawn_watering<P>(pump: P) -> io::Result<JoinHandle<()>>
where
    P: PumpPort + Send + 'static,
{
    spawn_on_core(Core::App, 6, 4, "watering\0", move || {
        let mut worker = WateringWorker::new(pump, task_delay(), SystemClock::new(), &WATERING_LOG);
        let mut sink = Outbox::new();
        info!("Watering: worker ready");
        loop {
            let cmd = future::block_on(WATER_QUEUE.receive());
            worker.run(cmd, &mut sink);
        }
    })
}

// ───────────────────────────────────────────────────────────────
// Commissioning + button
// ───────────────────────────────────────────────────────────────

fn button_input(press: ButtonPress) -> Input {
    match press {
        ButtonPress::Click => Input::Button,
        ButtonPress::Hold => Input::ButtonHeld,
    }
}

pub fn spawn_commissioning<R, St, P>(
    machine: Commissioning<'static, R, St, P, SystemClock>,
) -> io::Result<JoinHandle<()>>
where
    R: RadioPort + Send + 'static,
    St: StoragePort + Send + 'static,
    P: RestartPort + Send + 'static,
{
    spawn_on_core(Core::Pro, 4, 6, "commission\0", move || {
        let machine = Rc::new(RefCell::new(machine));
        let events = {
            let machine = machine.clone();
            async move {
                let mut sink = Outbox::new();
                loop {
                    let radio = async { Input::Radio(RADIO_EVENTS.receive().await) };
                    let button = async { button_input(BUTTON_EVENTS.receive().await) };
                    let input = future::or(radio, button).await;
                    machine.borrow_mut().handle(input, &mut sink);
                }
            }
        };
        let ticker = async move {
            let mut sink = Outbox::new();
            loop {
                Timer::after(COMMISSIONING_TICK).await;
                machine.borrow_mut().handle(Input::Tick, &mut sink);
            }
        };
        run_local(events, ticker);
    })
}

pub fn spawn_button<I>(mut button: ButtonDriver<I>) -> io::Result<JoinHandle<()>>
where
    I: InputPin + Send + 'static,
{
    spawn_on_core(Core::App, 3, 3, "button\0", move || {
        let clock = SystemClock::new();
        let mut delay = task_delay();
        loop {
            if let Some(press) = button.tick(clock.uptime_ms()) {
                info!("Button: {:?}", press);
                if BUTTON_EVENTS.try_send(press).is_err() {
                    warn!("Button: event queue full, {:?} dropped", press);
                }
            }
            delay.delay_ms(POLL_MS);
        }
    })
}
