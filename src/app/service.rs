//! Orchestrator: the measurement loop and inbound command handling.
//!
//! [`Orchestrator`] owns the current [`DeviceSettings`] and the edge
//! trackers.  Sensors, persistence and time come in through port traits;
//! alerts and telemetry leave through a [`TelemetrySink`] passed per call,
//! so the same code drives the device tasks and the host tests.
//!
//! ```text
//!  SensorPort ──▶ ┌──────────────────────────┐ ──▶ TelemetrySink
//!                 │       Orchestrator        │
//!  ConfigStore ◀─▶│ availability · thresholds │ ──▶ WATER_QUEUE
//!                 └──────────────────────────┘
//! ```
//!
//! One cycle: sample → availability edges → thresholds → telemetry →
//! auto-water.  The caller then sleeps for [`Orchestrator::next_interval_secs`]
//! or until woken by a reconnect or an inbound command.

use log::{debug, error, info, warn};
use serde_json::json;

use crate::alerts::{AlertRecord, COOLDOWN_10S, COOLDOWN_5MIN, RateLimiter, Severity, Subsystem, Verdict};
use crate::app::commands::{self, Command, InboundKind, InboundMessage};
use crate::app::ports::{AlertSink, Clock, ConfigError, ConfigStore, SensorPort, TelemetrySink};
use crate::app::telemetry::{FieldMask, Readings, TelemetryRecord};
use crate::app::thresholds::{REFILL_MESSAGE, ThresholdMonitor, WATER_LEVEL_CRITICAL};
use crate::config::{DeviceSettings, OFFLINE_CYCLES_BEFORE_BACKOFF, OFFLINE_INTERVAL_SECS, SettingsPatch};
use crate::connectivity::availability::AvailabilityTracker;
use crate::watering::{self, WaterSender, WateringLog};

// ───────────────────────────────────────────────────────────────
// Orchestrator
// ───────────────────────────────────────────────────────────────

pub struct Orchestrator<'a, S, C, K> {
    sensors: S,
    store: C,
    clock: K,
    limiter: &'a RateLimiter,
    water: WaterSender<'a>,
    watering_log: &'a WateringLog,
    settings: DeviceSettings,
    availability: AvailabilityTracker,
    thresholds: ThresholdMonitor,
    cycles: u64,
}

impl<'a, S, C, K> Orchestrator<'a, S, C, K>
where
    S: SensorPort,
    C: ConfigStore,
    K: Clock,
{
    /// Build the orchestrator, loading persisted settings.
    ///
    /// A missing or corrupted record falls back to defaults.
    pub fn new(
        sensors: S,
        store: C,
        clock: K,
        limiter: &'a RateLimiter,
        water: WaterSender<'a>,
        watering_log: &'a WateringLog,
    ) -> Self {
        let settings = match store.load_settings() {
            Ok(s) => s,
            Err(e) => {
                warn!("Settings: load failed ({}), using defaults", e);
                DeviceSettings::default()
            }
        };
        info!(
            "Settings: watering {} s, interval {} s",
            settings.watering_duration_secs, settings.measurement_interval_secs
        );
        Self {
            sensors,
            store,
            clock,
            limiter,
            water,
            watering_log,
            settings,
            availability: AvailabilityTracker::new(),
            thresholds: ThresholdMonitor::new(),
            cycles: 0,
        }
    }

    // ── Accessors ────────────────────────────────────────────

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn sensors(&self) -> &S {
        &self.sensors
    }

    pub fn sensors_mut(&mut self) -> &mut S {
        &mut self.sensors
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    /// Metrics whose hardware answered at boot.
    pub fn capabilities(&self) -> FieldMask {
        self.sensors.available_fields()
    }

    // ── Periodic cycle ───────────────────────────────────────

    /// Run one measurement cycle.
    pub fn run_cycle<T: TelemetrySink + ?Sized>(&mut self, sink: &mut T) {
        self.cycles += 1;
        let readings = self.read_and_report(FieldMask::ALL, sink);
        self.maybe_auto_water(&readings);
    }

    /// Seconds to wait before the next cycle.
    pub fn next_interval_secs<T: TelemetrySink + ?Sized>(&self, sink: &T) -> u32 {
        let buffered = sink.consecutive_buffered();
        if buffered >= OFFLINE_CYCLES_BEFORE_BACKOFF {
            warn!(
                "Orchestrator: offline for {} cycles, sampling every {} s",
                buffered, OFFLINE_INTERVAL_SECS
            );
            OFFLINE_INTERVAL_SECS
        } else {
            self.settings.measurement_interval_secs
        }
    }

    /// Sample, update availability and thresholds, publish `mask`.
    fn read_and_report<T: TelemetrySink + ?Sized>(&mut self, mask: FieldMask, sink: &mut T) -> Readings {
        let now = self.clock.now();
        let sample = self.sensors.sample();
        self.availability.observe(&sample, now, self.limiter, sink);

        let readings = sample.readings();
        debug!("Orchestrator: {:?}", readings);
        self.thresholds.evaluate(&readings, &self.settings, now.wall_ms, sink);
        sink.submit_telemetry(TelemetryRecord::new(now.wall_ms, readings).masked(mask));
        readings
    }

    fn maybe_auto_water(&mut self, readings: &Readings) {
        let (Some(soil), Some(min)) = (readings.soil_moisture_pct, self.settings.soil.min) else {
            return;
        };
        if soil >= min {
            return;
        }
        let now = self.clock.now();
        match watering::auto_command(self.settings.watering_duration_secs, now.monotonic_ms, self.watering_log) {
            Some(cmd) => {
                warn!("Orchestrator: auto-watering triggered, soil {} % < min {} %", soil, min);
                watering::enqueue(&self.water, cmd);
            }
            None => debug!("Orchestrator: soil {} % < min {} %, watering cooldown active", soil, min),
        }
    }

    // ── Inbound commands ─────────────────────────────────────

    pub fn handle_inbound<T: TelemetrySink + ?Sized>(&mut self, msg: &InboundMessage, sink: &mut T) {
        let payload = msg.payload.as_slice();
        info!("Orchestrator: inbound {} ({} B)", msg.kind.label(), payload.len());

        match msg.kind {
            InboundKind::Water => match commands::parse_water(payload) {
                Ok(cmd) => self.execute(cmd, sink),
                Err(_) => self.invalid_command_json(msg.kind, payload.len(), "Invalid JSON for command/water", sink),
            },
            InboundKind::Read => {
                let (cmd, err) = commands::parse_read(payload);
                if err.is_some() {
                    self.invalid_command_json(
                        msg.kind,
                        payload.len(),
                        "Invalid JSON for command/read; defaulting to all fields",
                        sink,
                    );
                }
                self.execute(cmd, sink);
            }
            InboundKind::Settings => match commands::parse_settings(payload) {
                Ok(cmd) => self.execute(cmd, sink),
                Err(e) => {
                    warn!("Settings: {}", e);
                    self.invalid_settings_json(payload.len(), sink);
                }
            },
        }
    }

    pub fn execute<T: TelemetrySink + ?Sized>(&mut self, cmd: Command, sink: &mut T) {
        match cmd {
            Command::Water { requested_secs } => self.manual_water(requested_secs, sink),
            Command::Read { fields } => {
                self.read_and_report(fields, sink);
            }
            Command::Settings(patch) => self.apply_settings(&patch, sink),
        }
    }

    fn manual_water<T: TelemetrySink + ?Sized>(&mut self, requested: Option<i64>, sink: &mut T) {
        let now = self.clock.now();
        let requested = requested.unwrap_or(i64::from(self.settings.watering_duration_secs));
        let cmd = watering::manual_command(requested, now, self.limiter, sink);
        watering::enqueue(&self.water, cmd);

        if self.sensors.water_tank_low() {
            sink.submit(AlertRecord::threshold(
                now.wall_ms,
                WATER_LEVEL_CRITICAL,
                format_args!("{}", REFILL_MESSAGE),
            ));
        }
    }

    fn apply_settings<T: AlertSink + ?Sized>(&mut self, patch: &SettingsPatch, sink: &mut T) {
        let now = self.clock.now();
        let next = match patch.apply(&self.settings) {
            Ok(next) => next,
            Err(rejected) => {
                warn!("Settings: rejected update (min > max): {:?}", rejected.candidate);
                if let Verdict::Allowed { suppressed } =
                    self.limiter.allow("settings.rejected", now.monotonic_ms, COOLDOWN_10S)
                {
                    let mut details = rejected.candidate.bounds_json();
                    details["suppressed"] = json!(suppressed);
                    sink.submit(
                        AlertRecord::new(
                            now.wall_ms,
                            "settings.rejected",
                            Severity::Warning,
                            Subsystem::Command,
                            "Rejected settings update (min > max)",
                        )
                        .with_details(details),
                    );
                }
                return;
            }
        };

        self.settings = next;
        info!(
            "Settings: updated (watering {} s, interval {} s)",
            next.watering_duration_secs, next.measurement_interval_secs
        );

        if let Err(e) = self.store.save_settings(&next) {
            error!("Settings: persist failed: {}", e);
            let code = match e {
                ConfigError::Storage(s) => s.code(),
                _ => -1,
            };
            if let Verdict::Allowed { suppressed } =
                self.limiter.allow("settings.save_failed", now.monotonic_ms, COOLDOWN_5MIN)
            {
                sink.submit(
                    AlertRecord::new(
                        now.wall_ms,
                        "settings.save_failed",
                        Severity::Error,
                        Subsystem::Settings,
                        "Failed to persist settings",
                    )
                    .with_details(json!({ "err": code, "suppressed": suppressed })),
                );
            }
        }
    }

    fn invalid_command_json<T: AlertSink + ?Sized>(
        &self,
        kind: InboundKind,
        len: usize,
        message: &str,
        sink: &mut T,
    ) {
        warn!("Orchestrator: invalid JSON on command/{}", kind.label());
        let now = self.clock.now();
        if let Verdict::Allowed { suppressed } =
            self.limiter.allow("command.invalid_json", now.monotonic_ms, COOLDOWN_10S)
        {
            sink.submit(
                AlertRecord::new(now.wall_ms, "command.invalid_json", Severity::Warning, Subsystem::Command, message)
                    .with_details(json!({ "topic": kind.label(), "len": len, "suppressed": suppressed })),
            );
        }
    }

    fn invalid_settings_json<T: AlertSink + ?Sized>(&self, len: usize, sink: &mut T) {
        warn!("Settings: invalid JSON");
        let now = self.clock.now();
        if let Verdict::Allowed { suppressed } =
            self.limiter.allow("settings.invalid_json", now.monotonic_ms, COOLDOWN_10S)
        {
            sink.submit(
                AlertRecord::new(
                    now.wall_ms,
                    "settings.invalid_json",
                    Severity::Warning,
                    Subsystem::Settings,
                    "Invalid JSON for settings",
                )
                .with_details(json!({ "len": len, "suppressed": suppressed })),
            );
        }
    }
}
