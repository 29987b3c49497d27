//! Watering queue and its single consumer.
//!
//! ```text
//!  Orchestrator ──(auto, cooldown-gated)──┐
//!                                         ├──▶ WATER_QUEUE (5) ──▶ WateringWorker ──▶ pump
//!  command/water ──(manual, clamped)──────┘                             │
//!                                                                       ▼
//!                                                          WateringLog (last completion)
//! ```
//!
//! Exactly one worker drains the queue, so two runs never overlap.  A run
//! in progress is never cancelled; the pump always de-asserts.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Sender, TrySendError};
use embedded_hal::delay::DelayNs;
use log::{info, warn};
use serde_json::json;

use crate::alerts::{AlertRecord, COOLDOWN_10S, RateLimiter, Severity, Subsystem, Verdict};
use crate::app::ports::{AlertSink, Clock, PumpPort, Timestamp};
use crate::config::{AUTO_WATER_COOLDOWN_MS, MANUAL_WATERING_RANGE_SECS};

pub const WATER_QUEUE_LEN: usize = 5;

pub type WaterQueue = Channel<CriticalSectionRawMutex, WateringCommand, WATER_QUEUE_LEN>;
pub type WaterSender<'a> = Sender<'a, CriticalSectionRawMutex, WateringCommand, WATER_QUEUE_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WateringSource {
    Manual,
    Auto,
}

impl WateringSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WateringCommand {
    pub duration_secs: u32,
    pub source: WateringSource,
}

// ── Completion log ───────────────────────────────────────────

/// When the last run finished, shared by the worker (writer) and the
/// orchestrator (cooldown check).
pub struct WateringLog {
    last_completed_ms: Mutex<CriticalSectionRawMutex, Cell<Option<u32>>>,
}

impl WateringLog {
    pub const fn new() -> Self {
        Self {
            last_completed_ms: Mutex::new(Cell::new(None)),
        }
    }

    pub fn record_completion(&self, now_ms: u32) {
        self.last_completed_ms.lock(|c| c.set(Some(now_ms)));
    }

    pub fn last_completed_ms(&self) -> Option<u32> {
        self.last_completed_ms.lock(Cell::get)
    }

    /// Never-watered counts as elapsed.
    pub fn cooldown_elapsed(&self, now_ms: u32, cooldown_ms: u32) -> bool {
        self.last_completed_ms()
            .is_none_or(|done| now_ms.wrapping_sub(done) > cooldown_ms)
    }
}

impl Default for WateringLog {
    fn default() -> Self {
        Self::new()
    }
}

// ── Request side ─────────────────────────────────────────────

/// Bounds a manual duration to `[1, 60]` s.  Returns the duration to use
/// and whether it differs from the request.
pub fn clamp_manual(requested: i64) -> (u32, bool) {
    let (lo, hi) = MANUAL_WATERING_RANGE_SECS;
    let used = requested.clamp(lo, hi);
    (used as u32, used != requested)
}

/// Build a manual command, reporting a clamped duration through `sink`.
pub fn manual_command<S: AlertSink + ?Sized>(
    requested: i64,
    now: Timestamp,
    limiter: &RateLimiter,
    sink: &mut S,
) -> WateringCommand {
    let (used, clamped) = clamp_manual(requested);
    if clamped {
        warn!("Watering: requested {} s, clamped to {} s", requested, used);
        if let Verdict::Allowed { suppressed } =
            limiter.allow("command.watering_duration_clamped", now.monotonic_ms, COOLDOWN_10S)
        {
            sink.submit(
                AlertRecord::new(
                    now.wall_ms,
                    "command.watering_duration_clamped",
                    Severity::Warning,
                    Subsystem::Command,
                    "Watering duration clamped",
                )
                .with_details(json!({ "requested": requested, "used": used, "suppressed": suppressed })),
            );
        }
    }
    WateringCommand {
        duration_secs: used,
        source: WateringSource::Manual,
    }
}

/// `None` while the post-completion cooldown is still running.
pub fn auto_command(duration_secs: u32, now_ms: u32, log: &WateringLog) -> Option<WateringCommand> {
    log.cooldown_elapsed(now_ms, AUTO_WATER_COOLDOWN_MS).then_some(WateringCommand {
        duration_secs,
        source: WateringSource::Auto,
    })
}

/// Non-blocking enqueue; a full queue drops the request.
pub fn enqueue(queue: &WaterSender<'_>, cmd: WateringCommand) -> bool {
    match queue.try_send(cmd) {
        Ok(()) => {
            info!(
                "Watering: request queued (source={}, duration={} s)",
                cmd.source.as_str(),
                cmd.duration_secs
            );
            true
        }
        Err(TrySendError::Full(cmd)) => {
            warn!("Watering: queue full, ignored request source={}", cmd.source.as_str());
            false
        }
    }
}

// ── Worker ───────────────────────────────────────────────────

pub struct WateringWorker<'a, P, D, C> {
    pump: P,
    delay: D,
    clock: C,
    log: &'a WateringLog,
}

impl<'a, P, D, C> WateringWorker<'a, P, D, C>
where
    P: PumpPort,
    D: DelayNs,
    C: Clock,
{
    pub fn new(pump: P, delay: D, clock: C, log: &'a WateringLog) -> Self {
        Self { pump, delay, clock, log }
    }

    pub fn pump(&self) -> &P {
        &self.pump
    }

    /// Run one command to completion.  Blocks for its full duration.
    pub fn run<S: AlertSink + ?Sized>(&mut self, cmd: WateringCommand, sink: &mut S) {
        let started = self.clock.now();
        let record = match cmd.source {
            WateringSource::Auto => AlertRecord::new(
                started.wall_ms,
                "auto_watering_started",
                Severity::Info,
                Subsystem::System,
                "Auto-watering started",
            )
            .with_details(json!({ "duration": cmd.duration_secs, "source": cmd.source.as_str() })),
            WateringSource::Manual => AlertRecord::new(
                started.wall_ms,
                "command.watering_started",
                Severity::Info,
                Subsystem::Command,
                "Watering started",
            ),
        };
        sink.submit(record);

        info!("Watering: pump on ({}, {} s)", cmd.source.as_str(), cmd.duration_secs);
        self.pump.set_running(true);
        self.delay.delay_ms(cmd.duration_secs.saturating_mul(1000));
        self.pump.set_running(false);
        info!("Watering: pump off");

        let finished = self.clock.now();
        let record = match cmd.source {
            WateringSource::Auto => AlertRecord::new(
                finished.wall_ms,
                "auto_watering_finished",
                Severity::Info,
                Subsystem::System,
                "Auto-watering finished",
            ),
            WateringSource::Manual => AlertRecord::new(
                finished.wall_ms,
                "command.watering_finished",
                Severity::Info,
                Subsystem::Command,
                "Watering finished",
            ),
        };
        sink.submit(record);
        self.log.record_completion(finished.monotonic_ms);
    }
}
