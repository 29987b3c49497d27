//! Clock, delay and SNTP adapter.
//!
//! - **`target_os = "espidf"`**: monotonic time from `esp_timer_get_time()`,
//!   wall time from the system clock once SNTP has synced.
//! - **`not(target_os = "espidf")`**: `std::time` for host-side testing and
//!   simulation.
//!
//! Wall time before the first sync is whatever the RTC holds (seconds
//! after 1970 on a cold boot).  Timestamps are never withheld for it.

use std::time::{SystemTime, UNIX_EPOCH};

use embedded_hal::delay::DelayNs;
use log::{info, warn};

use crate::app::ports::{Clock, Timestamp};

pub const NTP_SERVER: &str = "pool.ntp.org";
/// Central European time with DST.
pub const TIMEZONE: &str = "CET-1CEST,M3.5.0,M10.5.0/3";
pub const SNTP_WAIT_MS: u32 = 30_000;
const SNTP_POLL_MS: u32 = 500;

/// Anything earlier means the clock was never set.
const EPOCH_2020_MS: u64 = 1_577_836_800_000;

fn wall_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

pub fn wall_clock_synced() -> bool {
    wall_ms() >= EPOCH_2020_MS
}

// ── Clock ─────────────────────────────────────────────────────

#[derive(Clone, Copy)]
pub struct SystemClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Milliseconds since boot; wraps after ~49 days.
    #[cfg(target_os = "espidf")]
    pub fn uptime_ms(&self) -> u32 {
        // SAFETY: esp_timer_get_time has no preconditions.
        ((unsafe { esp_idf_svc::sys::esp_timer_get_time() }) / 1000) as u32
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn uptime_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp {
            monotonic_ms: self.uptime_ms(),
            wall_ms: wall_ms(),
        }
    }
}

// ── Delay ─────────────────────────────────────────────────────

/// Blocking delay for the current thread.
#[cfg(target_os = "espidf")]
pub type TaskDelay = esp_idf_svc::hal::delay::FreeRtos;

#[cfg(not(target_os = "espidf"))]
pub type TaskDelay = StdDelay;

#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

#[cfg(target_os = "espidf")]
pub fn task_delay() -> TaskDelay {
    esp_idf_svc::hal::delay::FreeRtos
}

#[cfg(not(target_os = "espidf"))]
pub fn task_delay() -> TaskDelay {
    StdDelay
}

#[cfg(not(target_os = "espidf"))]
impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(std::time::Duration::from_nanos(u64::from(ns)));
    }
}

// ── SNTP ──────────────────────────────────────────────────────

/// Keeps the SNTP service alive; drop it to stop syncing.
pub struct TimeSync {
    #[cfg(target_os = "espidf")]
    sntp: esp_idf_svc::sntp::EspSntp<'static>,
}

impl TimeSync {
    /// Set the local timezone and start SNTP against the [`NTP_SERVER`] pool.
    #[cfg(target_os = "espidf")]
    pub fn start() -> Result<Self, esp_idf_svc::sys::EspError> {
        use esp_idf_svc::sntp::EspSntp;

        // SAFETY: called from the network task before any other thread
        // reads the environment.
        unsafe {
            std::env::set_var("TZ", TIMEZONE);
            esp_idf_svc::sys::tzset();
        }
        // The default configuration polls the pool.ntp.org servers.
        let sntp = EspSntp::new_default()?;
        info!("Time: SNTP started ({}, TZ {})", NTP_SERVER, TIMEZONE);
        Ok(Self { sntp })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn start() -> Result<Self, core::convert::Infallible> {
        info!("Time(sim): host clock used as-is");
        Ok(Self {})
    }

    #[cfg(target_os = "espidf")]
    pub fn is_synced(&self) -> bool {
        self.sntp.get_sync_status() == esp_idf_svc::sntp::SyncStatus::Completed
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn is_synced(&self) -> bool {
        wall_clock_synced()
    }

    /// Block until the first sync or [`SNTP_WAIT_MS`].  Returns whether
    /// the clock is set; a timeout is not an error.
    pub fn wait_for_sync<D: DelayNs>(&self, delay: &mut D) -> bool {
        let mut waited = 0;
        while !self.is_synced() {
            if waited >= SNTP_WAIT_MS {
                warn!("Time: no SNTP sync after {} s, continuing", SNTP_WAIT_MS / 1000);
                return false;
            }
            delay.delay_ms(SNTP_POLL_MS);
            waited += SNTP_POLL_MS;
        }
        info!("Time: synced");
        true
    }
}
