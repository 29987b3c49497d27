//! WiFi station-mode adapter.
//!
//! The ESP-IDF event handler only posts a [`WifiEvent`] into
//! [`WIFI_EVENTS`]; the network task feeds those into a [`WifiMonitor`],
//! which raises the rate-limited alerts and schedules reconnects.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::wifi::EspWifi` plus raw
//!   `WIFI_EVENT` / `IP_EVENT` handlers for the disconnect reason.
//! - **all other targets**: simulation stubs for host-side tests.
//!
//! ## Reconnection policy
//!
//! A disconnect schedules one reconnect attempt 30 s later.  The attempt
//! either yields `GotIp` or another disconnect, which re-arms the timer.

use core::fmt;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{info, warn};
use serde_json::json;

use crate::alerts::{AlertRecord, COOLDOWN_1MIN, COOLDOWN_5MIN, RateLimiter, Severity, Subsystem, Verdict};
use crate::app::ports::{AlertSink, Timestamp};

pub const RECONNECT_DELAY_MS: u32 = 30_000;

const MAX_SSID_LEN: usize = 32;
const MAX_PASSWORD_LEN: usize = 64;
const MIN_WPA2_PASSWORD_LEN: usize = 8;

// ───────────────────────────────────────────────────────────────
// Errors
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiError {
    NoCredentials,
    InvalidSsid,
    InvalidPassword,
    /// The driver returned this ESP-IDF code.
    Driver(i32),
}

impl fmt::Display for WifiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no WiFi credentials configured"),
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 bytes)"),
            Self::InvalidPassword => write!(f, "password invalid (8-64 bytes for WPA2, or empty for open)"),
            Self::Driver(rc) => write!(f, "WiFi driver error (rc={})", rc),
        }
    }
}

fn validate(ssid: &str, password: &str) -> Result<(), WifiError> {
    if ssid.is_empty() {
        return Err(WifiError::NoCredentials);
    }
    if ssid.len() > MAX_SSID_LEN {
        return Err(WifiError::InvalidSsid);
    }
    if !password.is_empty() && !(MIN_WPA2_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password.len()) {
        return Err(WifiError::InvalidPassword);
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Events
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiEvent {
    /// `reason` is the 802.11 reason code.
    Disconnected { reason: u8 },
    GotIp { ip: [u8; 4] },
}

/// ESP-IDF event handler → network task.
pub static WIFI_EVENTS: Channel<CriticalSectionRawMutex, WifiEvent, 4> = Channel::new();

fn post(event: WifiEvent) {
    if WIFI_EVENTS.try_send(event).is_err() {
        warn!("WiFi: event queue full, {:?} dropped", event);
    }
}

// ───────────────────────────────────────────────────────────────
// Monitor (platform independent)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Up,
    Down { retry_at_ms: u32 },
}

pub struct WifiMonitor<'a> {
    limiter: &'a RateLimiter,
    state: LinkState,
    ip: Option<[u8; 4]>,
}

impl<'a> WifiMonitor<'a> {
    pub fn new(limiter: &'a RateLimiter) -> Self {
        Self {
            limiter,
            state: LinkState::Connecting,
            ip: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_up(&self) -> bool {
        self.state == LinkState::Up
    }

    pub fn ip(&self) -> Option<[u8; 4]> {
        self.ip
    }

    pub fn on_event<S: AlertSink + ?Sized>(&mut self, event: WifiEvent, now: Timestamp, sink: &mut S) {
        match event {
            WifiEvent::Disconnected { reason } => {
                warn!("WiFi: disconnected (reason {}), retrying in {} s", reason, RECONNECT_DELAY_MS / 1000);
                self.ip = None;
                self.state = LinkState::Down {
                    retry_at_ms: now.monotonic_ms.wrapping_add(RECONNECT_DELAY_MS),
                };
                if let Verdict::Allowed { suppressed } =
                    self.limiter.allow("wifi.disconnected", now.monotonic_ms, COOLDOWN_1MIN)
                {
                    sink.submit(
                        AlertRecord::new(
                            now.wall_ms,
                            "wifi.disconnected",
                            Severity::Warning,
                            Subsystem::Wifi,
                            "WiFi disconnected. Retrying in 30s...",
                        )
                        .with_details(json!({ "reason": reason, "suppressed": suppressed })),
                    );
                }
            }
            WifiEvent::GotIp { ip } => {
                info!("WiFi: got IP {}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3]);
                self.ip = Some(ip);
                self.state = LinkState::Up;
                if let Verdict::Allowed { suppressed } =
                    self.limiter.allow("wifi.got_ip", now.monotonic_ms, COOLDOWN_5MIN)
                {
                    let addr = format!("{}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3]);
                    sink.submit(
                        AlertRecord::new(now.wall_ms, "wifi.got_ip", Severity::Info, Subsystem::Wifi, "WiFi connected")
                            .with_details(json!({ "ip": addr, "suppressed": suppressed })),
                    );
                }
            }
        }
    }

    /// `true` once when a scheduled reconnect is due.
    pub fn reconnect_due(&mut self, now_ms: u32) -> bool {
        let LinkState::Down { retry_at_ms } = self.state else {
            return false;
        };
        if now_ms.wrapping_sub(retry_at_ms) >= u32::MAX / 2 {
            return false;
        }
        self.state = LinkState::Connecting;
        true
    }
}

// ───────────────────────────────────────────────────────────────
// Station driver
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod driver {
    use esp_idf_svc::sys::*;

    use super::{WifiEvent, post};

    /// Raw handler for `WIFI_EVENT` and `IP_EVENT`.
    pub unsafe extern "C" fn on_event(
        _arg: *mut core::ffi::c_void,
        base: esp_event_base_t,
        id: i32,
        data: *mut core::ffi::c_void,
    ) {
        // SAFETY: ESP-IDF passes the payload type documented for each id.
        unsafe {
            if base == WIFI_EVENT && id == wifi_event_t_WIFI_EVENT_STA_DISCONNECTED as i32 {
                let ev = &*(data as *const wifi_event_sta_disconnected_t);
                post(WifiEvent::Disconnected { reason: ev.reason });
            } else if base == IP_EVENT && id == ip_event_t_IP_EVENT_STA_GOT_IP as i32 {
                let ev = &*(data as *const ip_event_got_ip_t);
                post(WifiEvent::GotIp {
                    ip: ev.ip_info.ip.addr.to_le_bytes(),
                });
            }
        }
    }

    pub fn register_handlers() -> Result<(), i32> {
        let ok = ESP_OK as i32;
        // SAFETY: the default event loop exists once EspWifi is created.
        unsafe {
            let rc = esp_event_handler_register(WIFI_EVENT, ESP_EVENT_ANY_ID, Some(on_event), core::ptr::null_mut());
            if rc != ok {
                return Err(rc);
            }
            let rc = esp_event_handler_register(
                IP_EVENT,
                ip_event_t_IP_EVENT_STA_GOT_IP as i32,
                Some(on_event),
                core::ptr::null_mut(),
            );
            if rc != ok {
                return Err(rc);
            }
        }
        Ok(())
    }
}

pub struct WifiStation {
    #[cfg(target_os = "espidf")]
    wifi: esp_idf_svc::wifi::EspWifi<'static>,
    ssid: heapless::String<MAX_SSID_LEN>,
}

impl WifiStation {
    /// Configure STA mode and start the first connection attempt.
    #[cfg(target_os = "espidf")]
    pub fn start(
        modem: esp_idf_svc::hal::modem::Modem,
        sysloop: esp_idf_svc::eventloop::EspSystemEventLoop,
        ssid: &str,
        password: &str,
    ) -> Result<Self, WifiError> {
        use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi};

        validate(ssid, password)?;
        let driver_err = |e: esp_idf_svc::sys::EspError| WifiError::Driver(e.code());

        let mut wifi = EspWifi::new(modem, sysloop, None).map_err(driver_err)?;
        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| WifiError::InvalidSsid)?,
            password: password.try_into().map_err(|_| WifiError::InvalidPassword)?,
            auth_method,
            ..Default::default()
        }))
        .map_err(driver_err)?;
        driver::register_handlers().map_err(WifiError::Driver)?;
        wifi.start().map_err(driver_err)?;
        wifi.connect().map_err(driver_err)?;

        let mut station = Self {
            wifi,
            ssid: heapless::String::new(),
        };
        let _ = station.ssid.push_str(ssid);
        info!("WiFi: connecting to '{}'", station.ssid);
        Ok(station)
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn start(ssid: &str, password: &str) -> Result<Self, WifiError> {
        validate(ssid, password)?;
        let mut station = Self { ssid: heapless::String::new() };
        let _ = station.ssid.push_str(ssid);
        info!("WiFi(sim): connecting to '{}'", station.ssid);
        Ok(station)
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    #[cfg(target_os = "espidf")]
    pub fn reconnect(&mut self) {
        info!("WiFi: reconnecting to '{}'", self.ssid);
        if let Err(e) = self.wifi.connect() {
            // The driver reports the failure as another disconnect event.
            warn!("WiFi: connect request failed: {:?}", e);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn reconnect(&mut self) {
        info!("WiFi(sim): reconnecting to '{}'", self.ssid);
        post(WifiEvent::GotIp { ip: [192, 168, 1, 50] });
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
