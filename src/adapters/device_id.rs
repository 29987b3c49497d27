//! Device identity derived from the ESP32 station MAC address.
//!
//! The device id is the full 6-byte MAC as 12 upper-case hex digits
//! (e.g. `24A160C3F2A8`).  It is stable across reboots and factory resets,
//! and appears in every MQTT topic and in the read-only GATT
//! characteristic 0xFF08.

use core::fmt::Write;

/// 12 hex digits, no separators.
pub type DeviceIdString = heapless::String<12>;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Read the WiFi station MAC from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    // SAFETY: the buffer is exactly the 6 bytes the call writes.
    unsafe {
        esp_idf_svc::sys::esp_read_mac(mac.as_mut_ptr(), esp_idf_svc::sys::esp_mac_type_t_ESP_MAC_WIFI_STA);
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

pub fn device_id(mac: &MacAddress) -> DeviceIdString {
    let mut id = DeviceIdString::new();
    for b in mac {
        // 6 bytes * 2 digits fits exactly.
        let _ = write!(id, "{:02X}", b);
    }
    id
}
