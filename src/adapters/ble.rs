//! BLE commissioning radio.
//!
//! Implements [`RadioPort`] for the commissioning state machine.  GATT
//! callbacks never touch that machine: they decode what the peer did into
//! a [`RadioEvent`] and post it to [`RADIO_EVENTS`].
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GATT server via raw `esp_idf_svc::sys` calls.
//! - **all other targets**: simulation stubs for host-side tests.
//!
//! ## GATT service layout
//!
//! One primary service `12345678-90ab-cdef-1234-567890abcdef` carrying the
//! eight 16-bit characteristics listed in [`crate::commissioning::fields`].
//! Reads are answered by the application from a small cache that the
//! state machine fills through [`RadioPort::set_read_value`].

use core::cell::RefCell;
use core::fmt;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{info, warn};

use crate::app::ports::RadioPort;
use crate::channels::RADIO_EVENTS;
use crate::commissioning::RadioEvent;
use crate::commissioning::fields::{ADVERTISED_NAME, Characteristic, MAX_VALUE_LEN};

/// `12345678-90ab-cdef-1234-567890abcdef`
pub const SERVICE_UUID128: u128 = 0x1234_5678_90ab_cdef_1234_5678_90ab_cdef;

const READABLE_SLOTS: usize = 3;

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningError {
    /// A Bluedroid init call failed with this ESP-IDF code.
    StackInitFailed(i32),
    /// The peer wrote to a read-only characteristic.
    ReadOnly,
    /// Control payloads are a single byte.
    DataTooLong,
}

impl fmt::Display for ProvisioningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackInitFailed(rc) => write!(f, "BLE stack initialisation failed (rc={})", rc),
            Self::ReadOnly => write!(f, "characteristic is read-only"),
            Self::DataTooLong => write!(f, "BLE write exceeds characteristic length"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Callback → task bridge
// ───────────────────────────────────────────────────────────────

/// Turn a GATT write into an event.  Field values longer than
/// [`MAX_VALUE_LEN`] are cut; the scratch area truncates further per field.
pub fn decode_write(ch: Characteristic, data: &[u8]) -> Result<RadioEvent, ProvisioningError> {
    if ch == Characteristic::Control {
        let bytes = heapless::Vec::from_slice(data).map_err(|_| ProvisioningError::DataTooLong)?;
        return Ok(RadioEvent::ControlWritten(bytes));
    }
    let Some(field) = ch.field() else {
        return Err(ProvisioningError::ReadOnly);
    };
    let end = data.len().min(MAX_VALUE_LEN);
    let mut value = heapless::Vec::new();
    // Cannot fail: `end <= MAX_VALUE_LEN`.
    let _ = value.extend_from_slice(&data[..end]);
    Ok(RadioEvent::FieldWritten { field, value })
}

fn post(event: RadioEvent) {
    if RADIO_EVENTS.try_send(event).is_err() {
        warn!("BLE: event queue full, event dropped");
    }
}

type ReadCache = [heapless::String<MAX_VALUE_LEN>; READABLE_SLOTS];

/// Values served to GATT reads.  Written by the commissioning task, read
/// from the Bluedroid task.
static READ_VALUES: Mutex<CriticalSectionRawMutex, RefCell<ReadCache>> =
    Mutex::new(RefCell::new([const { heapless::String::new() }; READABLE_SLOTS]));

fn read_slot(ch: Characteristic) -> Option<usize> {
    match ch {
        Characteristic::Ssid => Some(0),
        Characteristic::Broker => Some(1),
        Characteristic::DeviceId => Some(2),
        _ => None,
    }
}

/// Current read value for `ch`; empty for write-only characteristics.
pub fn cached_read_value(ch: Characteristic) -> heapless::String<MAX_VALUE_LEN> {
    read_slot(ch)
        .map(|slot| READ_VALUES.lock(|cache| cache.borrow()[slot].clone()))
        .unwrap_or_default()
}

// ───────────────────────────────────────────────────────────────
// Bluedroid callbacks (device only)
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod stack {
    use core::sync::atomic::{AtomicU16, AtomicU8, Ordering};

    use esp_idf_svc::sys::*;

    use super::{SERVICE_UUID128, cached_read_value, decode_write, post};
    use crate::commissioning::RadioEvent;
    use crate::commissioning::fields::{ADVERTISED_NAME, Characteristic};

    pub static GATTS_IF: AtomicU8 = AtomicU8::new(0);
    pub static CONN_ID: AtomicU16 = AtomicU16::new(0);
    static SVC_HANDLE: AtomicU16 = AtomicU16::new(0);
    static CHAR_STEP: AtomicU8 = AtomicU8::new(0);
    static CHAR_HANDLES: [AtomicU16; 8] = [const { AtomicU16::new(0) }; 8];

    /// Bluedroid keeps the pointer, so the bytes must be static.
    static SERVICE_UUID_LE: [u8; 16] = SERVICE_UUID128.to_le_bytes();

    pub fn adv_params() -> esp_ble_adv_params_t {
        esp_ble_adv_params_t {
            adv_int_min: 0x20,
            adv_int_max: 0x40,
            adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
            own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
            channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
            adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
            // SAFETY: plain C struct, all-zero is a valid value.
            ..unsafe { core::mem::zeroed() }
        }
    }

    fn characteristic_for(handle: u16) -> Option<Characteristic> {
        CHAR_HANDLES
            .iter()
            .position(|h| h.load(Ordering::Relaxed) == handle && handle != 0)
            .map(|i| Characteristic::ALL[i])
    }

    unsafe fn add_characteristic(svc_handle: u16, ch: Characteristic) {
        let mut uuid: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        uuid.len = 2;
        uuid.uuid.uuid16 = ch.uuid16();
        let mut perm = 0u32;
        let mut prop = 0u32;
        if ch.readable() {
            perm |= ESP_GATT_PERM_READ;
            prop |= ESP_GATT_CHAR_PROP_BIT_READ;
        }
        if ch.writable() {
            perm |= ESP_GATT_PERM_WRITE;
            prop |= ESP_GATT_CHAR_PROP_BIT_WRITE;
        }
        unsafe {
            esp_ble_gatts_add_char(
                svc_handle,
                &mut uuid,
                perm as esp_gatt_perm_t,
                prop as esp_gatt_char_prop_t,
                core::ptr::null_mut(),
                core::ptr::null_mut(),
            );
        }
    }

    unsafe fn configure_advertising() {
        let mut name = [0u8; 32];
        name[..ADVERTISED_NAME.len()].copy_from_slice(ADVERTISED_NAME.as_bytes());
        let flag = (ESP_BLE_ADV_FLAG_GEN_DISC | ESP_BLE_ADV_FLAG_BREDR_NOT_SPT) as u8;
        // The name fills most of the 31-byte advert; the service UUID goes
        // in the scan response.
        let mut adv: esp_ble_adv_data_t = unsafe { core::mem::zeroed() };
        adv.include_name = true;
        adv.flag = flag;
        let mut scan_rsp: esp_ble_adv_data_t = unsafe { core::mem::zeroed() };
        scan_rsp.set_scan_rsp = true;
        scan_rsp.service_uuid_len = SERVICE_UUID_LE.len() as u16;
        scan_rsp.p_service_uuid = SERVICE_UUID_LE.as_ptr().cast_mut();
        scan_rsp.flag = flag;
        unsafe {
            esp_ble_gap_set_device_name(name.as_ptr().cast());
            esp_ble_gap_config_adv_data(&mut adv);
            esp_ble_gap_config_adv_data(&mut scan_rsp);
        }
    }

    pub unsafe extern "C" fn gap_event_handler(event: esp_gap_ble_cb_event_t, _param: *mut esp_ble_gap_cb_param_t) {
        match event {
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => log::info!("BLE GAP: advertising started"),
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => log::info!("BLE GAP: advertising stopped"),
            _ => {}
        }
    }

    pub unsafe extern "C" fn gatts_event_handler(
        event: esp_gatts_cb_event_t,
        gatts_if: esp_gatt_if_t,
        param: *mut esp_ble_gatts_cb_param_t,
    ) {
        match event {
            esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
                GATTS_IF.store(gatts_if, Ordering::Relaxed);
                log::info!("BLE GATTS: app registered (if={})", gatts_if);
                // SAFETY: called from the Bluedroid task with a live gatts_if.
                unsafe {
                    configure_advertising();
                    let mut svc_id: esp_gatt_srvc_id_t = core::mem::zeroed();
                    svc_id.is_primary = true;
                    svc_id.id.uuid.len = 16;
                    svc_id.id.uuid.uuid.uuid128 = SERVICE_UUID_LE;
                    // Service declaration + two handles per characteristic.
                    esp_ble_gatts_create_service(gatts_if, &mut svc_id, 1 + 2 * Characteristic::ALL.len() as u16);
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
                // SAFETY: `create` is the active union member for this event.
                let svc_handle = unsafe { (*param).create.service_handle };
                SVC_HANDLE.store(svc_handle, Ordering::Relaxed);
                CHAR_STEP.store(0, Ordering::Relaxed);
                unsafe {
                    esp_ble_gatts_start_service(svc_handle);
                    add_characteristic(svc_handle, Characteristic::ALL[0]);
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
                // SAFETY: `add_char` is the active union member for this event.
                let handle = unsafe { (*param).add_char.attr_handle };
                let step = CHAR_STEP.load(Ordering::Relaxed) as usize;
                if let Some(slot) = CHAR_HANDLES.get(step) {
                    slot.store(handle, Ordering::Relaxed);
                    log::info!("BLE GATTS: {:?} handle={}", Characteristic::ALL[step], handle);
                }
                let next = step + 1;
                CHAR_STEP.store(next as u8, Ordering::Relaxed);
                if let Some(ch) = Characteristic::ALL.get(next) {
                    unsafe { add_characteristic(SVC_HANDLE.load(Ordering::Relaxed), *ch) };
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
                let conn_id = unsafe { (*param).connect.conn_id };
                CONN_ID.store(conn_id, Ordering::Relaxed);
                post(RadioEvent::PeerConnected);
            }
            esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => post(RadioEvent::PeerDisconnected),
            esp_gatts_cb_event_t_ESP_GATTS_CLOSE_EVT => post(RadioEvent::ConnectionClosed),
            esp_gatts_cb_event_t_ESP_GATTS_READ_EVT => {
                // SAFETY: `read` is the active union member for this event.
                let p = unsafe { &(*param).read };
                let value = characteristic_for(p.handle).map(cached_read_value).unwrap_or_default();
                let mut rsp: esp_gatt_rsp_t = unsafe { core::mem::zeroed() };
                unsafe {
                    let offset = (p.offset as usize).min(value.len());
                    let bytes = &value.as_bytes()[offset..];
                    rsp.attr_value.handle = p.handle;
                    rsp.attr_value.len = bytes.len() as u16;
                    rsp.attr_value.value[..bytes.len()].copy_from_slice(bytes);
                    esp_ble_gatts_send_response(gatts_if, p.conn_id, p.trans_id, esp_gatt_status_t_ESP_GATT_OK, &mut rsp);
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
                // SAFETY: `write` is the active union member; value/len
                // describe a buffer owned by Bluedroid for this call.
                let p = unsafe { &(*param).write };
                let data = unsafe { core::slice::from_raw_parts(p.value, p.len as usize) };
                let status = match characteristic_for(p.handle).map(|ch| decode_write(ch, data)) {
                    Some(Ok(event)) => {
                        post(event);
                        esp_gatt_status_t_ESP_GATT_OK
                    }
                    Some(Err(e)) => {
                        log::warn!("BLE: write rejected: {}", e);
                        esp_gatt_status_t_ESP_GATT_WRITE_NOT_PERMIT
                    }
                    None => esp_gatt_status_t_ESP_GATT_INVALID_HANDLE,
                };
                if p.need_rsp {
                    unsafe {
                        esp_ble_gatts_send_response(gatts_if, p.conn_id, p.trans_id, status, core::ptr::null_mut());
                    }
                }
            }
            _ => {}
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Radio adapter
// ───────────────────────────────────────────────────────────────

pub struct BleRadio {
    advertising: bool,
    /// Simulation: peer-drop requests, for assertions.
    #[cfg(not(target_os = "espidf"))]
    sim_disconnects: u32,
}

impl BleRadio {
    /// Bring up the controller and register the GATT application.
    /// Advertising starts only when the state machine asks for it.
    #[cfg(target_os = "espidf")]
    pub fn new() -> Result<Self, ProvisioningError> {
        use esp_idf_svc::sys::*;

        let check = |ret: i32| if ret == ESP_OK as i32 { Ok(()) } else { Err(ProvisioningError::StackInitFailed(ret)) };
        // SAFETY: called once from main before the commissioning task runs.
        unsafe {
            // BLE-only mode frees the classic BT memory (~30 KB).
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);
            let mut bt_cfg = esp_bt_controller_config_t::default();
            check(esp_bt_controller_init(&mut bt_cfg))?;
            check(esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE))?;
            check(esp_bluedroid_init())?;
            check(esp_bluedroid_enable())?;
            check(esp_ble_gap_register_callback(Some(stack::gap_event_handler)))?;
            check(esp_ble_gatts_register_callback(Some(stack::gatts_event_handler)))?;
            check(esp_ble_gatts_app_register(0))?;
        }
        info!("BLE: Bluedroid ready, service {:032x}", SERVICE_UUID128);
        Ok(Self { advertising: false })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Result<Self, ProvisioningError> {
        info!("BLE(sim): radio ready, service {:032x}", SERVICE_UUID128);
        Ok(Self {
            advertising: false,
            sim_disconnects: 0,
        })
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn sim_disconnects(&self) -> u32 {
        self.sim_disconnects
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_advertise(&mut self, on: bool) {
        use esp_idf_svc::sys::*;
        // SAFETY: the stack was initialised in new().
        unsafe {
            if on {
                let mut params = stack::adv_params();
                esp_ble_gap_start_advertising(&mut params);
            } else {
                esp_ble_gap_stop_advertising();
            }
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_advertise(&mut self, on: bool) {
        info!("BLE(sim): advertising {}", if on { "on" } else { "off" });
    }

    #[cfg(target_os = "espidf")]
    fn platform_disconnect(&mut self) {
        use core::sync::atomic::Ordering;
        use esp_idf_svc::sys::*;
        let gatts_if = stack::GATTS_IF.load(Ordering::Relaxed);
        let conn_id = stack::CONN_ID.load(Ordering::Relaxed);
        // SAFETY: closing a stale conn_id is rejected by the stack.
        unsafe { esp_ble_gatts_close(gatts_if, conn_id) };
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_disconnect(&mut self) {
        self.sim_disconnects += 1;
        info!("BLE(sim): peer disconnect requested");
    }
}

// ───────────────────────────────────────────────────────────────
// RadioPort implementation
// ───────────────────────────────────────────────────────────────

impl RadioPort for BleRadio {
    fn start_advertising(&mut self) {
        info!("BLE: advertising as '{}'", ADVERTISED_NAME);
        self.platform_advertise(true);
        self.advertising = true;
    }

    fn stop_advertising(&mut self) {
        if self.advertising {
            self.platform_advertise(false);
            self.advertising = false;
        }
    }

    fn disconnect_peer(&mut self) {
        self.platform_disconnect();
    }

    fn set_read_value(&mut self, ch: Characteristic, value: &str) {
        let Some(slot) = read_slot(ch) else {
            return;
        };
        READ_VALUES.lock(|cache| {
            let mut cache = cache.borrow_mut();
            cache[slot].clear();
            // Read values come from bounded fields; overflow leaves it empty.
            let _ = cache[slot].push_str(value);
        });
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
