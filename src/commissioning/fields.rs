//! GATT layout and the commissioning scratch area.
//!
//! | UUID   | Field          | Access |
//! |--------|----------------|--------|
//! | 0xFF01 | WiFi SSID      | R/W    |
//! | 0xFF02 | WiFi password  | W      |
//! | 0xFF03 | control        | W      |
//! | 0xFF04 | broker URI     | R/W    |
//! | 0xFF05 | MQTT login     | W      |
//! | 0xFF06 | MQTT password  | W      |
//! | 0xFF07 | user id        | W      |
//! | 0xFF08 | device id      | R      |

use log::info;

use crate::app::ports::{ConfigStore, StorageError};
use crate::config::{ProvisioningConfig, ProvisioningField};

pub const SERVICE_UUID: &str = "12345678-90ab-cdef-1234-567890abcdef";
pub const ADVERTISED_NAME: &str = "SMART_GARDEN_PROV";

/// Byte written to the control characteristic to commit.
pub const COMMIT_BYTE: u8 = 0x01;

/// Largest value any characteristic carries.
pub const MAX_VALUE_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Characteristic {
    Ssid = 0xFF01,
    Password = 0xFF02,
    Control = 0xFF03,
    Broker = 0xFF04,
    MqttLogin = 0xFF05,
    MqttPassword = 0xFF06,
    UserId = 0xFF07,
    DeviceId = 0xFF08,
}

impl Characteristic {
    pub const ALL: [Self; 8] = [
        Self::Ssid,
        Self::Password,
        Self::Control,
        Self::Broker,
        Self::MqttLogin,
        Self::MqttPassword,
        Self::UserId,
        Self::DeviceId,
    ];

    pub fn from_uuid16(uuid: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|c| *c as u16 == uuid)
    }

    pub const fn uuid16(self) -> u16 {
        self as u16
    }

    /// The provisioning value this characteristic writes, if any.
    pub const fn field(self) -> Option<ProvisioningField> {
        match self {
            Self::Ssid => Some(ProvisioningField::Ssid),
            Self::Password => Some(ProvisioningField::Password),
            Self::Broker => Some(ProvisioningField::Broker),
            Self::MqttLogin => Some(ProvisioningField::MqttLogin),
            Self::MqttPassword => Some(ProvisioningField::MqttPassword),
            Self::UserId => Some(ProvisioningField::UserId),
            Self::Control | Self::DeviceId => None,
        }
    }

    pub const fn readable(self) -> bool {
        matches!(self, Self::Ssid | Self::Broker | Self::DeviceId)
    }

    pub const fn writable(self) -> bool {
        !matches!(self, Self::DeviceId)
    }
}

/// Value served for a read.  Empty for write-only characteristics.
pub fn read_value<C: ConfigStore + ?Sized>(
    ch: Characteristic,
    store: &C,
    device_id: &str,
) -> heapless::String<MAX_VALUE_LEN> {
    let mut out = heapless::String::new();
    let value = match ch {
        Characteristic::DeviceId => device_id.into(),
        Characteristic::Ssid | Characteristic::Broker => {
            let cfg = store.load_provisioning();
            ch.field().map(|f| String::from(cfg.get(f))).unwrap_or_default()
        }
        _ => String::new(),
    };
    push_truncated(&mut out, &value, MAX_VALUE_LEN);
    out
}

fn push_truncated<const N: usize>(dst: &mut heapless::String<N>, value: &str, limit: usize) {
    let mut end = value.len().min(limit).min(N);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    // Cannot fail: `end <= N`.
    let _ = dst.push_str(&value[..end]);
}

// ── Scratch ──────────────────────────────────────────────────

/// Values written during one window, not yet persisted.
#[derive(Debug, Default, Clone)]
pub struct Scratch {
    values: ProvisioningConfig,
    dirty: [bool; ProvisioningField::ALL.len()],
}

impl Scratch {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Stage one write.  Over-long values are truncated to the field limit.
    pub fn write(&mut self, field: ProvisioningField, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let mut bounded = heapless::String::<MAX_VALUE_LEN>::new();
        push_truncated(&mut bounded, &text, field.max_len());
        // Cannot fail after truncation.
        let _ = self.values.set(field, &bounded);
        self.dirty[field as usize] = true;
        if field.is_secret() {
            info!("BLE: {} received: ***", field);
        } else {
            info!("BLE: {} received: {}", field, bounded);
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.iter().any(|d| *d)
    }

    pub fn get(&self, field: ProvisioningField) -> Option<&str> {
        self.dirty[field as usize].then(|| self.values.get(field))
    }

    /// `true` when [`persist`](Self::persist) has at least one value to save.
    pub fn has_values(&self) -> bool {
        ProvisioningField::ALL
            .into_iter()
            .any(|f| self.get(f).is_some_and(|v| !v.is_empty()))
    }

    /// Persist dirty, non-empty fields.  Every field is attempted; the first
    /// failure is returned.
    pub fn persist<C: ConfigStore + ?Sized>(&self, store: &mut C) -> Result<usize, StorageError> {
        let mut saved = 0;
        let mut first_err = None;
        for field in ProvisioningField::ALL {
            let Some(value) = self.get(field).filter(|v| !v.is_empty()) else {
                continue;
            };
            match store.save_provisioning_field(field, value) {
                Ok(()) => saved += 1,
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(saved),
        }
    }
}
