//! [`ConfigStore`] on top of any [`StoragePort`].
//!
//! | Record              | Namespace     | Key(s)                     | Encoding |
//! |---------------------|---------------|----------------------------|----------|
//! | `DeviceSettings`    | `storage`     | `settings`                 | postcard |
//! | `ProvisioningConfig`| `wifi_config` | `ssid`, `pass`, `broker_uri`, `mqtt_login`, `mqtt_pass`, `user_id` | UTF-8 |

use log::{info, warn};

use crate::app::ports::{ConfigError, ConfigStore, StorageError, StoragePort};
use crate::config::{
    DeviceSettings, PROVISIONING_NAMESPACE, ProvisioningConfig, ProvisioningField,
    SETTINGS_KEY, SETTINGS_NAMESPACE,
};

const SETTINGS_BLOB_MAX: usize = 128;
const FIELD_BUF_LEN: usize = 128;

impl<S: StoragePort> ConfigStore for S {
    fn load_settings(&self) -> Result<DeviceSettings, ConfigError> {
        let mut buf = [0u8; SETTINGS_BLOB_MAX];
        match self.read(SETTINGS_NAMESPACE, SETTINGS_KEY, &mut buf) {
            Ok(len) => {
                let settings = postcard::from_bytes(&buf[..len]).map_err(|_| ConfigError::Corrupted)?;
                info!("Settings: loaded from NVS ({} bytes)", len);
                Ok(settings)
            }
            Err(StorageError::NotFound) => {
                info!("Settings: none stored, using defaults");
                Ok(DeviceSettings::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save_settings(&mut self, settings: &DeviceSettings) -> Result<(), ConfigError> {
        let mut buf = [0u8; SETTINGS_BLOB_MAX];
        let bytes = postcard::to_slice(settings, &mut buf)
            .map_err(|_| ConfigError::ValidationFailed("settings blob too large"))?;
        self.write(SETTINGS_NAMESPACE, SETTINGS_KEY, bytes)?;
        info!("Settings: saved ({} bytes)", bytes.len());
        Ok(())
    }

    fn load_provisioning(&self) -> ProvisioningConfig {
        let mut cfg = ProvisioningConfig::default();
        let mut buf = [0u8; FIELD_BUF_LEN];
        for field in ProvisioningField::ALL {
            let len = match self.read(PROVISIONING_NAMESPACE, field.nvs_key(), &mut buf) {
                Ok(len) => len,
                Err(StorageError::NotFound) => continue,
                Err(e) => {
                    warn!("Provisioning: read '{}' failed: {}", field, e);
                    continue;
                }
            };
            let value = core::str::from_utf8(&buf[..len]).unwrap_or_default();
            if cfg.set(field, value).is_err() {
                warn!("Provisioning: stored '{}' exceeds {} bytes, ignored", field, field.max_len());
            }
        }
        cfg
    }

    fn save_provisioning_field(&mut self, field: ProvisioningField, value: &str) -> Result<(), StorageError> {
        self.write(PROVISIONING_NAMESPACE, field.nvs_key(), value.as_bytes())
    }

    fn erase_provisioning(&mut self) -> Result<(), StorageError> {
        for field in ProvisioningField::ALL {
            self.delete(PROVISIONING_NAMESPACE, field.nvs_key())?;
        }
        info!("Provisioning: credentials erased");
        Ok(())
    }
}
