//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`StoragePort`]; the typed [`ConfigStore`](crate::app::ports::ConfigStore)
//! view comes for free through the blanket impl in [`crate::app::store`].
//!
//! - On ESP32 every call opens the namespace, performs one operation and
//!   commits, so handles are never held across tasks.  Clones are free.
//! - On the host a shared, lock-protected in-memory map keyed `"namespace::key"` stands in
//!   for flash.  Clones see the same map, mirroring a single partition.

use crate::app::ports::{StorageError, StoragePort};
use log::info;

#[cfg(not(target_os = "espidf"))]
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;
#[cfg(target_os = "espidf")]
use log::warn;

/// NVS namespace and key names are limited to 15 characters.
#[cfg(target_os = "espidf")]
const NVS_NAME_MAX: usize = 15;

#[cfg(target_os = "espidf")]
const OK: i32 = ESP_OK as i32;
#[cfg(target_os = "espidf")]
const NOT_FOUND: i32 = ESP_ERR_NVS_NOT_FOUND as i32;

#[derive(Clone)]
pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl NvsAdapter {
    /// Initialise the default NVS partition.
    ///
    /// On first boot or after a layout version change the partition is
    /// erased and re-initialised, matching the ESP-IDF examples.
    pub fn new() -> Result<Self, StorageError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: nvs_flash_init / nvs_flash_erase run from main before
            // any task touches NVS; repeated init returns ESP_OK.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES as i32 || ret == ESP_ERR_NVS_NEW_VERSION_FOUND as i32 {
                warn!("NVS: erasing and re-initialising flash partition");
                let ret = unsafe { nvs_flash_erase() };
                if ret != OK {
                    return Err(StorageError::IoError(ret));
                }
                let ret = unsafe { nvs_flash_init() };
                if ret != OK {
                    return Err(StorageError::IoError(ret));
                }
            } else if ret != OK {
                return Err(StorageError::IoError(ret));
            }
            info!("NVS: flash partition ready");
            Ok(Self {})
        }

        #[cfg(not(target_os = "espidf"))]
        {
            info!("NVS: simulation backend");
            Ok(Self {
                store: Arc::new(Mutex::new(HashMap::new())),
            })
        }
    }

    /// A poisoned lock only means a test thread panicked mid-write.
    #[cfg(not(target_os = "espidf"))]
    fn map(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    /// Copy a namespace or key name into a NUL-terminated buffer.
    #[cfg(target_os = "espidf")]
    fn c_name(name: &str) -> [u8; NVS_NAME_MAX + 1] {
        let mut buf = [0u8; NVS_NAME_MAX + 1];
        let bytes = name.as_bytes();
        let len = bytes.len().min(NVS_NAME_MAX);
        buf[..len].copy_from_slice(&bytes[..len]);
        buf
    }

    /// Open an NVS namespace, execute a closure with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns = Self::c_name(namespace);
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let mut handle: nvs_handle_t = 0;
        // SAFETY: `ns` is NUL-terminated and outlives the call.
        let ret = unsafe { nvs_open(ns.as_ptr().cast(), mode, &mut handle) };
        if ret != OK {
            return Err(ret);
        }

        let result = f(handle);
        // SAFETY: handle was opened above and is not used after this point.
        unsafe { nvs_close(handle) };
        result
    }

    #[cfg(target_os = "espidf")]
    fn map_err(rc: i32) -> StorageError {
        match rc {
            NOT_FOUND => StorageError::NotFound,
            rc if rc == ESP_ERR_NVS_NOT_ENOUGH_SPACE as i32 => StorageError::Full,
            other => StorageError::IoError(other),
        }
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            match self.map().get(&composite) {
                Some(data) => {
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    Ok(len)
                }
                None => Err(StorageError::NotFound),
            }
        }

        #[cfg(target_os = "espidf")]
        {
            Self::with_nvs_handle(namespace, false, |handle| {
                let key = Self::c_name(key);
                let mut size = buf.len();
                // SAFETY: `buf` is valid for `size` bytes; NVS writes at most that.
                let ret = unsafe {
                    nvs_get_blob(handle, key.as_ptr().cast(), buf.as_mut_ptr().cast(), &mut size)
                };
                if ret != OK {
                    return Err(ret);
                }
                Ok(size)
            })
            .map_err(Self::map_err)
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.map().insert(composite, data.to_vec());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            Self::with_nvs_handle(namespace, true, |handle| {
                let key = Self::c_name(key);
                // SAFETY: `data` is valid for `data.len()` bytes.
                let ret = unsafe {
                    nvs_set_blob(handle, key.as_ptr().cast(), data.as_ptr().cast(), data.len())
                };
                if ret != OK {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != OK {
                    return Err(ret);
                }
                Ok(())
            })
            .map_err(Self::map_err)
        }
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.map().remove(&composite);
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                let key = Self::c_name(key);
                let ret = unsafe { nvs_erase_key(handle, key.as_ptr().cast()) };
                if ret != OK && ret != NOT_FOUND {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != OK {
                    return Err(ret);
                }
                Ok(())
            });
            match result {
                // A namespace that was never written cannot be opened read-write
                // on a fresh partition; nothing to delete then.
                Err(NOT_FOUND) => Ok(()),
                other => other.map_err(Self::map_err),
            }
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.map().contains_key(&composite)
        }

        #[cfg(target_os = "espidf")]
        {
            Self::with_nvs_handle(namespace, false, |handle| {
                let key = Self::c_name(key);
                let ret = unsafe { nvs_find_key(handle, key.as_ptr().cast(), core::ptr::null_mut()) };
                Ok(ret == OK)
            })
            .unwrap_or(false)
        }
    }
}
