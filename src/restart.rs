//! Intentional-restart marker.
//!
//! Written to NVS (`system/restart`) right before a deliberate reboot and
//! consumed on the next boot, so the cause can be reported once the
//! device is back online.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::alerts::{AlertRecord, RateLimiter, Severity, Subsystem};
use crate::app::ports::{AlertSink, StorageError, StoragePort};

pub const RESTART_NAMESPACE: &str = "system";
pub const RESTART_KEY: &str = "restart";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartCause {
    /// Button held for 3 s; provisioning was erased.
    FactoryReset,
    /// New credentials were committed over BLE.
    CommissioningComplete,
}

impl RestartCause {
    fn alert(self) -> (&'static str, Severity, Subsystem, &'static str) {
        match self {
            Self::FactoryReset => (
                "system.factory_reset",
                Severity::Warning,
                Subsystem::System,
                "Factory reset requested via button",
            ),
            Self::CommissioningComplete => (
                "provisioning.completed",
                Severity::Info,
                Subsystem::Provisioning,
                "Provisioning completed, device restarted",
            ),
        }
    }
}

pub fn write_marker<S: StoragePort + ?Sized>(store: &mut S, cause: RestartCause) -> Result<(), StorageError> {
    let mut buf = [0u8; 8];
    let bytes = postcard::to_slice(&cause, &mut buf).map_err(|_| StorageError::IoError(-1))?;
    store.write(RESTART_NAMESPACE, RESTART_KEY, bytes)?;
    info!("System: restart marker written ({:?})", cause);
    Ok(())
}

/// Read and delete the marker.  An unreadable marker is discarded.
pub fn take_marker<S: StoragePort + ?Sized>(store: &mut S) -> Option<RestartCause> {
    let mut buf = [0u8; 8];
    let len = match store.read(RESTART_NAMESPACE, RESTART_KEY, &mut buf) {
        Ok(len) => len,
        Err(StorageError::NotFound) => return None,
        Err(e) => {
            warn!("System: restart marker read failed: {}", e);
            return None;
        }
    };
    if let Err(e) = store.delete(RESTART_NAMESPACE, RESTART_KEY) {
        warn!("System: restart marker delete failed: {}", e);
    }
    match postcard::from_bytes(&buf[..len]) {
        Ok(cause) => Some(cause),
        Err(_) => {
            warn!("System: discarding corrupted restart marker");
            None
        }
    }
}

/// Raise the boot alert for `cause`, at most once per boot.
pub fn report<S: AlertSink + ?Sized>(cause: RestartCause, wall_ms: u64, limiter: &RateLimiter, sink: &mut S) {
    let (code, severity, subsystem, message) = cause.alert();
    if limiter.once(code) {
        sink.submit(AlertRecord::new(wall_ms, code, severity, subsystem, message));
    }
}
