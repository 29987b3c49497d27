//! Core-pinned thread spawning for the dual-core ESP32.
//!
//! ESP-IDF implements `std::thread` on pthreads, which wrap FreeRTOS
//! tasks.  `esp_pthread_set_cfg()` configures the *next*
//! `pthread_create()` from the calling thread, so the config→spawn pair
//! must not interleave with other thread creation on that thread.
//!
//! | Task           | Core | Priority | Stack |
//! |----------------|------|----------|-------|
//! | `network`      | Pro  | 5        | 12 KB |
//! | `orchestrator` | App  | 5        | 10 KB |
//! | `watering`     | App  | 6        | 4 KB  |
//! | `commission`   | Pro  | 4        | 6 KB  |
//! | `button`       | App  | 3        | 3 KB  |

use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Core {
    /// Core 0 (PRO_CPU): WiFi, BLE and lwIP run here.
    Pro = 0,
    /// Core 1 (APP_CPU).
    App = 1,
}

/// Spawn a thread pinned to `core`.  `name` must be NUL-terminated
/// (e.g. `"network\0"`).
#[cfg(target_os = "espidf")]
pub fn spawn_on_core(
    core: Core,
    priority: u8,
    stack_kb: usize,
    name: &'static str,
    f: impl FnOnce() + Send + 'static,
) -> io::Result<std::thread::JoinHandle<()>> {
    // SAFETY: `name` is 'static and NUL-terminated; the config is copied
    // by esp_pthread_set_cfg.
    let ret = unsafe {
        let mut cfg = esp_idf_svc::sys::esp_create_default_pthread_config();
        cfg.pin_to_core = core as i32;
        cfg.prio = i32::from(priority);
        cfg.stack_size = (stack_kb * 1024) as _;
        cfg.thread_name = name.as_ptr().cast();
        esp_idf_svc::sys::esp_pthread_set_cfg(&cfg)
    };
    if ret != esp_idf_svc::sys::ESP_OK as i32 {
        return Err(io::Error::other(format!("esp_pthread_set_cfg failed: {}", ret)));
    }

    let display_name = name.trim_end_matches('\0');
    log::info!(
        "System: spawning '{}' on {:?} (pri={}, stack={}KB)",
        display_name,
        core,
        priority,
        stack_kb
    );
    std::thread::Builder::new().name(display_name.into()).spawn(f)
}

/// Host fallback: core and priority are ignored.
#[cfg(not(target_os = "espidf"))]
pub fn spawn_on_core(
    _core: Core,
    _priority: u8,
    stack_kb: usize,
    name: &'static str,
    f: impl FnOnce() + Send + 'static,
) -> io::Result<std::thread::JoinHandle<()>> {
    let display_name = name.trim_end_matches('\0');
    log::info!("System(sim): spawning '{}' (stack={}KB)", display_name, stack_kb);
    std::thread::Builder::new()
        .name(display_name.into())
        .stack_size(stack_kb.max(64) * 1024)
        .spawn(f)
}
