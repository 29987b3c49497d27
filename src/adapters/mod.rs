//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements       | Connects to                    |
//! |-------------|------------------|--------------------------------|
//! | `ble`       | RadioPort        | Bluedroid GATT server          |
//! | `device_id` | -                | eFuse station MAC              |
//! | `hardware`  | SensorPort       | ADC, GPIO, I2C sensors         |
//! |             | PumpPort         | Pump relay GPIO                |
//! | `mqtt`      | TransportPort    | ESP-MQTT client                |
//! | `nvs`       | StoragePort      | NVS / in-memory store          |
//! |             | ConfigStore      | (blanket impl)                 |
//! | `system`    | RestartPort      | `esp_restart`                  |
//! | `time`      | Clock            | ESP timer, SNTP                |
//! | `wifi`      | -                | ESP-IDF WiFi STA               |

pub mod ble;
pub mod device_id;
pub mod hardware;
pub mod mqtt;
pub mod nvs;
pub mod system;
pub mod time;
pub mod wifi;
