//! GPIO / peripheral pin assignments for the Smart Garden controller board.
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers.

// ---------------------------------------------------------------------------
// Actuators
// ---------------------------------------------------------------------------

/// Digital output driving the pump MOSFET (active HIGH).
pub const PUMP_GPIO: i32 = 2;

// ---------------------------------------------------------------------------
// Sensors: soil moisture (capacitive probe, switched supply)
// ---------------------------------------------------------------------------

/// Digital output powering the soil probe only while a sample is taken.
pub const SOIL_POWER_GPIO: i32 = 27;
/// ADC1 channel 6 (GPIO 34 on ESP32).
pub const SOIL_ADC_CHANNEL: u32 = 6;
/// Raw ADC count for completely dry soil.
pub const SOIL_DRY_RAW: i32 = 2800;
/// Raw ADC count for saturated soil.
pub const SOIL_WET_RAW: i32 = 1200;
/// Settling time after powering the probe (ms).
pub const SOIL_POWER_UP_DELAY_MS: u32 = 50;

// ---------------------------------------------------------------------------
// Sensors: water tank float switch
// ---------------------------------------------------------------------------

/// Digital input, pulled up only during a read.  LOW = tank low.
pub const WATER_LEVEL_GPIO: i32 = 18;

// ---------------------------------------------------------------------------
// I2C bus (BME280 climate + VEML7700 ambient light)
// ---------------------------------------------------------------------------

pub const I2C_SDA_GPIO: i32 = 21;
pub const I2C_SCL_GPIO: i32 = 22;
pub const I2C_FREQ_HZ: u32 = 100_000;

// ---------------------------------------------------------------------------
// User input
// ---------------------------------------------------------------------------

/// BOOT button, active LOW with internal pull-up.
pub const BUTTON_GPIO: i32 = 0;
