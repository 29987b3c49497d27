//! Hardware adapter: bridges real peripherals to domain port traits.
//!
//! The [`SensorHub`] is exposed through [`SensorPort`] and the
//! [`PumpDriver`] through [`PumpPort`].  They live in different tasks
//! (orchestrator and watering worker), so each gets its own impl rather
//! than one combined adapter.  On non-espidf targets the underlying
//! drivers use cfg-gated simulation stubs.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::app::ports::{PumpPort, SensorPort};
use crate::app::telemetry::{FieldMask, SensorSample};
use crate::drivers::pump::PumpDriver;
use crate::sensors::SensorHub;

// ── SensorPort implementation ─────────────────────────────────

impl<I: I2c, D: DelayNs> SensorPort for SensorHub<I, D> {
    fn sample(&mut self) -> SensorSample {
        self.read_all()
    }

    fn available_fields(&self) -> FieldMask {
        SensorHub::available_fields(self)
    }

    fn water_tank_low(&mut self) -> bool {
        self.water_low()
    }
}

// ── PumpPort implementation ───────────────────────────────────

impl PumpPort for PumpDriver {
    fn set_running(&mut self, on: bool) {
        if on { self.start() } else { self.stop() }
    }

    fn is_running(&self) -> bool {
        PumpDriver::is_running(self)
    }
}
