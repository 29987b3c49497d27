//! Edge-triggered sensor health alerts.
//!
//! Each physical sensor starts out presumed healthy.  A failing read raises
//! `sensor.<group>_read_failed` once; the next good read raises
//! `sensor.<group>_recovered` once.  Steady states raise nothing, so a dead
//! probe does not flood the alert queue every cycle.
//!
//! Hardware that never answered at boot ([`SensorError::NotPresent`]) is
//! reported through the capabilities message instead and stays silent here.

use serde_json::json;

use crate::alerts::{AlertRecord, COOLDOWN_1MIN, COOLDOWN_5MIN, RateLimiter, Severity, Subsystem, Verdict};
use crate::app::ports::{AlertSink, Timestamp};
use crate::app::telemetry::{SensorGroup, SensorSample};
use crate::error::SensorError;

struct Codes {
    failed: &'static str,
    recovered: &'static str,
    failed_msg: &'static str,
    recovered_msg: &'static str,
}

const fn codes(group: SensorGroup) -> Codes {
    match group {
        SensorGroup::Soil => Codes {
            failed: "sensor.soil_read_failed",
            recovered: "sensor.soil_recovered",
            failed_msg: "Soil ADC read failed",
            recovered_msg: "Soil sensor recovered",
        },
        SensorGroup::Climate => Codes {
            failed: "sensor.climate_read_failed",
            recovered: "sensor.climate_recovered",
            failed_msg: "BME280 read failed",
            recovered_msg: "BME280 recovered",
        },
        SensorGroup::Light => Codes {
            failed: "sensor.light_read_failed",
            recovered: "sensor.light_recovered",
            failed_msg: "VEML7700 read failed",
            recovered_msg: "VEML7700 recovered",
        },
    }
}

pub struct AvailabilityTracker {
    healthy: [bool; SensorGroup::ALL.len()],
}

impl AvailabilityTracker {
    pub const fn new() -> Self {
        Self {
            healthy: [true; SensorGroup::ALL.len()],
        }
    }

    pub fn is_healthy(&self, group: SensorGroup) -> bool {
        self.healthy[group as usize]
    }

    /// Compare this sample with the previous one and raise edge alerts.
    pub fn observe<S: AlertSink + ?Sized>(
        &mut self,
        sample: &SensorSample,
        now: Timestamp,
        limiter: &RateLimiter,
        sink: &mut S,
    ) {
        for group in SensorGroup::ALL {
            let was_healthy = self.healthy[group as usize];
            let codes = codes(group);
            match sample.result(group) {
                Ok(()) => {
                    if !was_healthy
                        && limiter.allow(codes.recovered, now.monotonic_ms, COOLDOWN_1MIN).is_allowed()
                    {
                        sink.submit(AlertRecord::new(
                            now.wall_ms,
                            codes.recovered,
                            Severity::Info,
                            Subsystem::Sensor,
                            codes.recovered_msg,
                        ));
                    }
                    self.healthy[group as usize] = true;
                }
                Err(SensorError::NotPresent) => {}
                Err(err) => {
                    if was_healthy {
                        if let Verdict::Allowed { suppressed } =
                            limiter.allow(codes.failed, now.monotonic_ms, COOLDOWN_5MIN)
                        {
                            sink.submit(
                                AlertRecord::new(
                                    now.wall_ms,
                                    codes.failed,
                                    Severity::Warning,
                                    Subsystem::Sensor,
                                    codes.failed_msg,
                                )
                                .with_details(json!({ "err": err.code(), "suppressed": suppressed })),
                            );
                        }
                    }
                    self.healthy[group as usize] = false;
                }
            }
        }
    }
}

impl Default for AvailabilityTracker {
    fn default() -> Self {
        Self::new()
    }
}
