//! Telemetry data model: metrics, field selection masks and records.

use crate::error::SensorError;

/// One published metric.  Declaration order is wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Metric {
    SoilMoisture = 0,
    AirTemperature = 1,
    AirHumidity = 2,
    Pressure = 3,
    Light = 4,
    WaterTank = 5,
}

impl Metric {
    pub const ALL: [Self; 6] = [
        Self::SoilMoisture,
        Self::AirTemperature,
        Self::AirHumidity,
        Self::Pressure,
        Self::Light,
        Self::WaterTank,
    ];

    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::SoilMoisture => "soil_moisture_pct",
            Self::AirTemperature => "air_temperature_c",
            Self::AirHumidity => "air_humidity_pct",
            Self::Pressure => "pressure_hpa",
            Self::Light => "light_lux",
            Self::WaterTank => "water_tank_ok",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.wire_name() == name)
    }

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Bit set over [`Metric`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMask(u8);

impl FieldMask {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(0b0011_1111);

    pub const fn contains(self, metric: Metric) -> bool {
        self.0 & metric.bit() != 0
    }

    pub const fn with(self, metric: Metric) -> Self {
        Self(self.0 | metric.bit())
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// An empty selection means "everything".
    pub const fn or_all(self) -> Self {
        if self.is_empty() { Self::ALL } else { self }
    }

    pub fn iter(self) -> impl Iterator<Item = Metric> {
        Metric::ALL.into_iter().filter(move |m| self.contains(*m))
    }
}

impl Default for FieldMask {
    fn default() -> Self {
        Self::ALL
    }
}

impl FromIterator<Metric> for FieldMask {
    fn from_iter<I: IntoIterator<Item = Metric>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

// ---------------------------------------------------------------------------
// Sensor sample (what the hardware produced this cycle)
// ---------------------------------------------------------------------------

/// Values from the BME280.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Climate {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub pressure_hpa: f32,
}

/// A physical sensor; one failure covers every metric it provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorGroup {
    Soil,
    Climate,
    Light,
}

impl SensorGroup {
    pub const ALL: [Self; 3] = [Self::Soil, Self::Climate, Self::Light];
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    pub soil_pct: Result<i32, SensorError>,
    pub climate: Result<Climate, SensorError>,
    pub light_lux: Result<f32, SensorError>,
    /// Float switch reads the tank as low.
    pub water_low: bool,
}

impl SensorSample {
    pub fn result(&self, group: SensorGroup) -> Result<(), SensorError> {
        match group {
            SensorGroup::Soil => self.soil_pct.map(|_| ()),
            SensorGroup::Climate => self.climate.map(|_| ()),
            SensorGroup::Light => self.light_lux.map(|_| ()),
        }
    }

    pub fn readings(&self) -> Readings {
        let climate = self.climate.ok();
        Readings {
            soil_moisture_pct: self.soil_pct.ok().filter(|v| *v >= 0),
            air_temperature_c: climate.map(|c| c.temperature_c).filter(|v| !v.is_nan()),
            air_humidity_pct: climate.map(|c| c.humidity_pct).filter(|v| !v.is_nan()),
            pressure_hpa: climate.map(|c| c.pressure_hpa).filter(|v| !v.is_nan()),
            light_lux: self.light_lux.ok().filter(|v| !v.is_nan()),
            water_tank_ok: Some(!self.water_low),
        }
    }
}

// ---------------------------------------------------------------------------
// Telemetry record (what gets published or buffered)
// ---------------------------------------------------------------------------

/// Metric values; `None` means unavailable this cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Readings {
    pub soil_moisture_pct: Option<i32>,
    pub air_temperature_c: Option<f32>,
    pub air_humidity_pct: Option<f32>,
    pub pressure_hpa: Option<f32>,
    pub light_lux: Option<f32>,
    pub water_tank_ok: Option<bool>,
}

impl Readings {
    /// Metrics that carry a value.
    pub fn available(&self) -> FieldMask {
        let mut mask = FieldMask::NONE;
        let present = [
            (Metric::SoilMoisture, self.soil_moisture_pct.is_some()),
            (Metric::AirTemperature, self.air_temperature_c.is_some()),
            (Metric::AirHumidity, self.air_humidity_pct.is_some()),
            (Metric::Pressure, self.pressure_hpa.is_some()),
            (Metric::Light, self.light_lux.is_some()),
            (Metric::WaterTank, self.water_tank_ok.is_some()),
        ];
        for (metric, ok) in present {
            if ok {
                mask = mask.with(metric);
            }
        }
        mask
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryRecord {
    pub timestamp_ms: u64,
    pub readings: Readings,
    /// Which metrics to publish; the rest go out as `null`.
    pub fields: FieldMask,
}

impl TelemetryRecord {
    pub fn new(timestamp_ms: u64, readings: Readings) -> Self {
        Self {
            timestamp_ms,
            readings,
            fields: FieldMask::ALL,
        }
    }

    pub fn masked(mut self, fields: FieldMask) -> Self {
        self.fields = fields.or_all();
        self
    }
}
