use chrono::NaiveDateTime;
use core::fmt::Write as _;
use embassy_time::Instant;
use heapless::{String, Vec};
use serde::{Serialize, Serializer, ser::SerializeStruct};

use crate::{
    config::{MAX_SENSORS, NAME_SIZE, SensorSpec, TAGS_SIZE},
    fmt::FormatableNaiveDateTime,
    sensor::{DriverError, Quantity, Reading, Readings, SensorKind},
};

/// Outcome of sampling one sensor in one cycle.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SampleResult {
    pub sensor_index: usize,
    pub kind: SensorKind,
    pub tags: String<TAGS_SIZE>,
    pub outcome: Result<Readings, DriverError>,
    /// At least one reading moved beyond its threshold since it was last reported.
    pub changed: bool,
}

impl SampleResult {
    pub fn readings(&self) -> &[Reading] {
        match &self.outcome {
            Ok(readings) => readings.as_slice(),
            Err(_) => &[],
        }
    }

    pub fn error(&self) -> Option<DriverError> {
        self.outcome.as_ref().err().copied()
    }
}

impl Serialize for SampleResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("SampleResult", 6)?;
        s.serialize_field("sensor", &self.sensor_index)?;
        s.serialize_field("type", &self.kind)?;
        s.serialize_field("tags", self.tags.as_str())?;
        s.serialize_field("changed", &self.changed)?;
        s.serialize_field("readings", self.readings())?;
        s.serialize_field("error", &self.error())?;
        s.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub uptime: Instant,
    /// Only known once the wall clock has been synchronized.
    pub utc: Option<NaiveDateTime>,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Timestamp {
    fn format(&self, f: defmt::Formatter) {
        match &self.utc {
            Some(utc) => defmt::write!(f, "{} (uptime {}ms)", FormatableNaiveDateTime(utc), self.uptime.as_millis()),
            None => defmt::write!(f, "uptime {}ms", self.uptime.as_millis()),
        }
    }
}

impl core::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.utc {
            Some(utc) => write!(f, "{} (uptime {}ms)", FormatableNaiveDateTime(utc), self.uptime.as_millis()),
            None => write!(f, "uptime {}ms", self.uptime.as_millis()),
        }
    }
}

/// Everything sampled in one cycle, in configuration order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AcquisitionBatch {
    pub device_name: String<NAME_SIZE>,
    pub timestamp: Timestamp,
    pub results: Vec<SampleResult, MAX_SENSORS>,
}

impl AcquisitionBatch {
    /// `true` when any sensor reported a significant change this cycle.
    pub fn upload_requested(&self) -> bool {
        self.results.iter().any(|result| result.changed)
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|result| result.outcome.is_err()).count()
    }
}

impl Serialize for AcquisitionBatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // ISO 8601 without a zone, UTC is implied
        let utc = self.timestamp.utc.map(|utc| {
            let mut text = String::<32>::new();
            let _ = write!(text, "{}T{}", utc.date(), utc.time());
            text
        });
        let mut s = serializer.serialize_struct("AcquisitionBatch", 5)?;
        s.serialize_field("device", self.device_name.as_str())?;
        s.serialize_field("uptime_ms", &self.timestamp.uptime.as_millis())?;
        s.serialize_field("utc", &utc.as_ref().map(|text| text.as_str()))?;
        s.serialize_field("upload", &self.upload_requested())?;
        s.serialize_field("results", self.results.as_slice())?;
        s.end()
    }
}

const QUANTITIES: usize = 4;

fn slot(quantity: Quantity) -> usize {
    match quantity {
        Quantity::Voltage => 0,
        Quantity::Temperature => 1,
        Quantity::Humidity => 2,
        Quantity::Pressure => 3,
    }
}

/// Remembers the last reported value per sensor and quantity.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    reported: [[Option<f32>; QUANTITIES]; MAX_SENSORS],
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares `readings` against the last reported values and remembers every reading that changed.
    pub fn update(&mut self, sensor_index: usize, spec: &SensorSpec, readings: &[Reading]) -> bool {
        let Some(reported) = self.reported.get_mut(sensor_index) else {
            return false;
        };
        let mut changed = false;
        for reading in readings {
            let last = &mut reported[slot(reading.quantity)];
            let significant = match *last {
                None => true,
                Some(last) => {
                    let delta = if reading.value > last { reading.value - last } else { last - reading.value };
                    delta > spec.threshold(reading.quantity)
                }
            };
            if significant {
                trace!("Changes> sensor {} {:?}: {:?} -> {}", sensor_index, reading.quantity, *last, reading.value);
                *last = Some(reading.value);
                changed = true;
            }
        }
        changed
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
