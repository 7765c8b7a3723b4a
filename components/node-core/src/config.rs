use embassy_time::Duration;
use heapless::{String, Vec};
use serde::{
    Deserialize, Deserializer,
    de::{self, SeqAccess, Visitor},
};

use crate::sensor::{Quantity, SensorKind, adc_divider::DividerCalibration};

pub const MAX_SENSORS: usize = 8;
pub const NAME_SIZE: usize = 32;
pub const TAGS_SIZE: usize = 32;

pub const MAX_GPIO_PIN: u8 = 63;
pub const MAX_ADC_CHANNEL: u8 = 7;
pub const MAX_OVERSAMPLE: u8 = 64;
pub const MAX_SAMPLE_ATTEMPTS: u8 = 5;

pub const BME280_PRIMARY_ADDRESS: u8 = 0x76;
pub const BME280_SECONDARY_ADDRESS: u8 = 0x77;

const TYPE_SIZE: usize = 16;
// unescaped copy of the longest string value
const ESCAPE_BUFFER_SIZE: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    Syntax,
    InvalidType,
    MissingField { field: &'static str, sensor: Option<usize> },
    OutOfRange { field: &'static str, sensor: Option<usize> },
    UnknownSensorType { sensor: usize },
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::Syntax => write!(f, "configuration is not well-formed JSON"),
            ConfigError::InvalidType => write!(f, "configuration field has the wrong type"),
            ConfigError::MissingField { field, sensor: None } => write!(f, "missing field '{}'", field),
            ConfigError::MissingField { field, sensor: Some(i) } => write!(f, "sensor {}: missing field '{}'", i, field),
            ConfigError::OutOfRange { field, sensor: None } => write!(f, "field '{}' is out of range", field),
            ConfigError::OutOfRange { field, sensor: Some(i) } => write!(f, "sensor {}: field '{}' is out of range", i, field),
            ConfigError::UnknownSensorType { sensor } => write!(f, "sensor {}: unknown sensor type", sensor),
        }
    }
}

impl core::error::Error for ConfigError {}

impl From<serde_json_core::de::Error> for ConfigError {
    fn from(err: serde_json_core::de::Error) -> Self {
        use serde_json_core::de::Error;
        match err {
            Error::InvalidType | Error::InvalidNumber => ConfigError::InvalidType,
            // duplicate keys and every other structural problem
            _ => ConfigError::Syntax,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    pub device_name: String<NAME_SIZE>,
    pub sleep_interval: Duration,
    pub sample_attempts: u8,
    pub sensors: Vec<SensorSpec, MAX_SENSORS>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorSpec {
    AdcDivider(AdcDividerSpec),
    Bme280(Bme280Spec),
}

impl SensorSpec {
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorSpec::AdcDivider(_) => SensorKind::Adc,
            SensorSpec::Bme280(_) => SensorKind::Bme280,
        }
    }

    pub fn tags(&self) -> &str {
        match self {
            SensorSpec::AdcDivider(spec) => spec.tags.as_str(),
            SensorSpec::Bme280(spec) => spec.tags.as_str(),
        }
    }

    /// Minimum change of `quantity` that counts as a new value worth reporting.
    pub fn threshold(&self, quantity: Quantity) -> f32 {
        match (self, quantity) {
            (SensorSpec::AdcDivider(spec), _) => spec.threshold,
            (SensorSpec::Bme280(spec), Quantity::Temperature) => spec.thresholds.temperature,
            (SensorSpec::Bme280(spec), Quantity::Humidity) => spec.thresholds.humidity,
            (SensorSpec::Bme280(spec), Quantity::Pressure) => spec.thresholds.pressure,
            (SensorSpec::Bme280(_), Quantity::Voltage) => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcDividerSpec {
    pub channel: u8,
    pub calibration: DividerCalibration,
    pub oversample: u8,
    pub threshold: f32,
    pub tags: String<TAGS_SIZE>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Bme280Spec {
    pub scl_pin: u8,
    pub sda_pin: u8,
    pub address: u8,
    pub thresholds: Bme280Thresholds,
    pub tags: String<TAGS_SIZE>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Bme280Thresholds {
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: f32,
}

impl Default for Bme280Thresholds {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            humidity: 0.5,
            pressure: 5.0,
        }
    }
}

#[derive(Deserialize)]
struct RawDeviceConfig {
    device_name: Option<Text<NAME_SIZE>>,
    sleep_time_s: Option<f64>,
    sample_attempts: Option<f64>,
    sensors: Option<RawSensorList>,
}

#[derive(Deserialize)]
struct RawSensor {
    #[serde(rename = "type")]
    kind: Option<Text<TYPE_SIZE>>,
    tags: Option<Text<TAGS_SIZE>>,

    #[serde(rename = "R1")]
    r1: Option<f32>,
    #[serde(rename = "R2")]
    r2: Option<f32>,
    offset: Option<f32>,
    factor: Option<f32>,
    channel: Option<f64>,
    oversample: Option<f64>,
    threshold_voltage: Option<f32>,

    scl: Option<f64>,
    sda: Option<f64>,
    address: Option<f64>,
    threshold_temp: Option<f32>,
    threshold_hum: Option<f32>,
    threshold_pres: Option<f32>,
}

/// String value that remembers it did not fit instead of failing the whole document.
#[derive(Clone)]
enum Text<const N: usize> {
    Fits(String<N>),
    TooLong,
}

impl<'de, const N: usize> Deserialize<'de> for Text<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(TextVisitor::<N>)
    }
}

struct TextVisitor<const N: usize>;

impl<'de, const N: usize> Visitor<'de> for TextVisitor<N> {
    type Value = Text<N>;

    fn expecting(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "a string of at most {} bytes", N)
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Text<N>, E> {
        Ok(String::try_from(value).map_or(Text::TooLong, Text::Fits))
    }
}

/// The first `MAX_SENSORS` entries of the sensor array, plus whether there were more.
struct RawSensorList {
    sensors: Vec<RawSensor, MAX_SENSORS>,
    overflow: bool,
}

impl<'de> Deserialize<'de> for RawSensorList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_seq(RawSensorListVisitor)
    }
}

struct RawSensorListVisitor;

impl<'de> Visitor<'de> for RawSensorListVisitor {
    type Value = RawSensorList;

    fn expecting(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("an array of sensors")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<RawSensorList, A::Error> {
        let mut list = RawSensorList {
            sensors: Vec::new(),
            overflow: false,
        };
        while let Some(sensor) = seq.next_element::<RawSensor>()? {
            if list.sensors.push(sensor).is_err() {
                list.overflow = true;
            }
        }
        Ok(list)
    }
}

/// Parses and validates a JSON device configuration.
///
/// Validation is exhaustive: the first invalid entry fails the whole configuration.
pub fn parse(raw: &str) -> Result<DeviceConfig, ConfigError> {
    let mut escape_buffer = [0u8; ESCAPE_BUFFER_SIZE];
    let (raw, _) = serde_json_core::from_str_escaped::<RawDeviceConfig>(raw, &mut escape_buffer).map_err(ConfigError::from)?;

    let device_name = text(required(raw.device_name.as_ref(), "device_name", None)?, "device_name", None)?;
    if device_name.is_empty() {
        return Err(out_of_range("device_name", None));
    }

    let sleep_time_s = required(integer(raw.sleep_time_s)?, "sleep_time_s", None)?;
    if sleep_time_s <= 0 || sleep_time_s > u32::MAX as i64 {
        return Err(out_of_range("sleep_time_s", None));
    }

    let sample_attempts = in_range(integer(raw.sample_attempts)?.unwrap_or(1), 1, MAX_SAMPLE_ATTEMPTS as i64, "sample_attempts", None)? as u8;

    let raw_sensors = required(raw.sensors, "sensors", None)?;
    if raw_sensors.sensors.is_empty() || raw_sensors.overflow {
        return Err(out_of_range("sensors", None));
    }

    let mut sensors = Vec::new();
    for (index, raw_sensor) in raw_sensors.sensors.iter().enumerate() {
        let spec = sensor_spec(index, raw_sensor)?;
        debug!("Config> sensor {} => {:?}", index, spec.kind());
        sensors.push(spec).map_err(|_| out_of_range("sensors", None))?;
    }

    let config = DeviceConfig {
        device_name,
        sleep_interval: Duration::from_secs(sleep_time_s as u64),
        sample_attempts,
        sensors,
    };
    info!(
        "Config> '{}' with {} sensors, sleeping {}s",
        config.device_name.as_str(),
        config.sensors.len(),
        config.sleep_interval.as_secs()
    );
    Ok(config)
}

fn sensor_spec(index: usize, raw: &RawSensor) -> Result<SensorSpec, ConfigError> {
    let sensor = Some(index);
    let kind = match required(raw.kind.as_ref(), "type", sensor)? {
        Text::Fits(kind) => kind.as_str(),
        Text::TooLong => "",
    };
    let tags = match raw.tags.as_ref() {
        Some(tags) => text(tags, "tags", sensor)?,
        None => String::new(),
    };

    if kind.eq_ignore_ascii_case(SensorKind::Adc.as_str()) {
        let r1 = positive(required(raw.r1, "R1", sensor)?, "R1", sensor)?;
        let r2 = positive(required(raw.r2, "R2", sensor)?, "R2", sensor)?;
        let offset = finite(raw.offset.unwrap_or(0.0), "offset", sensor)?;
        let factor = finite(raw.factor.unwrap_or(1.0), "factor", sensor)?;
        let threshold = finite(raw.threshold_voltage.unwrap_or(0.01), "threshold_voltage", sensor)?;
        if threshold < 0.0 {
            return Err(out_of_range("threshold_voltage", sensor));
        }
        Ok(SensorSpec::AdcDivider(AdcDividerSpec {
            channel: in_range(integer(raw.channel)?.unwrap_or(0), 0, MAX_ADC_CHANNEL as i64, "channel", sensor)? as u8,
            calibration: DividerCalibration { r1, r2, offset, factor },
            oversample: in_range(integer(raw.oversample)?.unwrap_or(1), 1, MAX_OVERSAMPLE as i64, "oversample", sensor)? as u8,
            threshold,
            tags,
        }))
    } else if kind.eq_ignore_ascii_case(SensorKind::Bme280.as_str()) {
        let scl_pin = in_range(required(integer(raw.scl)?, "scl", sensor)?, 0, MAX_GPIO_PIN as i64, "scl", sensor)? as u8;
        let sda_pin = in_range(required(integer(raw.sda)?, "sda", sensor)?, 0, MAX_GPIO_PIN as i64, "sda", sensor)? as u8;
        if scl_pin == sda_pin {
            return Err(out_of_range("sda", sensor));
        }
        let address = match integer(raw.address)?.unwrap_or(BME280_PRIMARY_ADDRESS as i64) {
            a if a == BME280_PRIMARY_ADDRESS as i64 || a == BME280_SECONDARY_ADDRESS as i64 => a as u8,
            _ => return Err(out_of_range("address", sensor)),
        };
        let defaults = Bme280Thresholds::default();
        let thresholds = Bme280Thresholds {
            temperature: threshold(raw.threshold_temp, defaults.temperature, "threshold_temp", sensor)?,
            humidity: threshold(raw.threshold_hum, defaults.humidity, "threshold_hum", sensor)?,
            pressure: threshold(raw.threshold_pres, defaults.pressure, "threshold_pres", sensor)?,
        };
        Ok(SensorSpec::Bme280(Bme280Spec {
            scl_pin,
            sda_pin,
            address,
            thresholds,
            tags,
        }))
    } else {
        warn!("Config> sensor {} has unknown type '{}'", index, kind);
        Err(ConfigError::UnknownSensorType { sensor: index })
    }
}

fn required<T>(value: Option<T>, field: &'static str, sensor: Option<usize>) -> Result<T, ConfigError> {
    value.ok_or(ConfigError::MissingField { field, sensor })
}

fn text<const N: usize>(value: &Text<N>, field: &'static str, sensor: Option<usize>) -> Result<String<N>, ConfigError> {
    match value {
        Text::Fits(value) => Ok(value.clone()),
        Text::TooLong => Err(out_of_range(field, sensor)),
    }
}

/// JSON has a single number type, so `60` and `60.0` are both integers. A fractional part is a type error.
/// Magnitudes beyond `i64` saturate and are left to the range checks.
fn integer(value: Option<f64>) -> Result<Option<i64>, ConfigError> {
    match value {
        None => Ok(None),
        Some(value) if value.is_nan() => Err(ConfigError::InvalidType),
        Some(value) => {
            let whole = value as i64;
            let in_i64 = value > i64::MIN as f64 && value < i64::MAX as f64;
            if in_i64 && whole as f64 != value { Err(ConfigError::InvalidType) } else { Ok(Some(whole)) }
        }
    }
}

fn out_of_range(field: &'static str, sensor: Option<usize>) -> ConfigError {
    ConfigError::OutOfRange { field, sensor }
}

fn in_range(value: i64, min: i64, max: i64, field: &'static str, sensor: Option<usize>) -> Result<i64, ConfigError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(out_of_range(field, sensor))
    }
}

fn finite(value: f32, field: &'static str, sensor: Option<usize>) -> Result<f32, ConfigError> {
    if value.is_finite() { Ok(value) } else { Err(out_of_range(field, sensor)) }
}

fn positive(value: f32, field: &'static str, sensor: Option<usize>) -> Result<f32, ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(out_of_range(field, sensor))
    }
}

fn threshold(value: Option<f32>, default: f32, field: &'static str, sensor: Option<usize>) -> Result<f32, ConfigError> {
    let value = finite(value.unwrap_or(default), field, sensor)?;
    if value < 0.0 { Err(out_of_range(field, sensor)) } else { Ok(value) }
}

#[cfg(test)]
pub mod tests {
    use approx::assert_relative_eq;

    use super::*;

    pub const TEMPLATE: &str = r#"{
        "device_name" : "test sensor",
        "sleep_time_s" : 60,
        "sensors" : [
            {
                "type" : "ADC",
                "R1"   : 47000.0,
                "R2"   : 9100.0,
                "offset" : 0.0,
                "factor": 1.0
            },
            {
                "type" : "BME280",
                "scl"  : 14,
                "sda"  : 2
            }
        ]
    }"#;

    #[test]
    fn parse_template() {
        let config = parse(TEMPLATE).unwrap();
        assert_eq!(config.device_name.as_str(), "test sensor");
        assert_eq!(config.sleep_interval, Duration::from_secs(60));
        assert_eq!(config.sample_attempts, 1);
        assert_eq!(config.sensors.len(), 2);

        let SensorSpec::AdcDivider(adc) = &config.sensors[0] else {
            panic!("expected ADC first");
        };
        assert_eq!(adc.channel, 0);
        assert_eq!(adc.oversample, 1);
        assert_relative_eq!(adc.calibration.r1, 47000.0);
        assert_relative_eq!(adc.calibration.r2, 9100.0);
        assert_relative_eq!(adc.calibration.offset, 0.0);
        assert_relative_eq!(adc.calibration.factor, 1.0);
        assert_relative_eq!(adc.threshold, 0.01);

        let SensorSpec::Bme280(bme) = &config.sensors[1] else {
            panic!("expected BME280 second");
        };
        assert_eq!(bme.scl_pin, 14);
        assert_eq!(bme.sda_pin, 2);
        assert_eq!(bme.address, BME280_PRIMARY_ADDRESS);
        assert_eq!(bme.thresholds, Bme280Thresholds::default());
        assert_eq!(bme.tags.as_str(), "");
    }

    #[test]
    fn parse_optional_fields() {
        let config = parse(
            r#"{"device_name":"garden","sleep_time_s":300,"sample_attempts":3,"sensors":[
                {"type":"adc","R1":10000,"R2":10000,"channel":2,"oversample":16,"threshold_voltage":0.05,"tags":"battery"},
                {"type":"bme280","scl":5,"sda":4,"address":119,"threshold_temp":1.0,"threshold_hum":2.0,"threshold_pres":0.5,"tags":"shed"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(config.sample_attempts, 3);
        let SensorSpec::AdcDivider(adc) = &config.sensors[0] else {
            panic!("expected ADC first");
        };
        assert_eq!(adc.channel, 2);
        assert_eq!(adc.oversample, 16);
        assert_eq!(adc.tags.as_str(), "battery");
        assert_relative_eq!(config.sensors[0].threshold(Quantity::Voltage), 0.05);

        let SensorSpec::Bme280(bme) = &config.sensors[1] else {
            panic!("expected BME280 second");
        };
        assert_eq!(bme.address, BME280_SECONDARY_ADDRESS);
        assert_eq!(config.sensors[1].tags(), "shed");
        assert_relative_eq!(config.sensors[1].threshold(Quantity::Temperature), 1.0);
        assert_relative_eq!(config.sensors[1].threshold(Quantity::Humidity), 2.0);
        assert_relative_eq!(config.sensors[1].threshold(Quantity::Pressure), 0.5);
    }

    #[test]
    fn missing_fields() {
        assert_eq!(
            parse(r#"{"sleep_time_s":60,"sensors":[{"type":"BME280","scl":14,"sda":2}]}"#),
            Err(ConfigError::MissingField {
                field: "device_name",
                sensor: None
            })
        );
        assert_eq!(
            parse(r#"{"device_name":"x","sensors":[{"type":"BME280","scl":14,"sda":2}]}"#),
            Err(ConfigError::MissingField {
                field: "sleep_time_s",
                sensor: None
            })
        );
        assert_eq!(
            parse(r#"{"device_name":"x","sleep_time_s":60}"#),
            Err(ConfigError::MissingField {
                field: "sensors",
                sensor: None
            })
        );
        assert_eq!(
            parse(r#"{"device_name":"x","sleep_time_s":60,"sensors":[{"type":"BME280","scl":14,"sda":2},{"type":"ADC","R1":1.0}]}"#),
            Err(ConfigError::MissingField {
                field: "R2",
                sensor: Some(1)
            })
        );
        assert_eq!(
            parse(r#"{"device_name":"x","sleep_time_s":60,"sensors":[{"scl":14,"sda":2}]}"#),
            Err(ConfigError::MissingField {
                field: "type",
                sensor: Some(0)
            })
        );
    }

    #[test]
    fn invalid_types() {
        assert_eq!(
            parse(r#"{"device_name":"x","sleep_time_s":"60","sensors":[{"type":"BME280","scl":14,"sda":2}]}"#),
            Err(ConfigError::InvalidType)
        );
        assert_eq!(
            parse(r#"{"device_name":"x","sleep_time_s":60,"sensors":[{"type":"ADC","R1":"47k","R2":9100}]}"#),
            Err(ConfigError::InvalidType)
        );
        assert_eq!(
            parse(r#"{"device_name":"x","sleep_time_s":60,"sensors":[{"type":"BME280","scl":"D5","sda":2}]}"#),
            Err(ConfigError::InvalidType)
        );
    }

    #[test]
    fn out_of_range_values() {
        assert_eq!(
            parse(r#"{"device_name":"x","sleep_time_s":0,"sensors":[{"type":"BME280","scl":14,"sda":2}]}"#),
            Err(ConfigError::OutOfRange {
                field: "sleep_time_s",
                sensor: None
            })
        );
        assert_eq!(
            parse(r#"{"device_name":"x","sleep_time_s":-5,"sensors":[{"type":"BME280","scl":14,"sda":2}]}"#),
            Err(ConfigError::OutOfRange {
                field: "sleep_time_s",
                sensor: None
            })
        );
        assert_eq!(
            parse(r#"{"device_name":"x","sleep_time_s":60,"sensors":[]}"#),
            Err(ConfigError::OutOfRange {
                field: "sensors",
                sensor: None
            })
        );
        assert_eq!(
            parse(r#"{"device_name":"x","sleep_time_s":60,"sensors":[{"type":"ADC","R1":-47000.0,"R2":9100.0}]}"#),
            Err(ConfigError::OutOfRange {
                field: "R1",
                sensor: Some(0)
            })
        );
        assert_eq!(
            parse(r#"{"device_name":"x","sleep_time_s":60,"sensors":[{"type":"ADC","R1":47000.0,"R2":-9100.0}]}"#),
            Err(ConfigError::OutOfRange {
                field: "R2",
                sensor: Some(0)
            })
        );
        assert_eq!(
            parse(r#"{"device_name":"x","sleep_time_s":60,"sensors":[{"type":"BME280","scl":14,"sda":14}]}"#),
            Err(ConfigError::OutOfRange {
                field: "sda",
                sensor: Some(0)
            })
        );
        assert_eq!(
            parse(r#"{"device_name":"x","sleep_time_s":60,"sensors":[{"type":"BME280","scl":64,"sda":2}]}"#),
            Err(ConfigError::OutOfRange {
                field: "scl",
                sensor: Some(0)
            })
        );
        assert_eq!(
            parse(r#"{"device_name":"","sleep_time_s":60,"sensors":[{"type":"BME280","scl":14,"sda":2}]}"#),
            Err(ConfigError::OutOfRange {
                field: "device_name",
                sensor: None
            })
        );
    }

    #[test]
    fn unknown_sensor_type() {
        assert_eq!(
            parse(r#"{"device_name":"x","sleep_time_s":60,"sensors":[{"type":"BME280","scl":14,"sda":2},{"type":"DS18B20","pin":4}]}"#),
            Err(ConfigError::UnknownSensorType { sensor: 1 })
        );
    }

    #[test]
    fn escaped_strings_are_unescaped() {
        let config = parse(
            r#"{"device_name":"a\"b\\c","sleep_time_s":60,"sensors":[{"type":"ADC","R1":1000,"R2":1000,"tags":"\"roof\""}]}"#,
        )
        .unwrap();
        assert_eq!(config.device_name.as_str(), "a\"b\\c");
        assert_eq!(config.sensors[0].tags(), "\"roof\"");
    }

    #[test]
    fn overlong_strings() {
        let name = "n".repeat(NAME_SIZE + 1);
        assert_eq!(
            parse(&format!(r#"{{"device_name":"{}","sleep_time_s":60,"sensors":[{{"type":"BME280","scl":14,"sda":2}}]}}"#, name)),
            Err(ConfigError::OutOfRange {
                field: "device_name",
                sensor: None
            })
        );
        let tags = "t".repeat(TAGS_SIZE + 1);
        assert_eq!(
            parse(&format!(r#"{{"device_name":"x","sleep_time_s":60,"sensors":[{{"type":"BME280","scl":14,"sda":2,"tags":"{}"}}]}}"#, tags)),
            Err(ConfigError::OutOfRange {
                field: "tags",
                sensor: Some(0)
            })
        );
        assert_eq!(
            parse(r#"{"device_name":"x","sleep_time_s":60,"sensors":[{"type":"BME280-with-a-very-long-suffix","scl":14,"sda":2}]}"#),
            Err(ConfigError::UnknownSensorType { sensor: 0 })
        );
    }

    #[test]
    fn integral_numbers() {
        let config = parse(r#"{"device_name":"x","sleep_time_s":60.0,"sensors":[{"type":"BME280","scl":14.0,"sda":2}]}"#).unwrap();
        assert_eq!(config.sleep_interval, Duration::from_secs(60));
        assert_eq!(
            parse(r#"{"device_name":"x","sleep_time_s":60.5,"sensors":[{"type":"BME280","scl":14,"sda":2}]}"#),
            Err(ConfigError::InvalidType)
        );
        assert_eq!(
            parse(r#"{"device_name":"x","sleep_time_s":60,"sensors":[{"type":"ADC","R1":1000,"R2":1000,"channel":1.5}]}"#),
            Err(ConfigError::InvalidType)
        );
        assert_eq!(
            parse(r#"{"device_name":"x","sleep_time_s":1e30,"sensors":[{"type":"BME280","scl":14,"sda":2}]}"#),
            Err(ConfigError::OutOfRange {
                field: "sleep_time_s",
                sensor: None
            })
        );
    }

    #[test]
    fn duplicate_keys() {
        assert_eq!(
            parse(r#"{"device_name":"x","sleep_time_s":60,"sensors":[{"type":"ADC","R1":1,"R1":2,"R2":1000}]}"#),
            Err(ConfigError::Syntax)
        );
    }

    #[test]
    fn sensor_list_overflow() {
        let document = |count: usize| {
            let sensors = vec![r#"{"type":"ADC","R1":1000,"R2":1000}"#; count].join(",");
            format!(r#"{{"device_name":"x","sleep_time_s":60,"sensors":[{}]}}"#, sensors)
        };
        assert_eq!(parse(&document(MAX_SENSORS)).unwrap().sensors.len(), MAX_SENSORS);
        for count in [MAX_SENSORS + 1, MAX_SENSORS + 4] {
            assert_eq!(
                parse(&document(count)),
                Err(ConfigError::OutOfRange {
                    field: "sensors",
                    sensor: None
                })
            );
        }
    }

    #[test]
    fn malformed_json() {
        assert_eq!(parse(r#"{"device_name":"x","sleep_time_s":60,"sensors":[{"type":"ADC""#), Err(ConfigError::Syntax));
        assert_eq!(parse(""), Err(ConfigError::Syntax));
    }
}
