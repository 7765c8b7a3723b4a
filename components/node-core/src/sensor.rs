#![allow(async_fn_in_trait)]

use heapless::Vec;
use serde::Serialize;

use crate::{
    config::SensorSpec,
    hal::{Board, Hardware},
};

pub mod adc_divider;
pub mod bme280;

use adc_divider::AdcDividerDriver;
use bme280::Bme280Driver;

/// One physical sensor yields at most this many quantities (BME280: temperature, humidity, pressure).
pub const MAX_READINGS: usize = 3;

pub type Readings = Vec<Reading, MAX_READINGS>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverError {
    ResourceUnavailable,
    ReadTimeout,
    DeviceNotFound,
    PinConflict,
    BusError,
    ChecksumError,
}

impl DriverError {
    /// Errors worth another attempt within the same cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::ReadTimeout | DriverError::BusError)
    }
}

impl From<embassy_time::TimeoutError> for DriverError {
    fn from(_err: embassy_time::TimeoutError) -> Self {
        DriverError::ReadTimeout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorKind {
    #[serde(rename = "ADC")]
    Adc,
    #[serde(rename = "BME280")]
    Bme280,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Adc => "ADC",
            SensorKind::Bme280 => "BME280",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(rename_all = "lowercase")]
pub enum Quantity {
    Voltage,
    Temperature,
    Humidity,
    Pressure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Unit {
    #[serde(rename = "V")]
    Volts,
    #[serde(rename = "degC")]
    Celsius,
    #[serde(rename = "%RH")]
    Percent,
    #[serde(rename = "hPa")]
    Hectopascal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    pub quantity: Quantity,
    pub value: f32,
    pub unit: Unit,
}

impl Reading {
    pub fn new(quantity: Quantity, value: f32, unit: Unit) -> Self {
        Self { quantity, value, unit }
    }
}

/// Uniform capability set every sensor backend implements.
///
/// `sample()` returns calibrated readings in physical units, so callers never need backend knowledge.
pub trait SensorDriver<B: Board> {
    fn kind(&self) -> SensorKind;

    fn is_initialized(&self) -> bool;

    /// Claims the hardware the sensor needs and brings the device up. Idempotent.
    async fn initialize(&mut self, hw: &mut Hardware<B>) -> Result<(), DriverError>;

    async fn sample(&mut self) -> Result<Readings, DriverError>;

    /// Releases all claimed hardware. Calling it on a driver that is not initialized is a no-op.
    async fn shutdown(&mut self, hw: &mut Hardware<B>);
}

/// Compiled-in dispatch over all supported sensor backends, selected once from the [`SensorSpec`] discriminant.
pub enum Driver<B: Board> {
    AdcDivider(AdcDividerDriver<B::Adc>),
    Bme280(Bme280Driver<B::I2c>),
}

impl<B: Board> Driver<B> {
    pub fn from_spec(spec: &SensorSpec) -> Self {
        match spec {
            SensorSpec::AdcDivider(spec) => Driver::AdcDivider(AdcDividerDriver::new(spec.clone())),
            SensorSpec::Bme280(spec) => Driver::Bme280(Bme280Driver::new(spec.clone())),
        }
    }
}

impl<B: Board> SensorDriver<B> for Driver<B> {
    fn kind(&self) -> SensorKind {
        match self {
            Driver::AdcDivider(_) => SensorKind::Adc,
            Driver::Bme280(_) => SensorKind::Bme280,
        }
    }

    fn is_initialized(&self) -> bool {
        match self {
            Driver::AdcDivider(driver) => SensorDriver::<B>::is_initialized(driver),
            Driver::Bme280(driver) => SensorDriver::<B>::is_initialized(driver),
        }
    }

    async fn initialize(&mut self, hw: &mut Hardware<B>) -> Result<(), DriverError> {
        match self {
            Driver::AdcDivider(driver) => driver.initialize(hw).await,
            Driver::Bme280(driver) => driver.initialize(hw).await,
        }
    }

    async fn sample(&mut self) -> Result<Readings, DriverError> {
        match self {
            Driver::AdcDivider(driver) => SensorDriver::<B>::sample(driver).await,
            Driver::Bme280(driver) => SensorDriver::<B>::sample(driver).await,
        }
    }

    async fn shutdown(&mut self, hw: &mut Hardware<B>) {
        match self {
            Driver::AdcDivider(driver) => driver.shutdown(hw).await,
            Driver::Bme280(driver) => driver.shutdown(hw).await,
        }
    }
}
