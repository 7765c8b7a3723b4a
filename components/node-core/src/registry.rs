use heapless::Vec;

use crate::{
    config::{DeviceConfig, MAX_SENSORS},
    hal::{Board, Hardware},
    sensor::{Driver, DriverError, SensorDriver},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistryError {
    InitFailed { index: usize, cause: DriverError },
}

impl core::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RegistryError::InitFailed { index, cause } => write!(f, "sensor {} failed to initialize: {:?}", index, cause),
        }
    }
}

impl core::error::Error for RegistryError {}

/// Owns every driver instance and the hardware they claimed, in configuration order.
pub struct Registry<B: Board> {
    hardware: Hardware<B>,
    drivers: Vec<Driver<B>, MAX_SENSORS>,
}

impl<B: Board> Registry<B> {
    /// Instantiates and initializes one driver per configured sensor.
    ///
    /// All or nothing: when a driver fails, the ones already initialized are shut down in reverse order
    /// before the error is returned.
    pub async fn build(config: &DeviceConfig, board: B) -> Result<Self, RegistryError> {
        let mut registry = Self {
            hardware: Hardware::new(board),
            drivers: Vec::new(),
        };
        for (index, spec) in config.sensors.iter().enumerate() {
            let mut driver = Driver::from_spec(spec);
            match driver.initialize(&mut registry.hardware).await {
                Ok(()) => {
                    info!("Registry> sensor {} ({}) registered", index, spec.kind().as_str());
                    // capacity equals MAX_SENSORS, which also bounds the configuration
                    let _ = registry.drivers.push(driver);
                }
                Err(cause) => {
                    error!("Registry> sensor {} ({}) failed to initialize: {:?}", index, spec.kind().as_str(), cause);
                    registry.shutdown().await;
                    return Err(RegistryError::InitFailed { index, cause });
                }
            }
        }
        info!("Registry> {} sensors ready", registry.drivers.len());
        Ok(registry)
    }

    pub fn drivers(&self) -> &[Driver<B>] {
        &self.drivers
    }

    pub fn drivers_mut(&mut self) -> &mut [Driver<B>] {
        &mut self.drivers
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn hardware(&self) -> &Hardware<B> {
        &self.hardware
    }

    /// Shuts every driver down in reverse initialization order. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        for (index, driver) in self.drivers.iter_mut().enumerate().rev() {
            if SensorDriver::<B>::is_initialized(driver) {
                debug!("Registry> shutting down sensor {}", index);
                driver.shutdown(&mut self.hardware).await;
            }
        }
    }
}
