use embassy_time::{Duration, with_timeout};

use crate::{
    config::AdcDividerSpec,
    hal::{AnalogInput, Board, Hardware},
    sensor::{DriverError, Quantity, Reading, Readings, SensorDriver, SensorKind, Unit},
};

/// Upper bound for a single analog conversion.
pub const CONVERSION_TIMEOUT: Duration = Duration::from_millis(100);

/// Resistor divider correction followed by a linear calibration.
///
/// `factor` and `offset` map the divider voltage to the physical quantity of the attached sensor.
/// The ADC reference voltage is folded into `factor`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DividerCalibration {
    pub r1: f32,
    pub r2: f32,
    pub offset: f32,
    pub factor: f32,
}

impl DividerCalibration {
    pub fn divider_ratio(&self) -> f32 {
        (self.r1 + self.r2) / self.r2
    }

    /// Voltage at the top of the divider for a normalized reading (0.0 ..= 1.0 of full scale).
    pub fn divider_voltage(&self, v_raw: f32) -> f32 {
        v_raw * self.divider_ratio()
    }

    pub fn apply(&self, v_raw: f32) -> f32 {
        self.divider_voltage(v_raw) * self.factor + self.offset
    }
}

#[derive(Default, Debug)]
struct Averaging {
    sum: u32,
    count: u32,
}

impl Averaging {
    fn add(&mut self, counts: u16) {
        self.sum += counts as u32;
        self.count += 1;
    }

    fn average(&self) -> Option<f32> {
        if self.count == 0 { None } else { Some(self.sum as f32 / self.count as f32) }
    }
}

pub struct AdcDividerDriver<A: AnalogInput> {
    spec: AdcDividerSpec,
    input: Option<A>,
}

impl<A: AnalogInput> AdcDividerDriver<A> {
    pub fn new(spec: AdcDividerSpec) -> Self {
        Self { spec, input: None }
    }

    pub fn spec(&self) -> &AdcDividerSpec {
        &self.spec
    }

    async fn convert(input: &mut A) -> Result<u16, DriverError> {
        let counts = with_timeout(CONVERSION_TIMEOUT, input.read()).await??;
        trace!("ADC> raw {}", counts);
        Ok(counts)
    }
}

impl<B: Board> SensorDriver<B> for AdcDividerDriver<B::Adc> {
    fn kind(&self) -> SensorKind {
        SensorKind::Adc
    }

    fn is_initialized(&self) -> bool {
        self.input.is_some()
    }

    async fn initialize(&mut self, hw: &mut Hardware<B>) -> Result<(), DriverError> {
        if self.input.is_some() {
            return Ok(());
        }
        let input = hw.claim_adc(self.spec.channel)?;
        info!("ADC> channel {} ready (ratio {})", self.spec.channel, self.spec.calibration.divider_ratio());
        self.input = Some(input);
        Ok(())
    }

    async fn sample(&mut self) -> Result<Readings, DriverError> {
        let input = self.input.as_mut().ok_or(DriverError::ResourceUnavailable)?;
        let full_scale = input.full_scale();
        if full_scale == 0 {
            return Err(DriverError::ResourceUnavailable);
        }

        let mut averaging = Averaging::default();
        for _ in 0..self.spec.oversample.max(1) {
            averaging.add(Self::convert(input).await?);
        }
        let counts = averaging.average().ok_or(DriverError::ReadTimeout)?;

        let v_raw = counts / full_scale as f32;
        let value = self.spec.calibration.apply(v_raw);
        debug!("ADC> channel {}: {} counts => {} V", self.spec.channel, counts, value);

        let mut readings = Readings::new();
        let _ = readings.push(Reading::new(Quantity::Voltage, value, Unit::Volts));
        Ok(readings)
    }

    async fn shutdown(&mut self, hw: &mut Hardware<B>) {
        if let Some(input) = self.input.take() {
            hw.release_adc(self.spec.channel, input);
            info!("ADC> channel {} shut down", self.spec.channel);
        }
    }
}
