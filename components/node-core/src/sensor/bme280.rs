use embassy_time::{Duration, Timer, with_timeout};
use embedded_hal_async::i2c::I2c;

use crate::{
    config::Bme280Spec,
    hal::{Board, Hardware},
    sensor::{DriverError, Quantity, Reading, Readings, SensorDriver, SensorKind, Unit},
};

pub const CHIP_ID: u8 = 0x60;

pub const REG_CALIB_00: u8 = 0x88;
pub const REG_CHIP_ID: u8 = 0xD0;
pub const REG_RESET: u8 = 0xE0;
pub const REG_CALIB_26: u8 = 0xE1;
pub const REG_CTRL_HUM: u8 = 0xF2;
pub const REG_STATUS: u8 = 0xF3;
pub const REG_CTRL_MEAS: u8 = 0xF4;
pub const REG_CONFIG: u8 = 0xF5;
pub const REG_PRESS_MSB: u8 = 0xF7;

const SOFT_RESET: u8 = 0xB6;
const STATUS_MEASURING: u8 = 0x08;
const STATUS_IM_UPDATE: u8 = 0x01;

// osrs_t = x1, osrs_p = x1
const CTRL_MEAS_SLEEP: u8 = (0b001 << 5) | (0b001 << 2);
const CTRL_MEAS_FORCED: u8 = CTRL_MEAS_SLEEP | 0b01;
// osrs_h = x1
const CTRL_HUM_X1: u8 = 0b001;
// no standby, IIR filter off
const CONFIG_FILTER_OFF: u8 = 0x00;

const CALIB_00_LEN: usize = 26;
const CALIB_26_LEN: usize = 7;

const SKIPPED_PRESSURE: u32 = 0x80000;
const SKIPPED_TEMPERATURE: u32 = 0x80000;
const SKIPPED_HUMIDITY: u32 = 0x8000;

/// Upper bound for a single bus transaction.
pub const TRANSACTION_TIMEOUT: Duration = Duration::from_millis(50);
/// Worst case forced conversion with x1 oversampling on all channels is ~9.3 ms.
const MEASUREMENT_DELAY: Duration = Duration::from_millis(10);
const POLL_INTERVAL: Duration = Duration::from_millis(2);
const POLL_ATTEMPTS: u8 = 10;
const STARTUP_DELAY: Duration = Duration::from_millis(2);

/// Factory trimming parameters read from the chip's NVM.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    pub dig_t1: u16,
    pub dig_t2: i16,
    pub dig_t3: i16,
    pub dig_p1: u16,
    pub dig_p2: i16,
    pub dig_p3: i16,
    pub dig_p4: i16,
    pub dig_p5: i16,
    pub dig_p6: i16,
    pub dig_p7: i16,
    pub dig_p8: i16,
    pub dig_p9: i16,
    pub dig_h1: u8,
    pub dig_h2: i16,
    pub dig_h3: u8,
    pub dig_h4: i16,
    pub dig_h5: i16,
    pub dig_h6: i8,
}

impl Calibration {
    pub fn from_registers(block_00: &[u8; CALIB_00_LEN], block_26: &[u8; CALIB_26_LEN]) -> Self {
        let u16_at = |i: usize| u16::from_le_bytes([block_00[i], block_00[i + 1]]);
        let i16_at = |i: usize| i16::from_le_bytes([block_00[i], block_00[i + 1]]);
        Self {
            dig_t1: u16_at(0),
            dig_t2: i16_at(2),
            dig_t3: i16_at(4),
            dig_p1: u16_at(6),
            dig_p2: i16_at(8),
            dig_p3: i16_at(10),
            dig_p4: i16_at(12),
            dig_p5: i16_at(14),
            dig_p6: i16_at(16),
            dig_p7: i16_at(18),
            dig_p8: i16_at(20),
            dig_p9: i16_at(22),
            // 0xA0 is unused
            dig_h1: block_00[25],
            dig_h2: i16::from_le_bytes([block_26[0], block_26[1]]),
            dig_h3: block_26[2],
            // 12 bit signed values sharing the nibbles of 0xE5
            dig_h4: ((block_26[3] as i8 as i16) << 4) | (block_26[4] & 0x0F) as i16,
            dig_h5: ((block_26[5] as i8 as i16) << 4) | (block_26[4] >> 4) as i16,
            dig_h6: block_26[6] as i8,
        }
    }

    /// An erased or unreadable NVM would make the compensation divide by zero.
    pub fn is_plausible(&self) -> bool {
        self.dig_t1 != 0 && self.dig_p1 != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawMeasurement {
    pub pressure: u32,
    pub temperature: u32,
    pub humidity: u32,
}

impl RawMeasurement {
    pub fn from_registers(data: &[u8; 8]) -> Self {
        let adc20 = |msb: u8, lsb: u8, xlsb: u8| ((msb as u32) << 12) | ((lsb as u32) << 4) | ((xlsb as u32) >> 4);
        Self {
            pressure: adc20(data[0], data[1], data[2]),
            temperature: adc20(data[3], data[4], data[5]),
            humidity: ((data[6] as u32) << 8) | data[7] as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Compensated {
    pub temperature: f32,
    pub humidity: Option<f32>,
    pub pressure: Option<f32>,
}

/// Floating point compensation as given in the BME280 datasheet (section 8.1).
pub fn compensate(cal: &Calibration, raw: &RawMeasurement) -> Compensated {
    let adc_t = raw.temperature as f64;
    let var1 = (adc_t / 16384.0 - cal.dig_t1 as f64 / 1024.0) * cal.dig_t2 as f64;
    let var2 = (adc_t / 131072.0 - cal.dig_t1 as f64 / 8192.0) * (adc_t / 131072.0 - cal.dig_t1 as f64 / 8192.0) * cal.dig_t3 as f64;
    let t_fine = var1 + var2;
    let temperature = t_fine / 5120.0;

    let pressure = (raw.pressure != SKIPPED_PRESSURE).then(|| compensate_pressure(cal, t_fine, raw.pressure as f64));
    let humidity = (raw.humidity != SKIPPED_HUMIDITY).then(|| compensate_humidity(cal, t_fine, raw.humidity as f64));

    Compensated {
        temperature: temperature as f32,
        humidity: humidity.map(|h| h as f32),
        // Pa => hPa
        pressure: pressure.flatten().map(|p| (p / 100.0) as f32),
    }
}

fn compensate_pressure(cal: &Calibration, t_fine: f64, adc_p: f64) -> Option<f64> {
    let mut var1 = t_fine / 2.0 - 64000.0;
    let mut var2 = var1 * var1 * cal.dig_p6 as f64 / 32768.0;
    var2 += var1 * cal.dig_p5 as f64 * 2.0;
    var2 = var2 / 4.0 + cal.dig_p4 as f64 * 65536.0;
    var1 = (cal.dig_p3 as f64 * var1 * var1 / 524288.0 + cal.dig_p2 as f64 * var1) / 524288.0;
    var1 = (1.0 + var1 / 32768.0) * cal.dig_p1 as f64;
    if var1 == 0.0 {
        return None;
    }
    let mut p = 1048576.0 - adc_p;
    p = (p - var2 / 4096.0) * 6250.0 / var1;
    let var1 = cal.dig_p9 as f64 * p * p / 2147483648.0;
    let var2 = p * cal.dig_p8 as f64 / 32768.0;
    Some(p + (var1 + var2 + cal.dig_p7 as f64) / 16.0)
}

fn compensate_humidity(cal: &Calibration, t_fine: f64, adc_h: f64) -> f64 {
    let mut h = t_fine - 76800.0;
    h = (adc_h - (cal.dig_h4 as f64 * 64.0 + cal.dig_h5 as f64 / 16384.0 * h))
        * (cal.dig_h2 as f64 / 65536.0 * (1.0 + cal.dig_h6 as f64 / 67108864.0 * h * (1.0 + cal.dig_h3 as f64 / 67108864.0 * h)));
    h *= 1.0 - cal.dig_h1 as f64 * h / 524288.0;
    h.clamp(0.0, 100.0)
}

/// Register level access to one chip on an owned bus.
struct Chip<I: I2c> {
    bus: I,
    address: u8,
}

impl<I: I2c> Chip<I> {
    async fn read_registers(&mut self, register: u8, buf: &mut [u8]) -> Result<(), DriverError> {
        match with_timeout(TRANSACTION_TIMEOUT, self.bus.write_read(self.address, &[register], buf)).await {
            Ok(Ok(())) => {
                trace!("BME280> read {:02X} => {:?}", register, buf);
                Ok(())
            }
            Ok(Err(_)) => {
                warn!("BME280> read {:02X} failed", register);
                Err(DriverError::BusError)
            }
            Err(_) => {
                warn!("BME280> read {:02X} timed out", register);
                Err(DriverError::BusError)
            }
        }
    }

    async fn read_register(&mut self, register: u8) -> Result<u8, DriverError> {
        let mut buf = [0u8; 1];
        self.read_registers(register, &mut buf).await?;
        Ok(buf[0])
    }

    async fn write_register(&mut self, register: u8, value: u8) -> Result<(), DriverError> {
        trace!("BME280> write {:02X} <= {:02X}", register, value);
        match with_timeout(TRANSACTION_TIMEOUT, self.bus.write(self.address, &[register, value])).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) | Err(_) => {
                warn!("BME280> write {:02X} failed", register);
                Err(DriverError::BusError)
            }
        }
    }

    /// Polls the status register until `mask` clears, within a fixed attempt budget.
    async fn wait_status_clear(&mut self, mask: u8) -> Result<(), DriverError> {
        for attempt in 0..POLL_ATTEMPTS {
            if self.read_register(REG_STATUS).await? & mask == 0 {
                trace!("BME280> status clear after {} polls", attempt + 1);
                return Ok(());
            }
            Timer::after(POLL_INTERVAL).await;
        }
        warn!("BME280> status {:02X} still set after {} polls", mask, POLL_ATTEMPTS);
        Err(DriverError::ReadTimeout)
    }

    async fn probe(&mut self) -> Result<Calibration, DriverError> {
        // a chip that does not acknowledge its address is treated as absent
        let id = match self.read_register(REG_CHIP_ID).await {
            Ok(id) => id,
            Err(_) => {
                warn!("BME280> no answer at {:02X}", self.address);
                return Err(DriverError::DeviceNotFound);
            }
        };
        if id != CHIP_ID {
            warn!("BME280> unexpected chip id {:02X} at {:02X}", id, self.address);
            return Err(DriverError::DeviceNotFound);
        }

        self.write_register(REG_RESET, SOFT_RESET).await?;
        Timer::after(STARTUP_DELAY).await;
        self.wait_status_clear(STATUS_IM_UPDATE).await?;

        let mut block_00 = [0u8; CALIB_00_LEN];
        let mut block_26 = [0u8; CALIB_26_LEN];
        self.read_registers(REG_CALIB_00, &mut block_00).await?;
        self.read_registers(REG_CALIB_26, &mut block_26).await?;
        let calibration = Calibration::from_registers(&block_00, &block_26);
        if !calibration.is_plausible() {
            warn!("BME280> implausible calibration data {:?}", calibration);
            return Err(DriverError::ChecksumError);
        }

        // ctrl_hum only takes effect after the next ctrl_meas write
        self.write_register(REG_CTRL_HUM, CTRL_HUM_X1).await?;
        self.write_register(REG_CONFIG, CONFIG_FILTER_OFF).await?;
        self.write_register(REG_CTRL_MEAS, CTRL_MEAS_SLEEP).await?;
        Ok(calibration)
    }

    async fn measure(&mut self) -> Result<RawMeasurement, DriverError> {
        self.write_register(REG_CTRL_MEAS, CTRL_MEAS_FORCED).await?;
        Timer::after(MEASUREMENT_DELAY).await;
        self.wait_status_clear(STATUS_MEASURING).await?;
        let mut data = [0u8; 8];
        self.read_registers(REG_PRESS_MSB, &mut data).await?;
        Ok(RawMeasurement::from_registers(&data))
    }
}

pub struct Bme280Driver<I: I2c> {
    spec: Bme280Spec,
    chip: Option<Chip<I>>,
    calibration: Option<Calibration>,
}

impl<I: I2c> Bme280Driver<I> {
    pub fn new(spec: Bme280Spec) -> Self {
        Self {
            spec,
            chip: None,
            calibration: None,
        }
    }

    pub fn spec(&self) -> &Bme280Spec {
        &self.spec
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }
}

impl<B: Board> SensorDriver<B> for Bme280Driver<B::I2c> {
    fn kind(&self) -> SensorKind {
        SensorKind::Bme280
    }

    fn is_initialized(&self) -> bool {
        self.chip.is_some()
    }

    async fn initialize(&mut self, hw: &mut Hardware<B>) -> Result<(), DriverError> {
        if self.chip.is_some() {
            return Ok(());
        }
        let (scl, sda) = (self.spec.scl_pin, self.spec.sda_pin);
        let bus = hw.claim_i2c(scl, sda)?;
        let mut chip = Chip {
            bus,
            address: self.spec.address,
        };
        match chip.probe().await {
            Ok(calibration) => {
                info!("BME280> ready at {:02X} on scl={} sda={}", self.spec.address, scl, sda);
                self.calibration = Some(calibration);
                self.chip = Some(chip);
                Ok(())
            }
            Err(e) => {
                error!("BME280> initialize on scl={} sda={} failed: {:?}", scl, sda, e);
                hw.release_i2c(scl, sda, chip.bus);
                Err(e)
            }
        }
    }

    async fn sample(&mut self) -> Result<Readings, DriverError> {
        let calibration = self.calibration.ok_or(DriverError::ChecksumError)?;
        let chip = self.chip.as_mut().ok_or(DriverError::ChecksumError)?;

        let raw = chip.measure().await?;
        if raw.temperature == SKIPPED_TEMPERATURE {
            warn!("BME280> temperature channel skipped");
            return Err(DriverError::BusError);
        }
        let compensated = compensate(&calibration, &raw);
        debug!("BME280> {:?} => {:?}", raw, compensated);

        let mut readings = Readings::new();
        let _ = readings.push(Reading::new(Quantity::Temperature, compensated.temperature, Unit::Celsius));
        if let Some(humidity) = compensated.humidity {
            let _ = readings.push(Reading::new(Quantity::Humidity, humidity, Unit::Percent));
        }
        if let Some(pressure) = compensated.pressure {
            let _ = readings.push(Reading::new(Quantity::Pressure, pressure, Unit::Hectopascal));
        }
        Ok(readings)
    }

    async fn shutdown(&mut self, hw: &mut Hardware<B>) {
        self.calibration = None;
        if let Some(mut chip) = self.chip.take() {
            // leave the chip in sleep mode, it is already there unless a conversion was interrupted
            let _ = chip.write_register(REG_CTRL_MEAS, CTRL_MEAS_SLEEP).await;
            hw.release_i2c(self.spec.scl_pin, self.spec.sda_pin, chip.bus);
            info!("BME280> scl={} sda={} shut down", self.spec.scl_pin, self.spec.sda_pin);
        }
    }
}
