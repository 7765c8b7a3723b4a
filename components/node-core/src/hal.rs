#![allow(async_fn_in_trait)]

//! Hardware capabilities the acquisition engine calls into, and the bookkeeping that keeps them exclusive.

use embedded_hal_async::i2c::I2c;

use crate::{
    config::{MAX_ADC_CHANNEL, MAX_GPIO_PIN},
    sensor::DriverError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HalError {
    /// The analog input did not deliver a conversion result.
    Conversion,
    Bus,
}

impl From<HalError> for DriverError {
    fn from(err: HalError) -> Self {
        match err {
            HalError::Conversion => DriverError::ReadTimeout,
            HalError::Bus => DriverError::BusError,
        }
    }
}

/// A single analog input channel.
pub trait AnalogInput {
    /// Raw count corresponding to the top of the input range.
    fn full_scale(&self) -> u16;

    async fn read(&mut self) -> Result<u16, HalError>;
}

/// Board support: hands out peripherals by channel / pin number and takes them back on release.
pub trait Board {
    type Adc: AnalogInput;
    type I2c: I2c;

    fn adc(&mut self, channel: u8) -> Option<Self::Adc>;

    fn i2c(&mut self, scl: u8, sda: u8) -> Option<Self::I2c>;

    fn release_adc(&mut self, channel: u8, adc: Self::Adc) {
        let _ = (channel, adc);
    }

    fn release_i2c(&mut self, scl: u8, sda: u8, bus: Self::I2c) {
        let _ = (scl, sda, bus);
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
struct BitSet(u64);

impl BitSet {
    fn contains(&self, bit: u8) -> bool {
        bit < 64 && self.0 & (1 << bit) != 0
    }

    fn insert(&mut self, bit: u8) {
        self.0 |= 1 << bit;
    }

    fn remove(&mut self, bit: u8) {
        self.0 &= !(1 << bit);
    }

    fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Owns the [`Board`] and tracks which analog channels and GPIOs are currently claimed.
pub struct Hardware<B: Board> {
    board: B,
    pins: BitSet,
    channels: BitSet,
}

impl<B: Board> Hardware<B> {
    pub fn new(board: B) -> Self {
        Self {
            board,
            pins: BitSet::default(),
            channels: BitSet::default(),
        }
    }

    pub fn claim_adc(&mut self, channel: u8) -> Result<B::Adc, DriverError> {
        if channel > MAX_ADC_CHANNEL || self.channels.contains(channel) {
            warn!("HW> analog channel {} already claimed", channel);
            return Err(DriverError::ResourceUnavailable);
        }
        let adc = self.board.adc(channel).ok_or(DriverError::ResourceUnavailable)?;
        self.channels.insert(channel);
        trace!("HW> claimed analog channel {}", channel);
        Ok(adc)
    }

    pub fn release_adc(&mut self, channel: u8, adc: B::Adc) {
        self.channels.remove(channel);
        self.board.release_adc(channel, adc);
        trace!("HW> released analog channel {}", channel);
    }

    pub fn claim_i2c(&mut self, scl: u8, sda: u8) -> Result<B::I2c, DriverError> {
        if scl > MAX_GPIO_PIN || sda > MAX_GPIO_PIN || scl == sda {
            return Err(DriverError::PinConflict);
        }
        if self.pins.contains(scl) || self.pins.contains(sda) {
            warn!("HW> pins scl={} sda={} conflict with an existing claim", scl, sda);
            return Err(DriverError::PinConflict);
        }
        let bus = self.board.i2c(scl, sda).ok_or(DriverError::BusError)?;
        self.pins.insert(scl);
        self.pins.insert(sda);
        trace!("HW> claimed i2c scl={} sda={}", scl, sda);
        Ok(bus)
    }

    pub fn release_i2c(&mut self, scl: u8, sda: u8, bus: B::I2c) {
        self.pins.remove(scl);
        self.pins.remove(sda);
        self.board.release_i2c(scl, sda, bus);
        trace!("HW> released i2c scl={} sda={}", scl, sda);
    }

    pub fn is_pin_claimed(&self, pin: u8) -> bool {
        self.pins.contains(pin)
    }

    pub fn is_channel_claimed(&self, channel: u8) -> bool {
        self.channels.contains(channel)
    }

    /// `true` when nothing is claimed.
    pub fn is_idle(&self) -> bool {
        self.pins.is_empty() && self.channels.is_empty()
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn into_board(self) -> B {
        self.board
    }
}
