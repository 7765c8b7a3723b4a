use std::{cell::RefCell, collections::HashMap, rc::Rc, vec::Vec};

use embedded_hal_async::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};

use crate::{
    config::BME280_PRIMARY_ADDRESS,
    hal::{AnalogInput, Board, HalError},
    sensor::bme280::{CHIP_ID, Calibration, REG_CALIB_00, REG_CALIB_26, REG_CHIP_ID, REG_CTRL_MEAS, REG_PRESS_MSB, REG_RESET, REG_STATUS},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardEvent {
    AdcOpened(u8),
    AdcReleased(u8),
    I2cOpened(u8, u8),
    I2cReleased(u8, u8),
}

#[derive(Default)]
struct BoardState {
    events: Vec<BoardEvent>,
    adcs: HashMap<u8, MockAdc>,
    missing_adcs: Vec<u8>,
    buses: HashMap<(u8, u8), FakeBme280>,
}

/// Board whose clones share state, so tests can inspect it after handing it to the registry.
#[derive(Clone, Default)]
pub struct MockBoard {
    state: Rc<RefCell<BoardState>>,
}

impl MockBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adc(self, channel: u8, adc: MockAdc) -> Self {
        self.state.borrow_mut().adcs.insert(channel, adc);
        self
    }

    pub fn without_adc(self, channel: u8) -> Self {
        self.state.borrow_mut().missing_adcs.push(channel);
        self
    }

    pub fn with_bus(self, scl: u8, sda: u8, bus: FakeBme280) -> Self {
        self.state.borrow_mut().buses.insert((scl, sda), bus);
        self
    }

    pub fn events(&self) -> Vec<BoardEvent> {
        self.state.borrow().events.clone()
    }

    pub fn bus(&self, scl: u8, sda: u8) -> Option<FakeBme280> {
        self.state.borrow().buses.get(&(scl, sda)).cloned()
    }
}

impl Board for MockBoard {
    type Adc = MockAdc;
    type I2c = FakeBme280;

    fn adc(&mut self, channel: u8) -> Option<MockAdc> {
        let mut state = self.state.borrow_mut();
        if state.missing_adcs.contains(&channel) {
            return None;
        }
        let adc = state.adcs.remove(&channel).unwrap_or_else(|| MockAdc::constant(512, 1024));
        state.events.push(BoardEvent::AdcOpened(channel));
        Some(adc)
    }

    fn i2c(&mut self, scl: u8, sda: u8) -> Option<FakeBme280> {
        let mut state = self.state.borrow_mut();
        let bus = state.buses.entry((scl, sda)).or_insert_with(FakeBme280::new).clone();
        state.events.push(BoardEvent::I2cOpened(scl, sda));
        Some(bus)
    }

    fn release_adc(&mut self, channel: u8, _adc: MockAdc) {
        self.state.borrow_mut().events.push(BoardEvent::AdcReleased(channel));
    }

    fn release_i2c(&mut self, scl: u8, sda: u8, _bus: FakeBme280) {
        self.state.borrow_mut().events.push(BoardEvent::I2cReleased(scl, sda));
    }
}

enum AdcMode {
    Values,
    Stuck,
    Failing,
}

pub struct MockAdc {
    mode: AdcMode,
    values: Vec<u16>,
    next: usize,
    failures_left: usize,
    delay: Option<embassy_time::Duration>,
    full_scale: u16,
}

impl MockAdc {
    pub fn constant(value: u16, full_scale: u16) -> Self {
        Self::sequence(&[value], full_scale)
    }

    /// Repeats `values` in order.
    pub fn sequence(values: &[u16], full_scale: u16) -> Self {
        Self {
            mode: AdcMode::Values,
            values: values.to_vec(),
            next: 0,
            failures_left: 0,
            delay: None,
            full_scale,
        }
    }

    pub fn stuck(full_scale: u16) -> Self {
        Self {
            mode: AdcMode::Stuck,
            ..Self::constant(0, full_scale)
        }
    }

    /// Fails the first `failures` conversions, then reads `value`.
    pub fn flaky(failures: usize, value: u16, full_scale: u16) -> Self {
        Self {
            failures_left: failures,
            ..Self::constant(value, full_scale)
        }
    }

    /// Reads `value`, but every conversion takes `delay`.
    pub fn slow(delay: embassy_time::Duration, value: u16, full_scale: u16) -> Self {
        Self {
            delay: Some(delay),
            ..Self::constant(value, full_scale)
        }
    }

    pub fn failing(full_scale: u16) -> Self {
        Self {
            mode: AdcMode::Failing,
            ..Self::constant(0, full_scale)
        }
    }
}

impl AnalogInput for MockAdc {
    fn full_scale(&self) -> u16 {
        self.full_scale
    }

    async fn read(&mut self) -> Result<u16, HalError> {
        if let Some(delay) = self.delay {
            embassy_time::Timer::after(delay).await;
        }
        match self.mode {
            AdcMode::Values if self.failures_left > 0 => {
                self.failures_left -= 1;
                Err(HalError::Conversion)
            }
            AdcMode::Values => {
                let value = self.values[self.next % self.values.len()];
                self.next += 1;
                Ok(value)
            }
            AdcMode::Stuck => core::future::pending().await,
            AdcMode::Failing => Err(HalError::Conversion),
        }
    }
}

struct FakeBme280State {
    present: bool,
    failing: bool,
    registers: [u8; 256],
    pointer: u8,
    busy_for: u32,
    busy_remaining: u32,
    forced: u32,
}

/// Register level model of a BME280 at 0x76, loaded with the datasheet calibration example.
#[derive(Clone)]
pub struct FakeBme280 {
    state: Rc<RefCell<FakeBme280State>>,
}

impl Default for FakeBme280 {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBme280 {
    pub const CALIB_00: [u8; 26] = [
        0x70, 0x6B, 0x43, 0x67, 0x18, 0xFC, 0x7D, 0x8E, 0x43, 0xD6, 0xD0, 0x0B, 0x27, 0x0B, 0x8C, 0x00, 0xF9, 0xFF, 0x8C, 0x3C, 0xF8, 0xC6, 0x70, 0x17,
        0x00, 0x4B,
    ];
    pub const CALIB_26: [u8; 7] = [0x6A, 0x01, 0x00, 0x14, 0x24, 0x03, 0x1E];
    // adc_P = 415148, adc_T = 519888, adc_H = 30000
    pub const DATA: [u8; 8] = [0x65, 0x5A, 0xC0, 0x7E, 0xED, 0x00, 0x75, 0x30];

    pub fn new() -> Self {
        let mut registers = [0u8; 256];
        registers[REG_CHIP_ID as usize] = CHIP_ID;
        registers[REG_CALIB_00 as usize..REG_CALIB_00 as usize + 26].copy_from_slice(&Self::CALIB_00);
        registers[REG_CALIB_26 as usize..REG_CALIB_26 as usize + 7].copy_from_slice(&Self::CALIB_26);
        registers[REG_PRESS_MSB as usize..REG_PRESS_MSB as usize + 8].copy_from_slice(&Self::DATA);
        Self {
            state: Rc::new(RefCell::new(FakeBme280State {
                present: true,
                failing: false,
                registers,
                pointer: 0,
                busy_for: 0,
                busy_remaining: 0,
                forced: 0,
            })),
        }
    }

    pub fn absent() -> Self {
        let fake = Self::new();
        fake.state.borrow_mut().present = false;
        fake
    }

    pub fn with_chip_id(self, id: u8) -> Self {
        self.state.borrow_mut().registers[REG_CHIP_ID as usize] = id;
        self
    }

    pub fn with_erased_calibration(self) -> Self {
        self.state.borrow_mut().registers[REG_CALIB_00 as usize..REG_CALIB_00 as usize + 26].fill(0);
        self
    }

    /// Number of status polls reporting a running conversion after each trigger.
    pub fn busy_for(self, polls: u32) -> Self {
        self.state.borrow_mut().busy_for = polls;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.borrow_mut().failing = failing;
    }

    pub fn register(&self, register: u8) -> u8 {
        self.state.borrow().registers[register as usize]
    }

    pub fn forced_conversions(&self) -> u32 {
        self.state.borrow().forced
    }

    pub fn calibration() -> Calibration {
        Calibration {
            dig_t1: 27504,
            dig_t2: 26435,
            dig_t3: -1000,
            dig_p1: 36477,
            dig_p2: -10685,
            dig_p3: 3024,
            dig_p4: 2855,
            dig_p5: 140,
            dig_p6: -7,
            dig_p7: 15500,
            dig_p8: -14600,
            dig_p9: 6000,
            dig_h1: 75,
            dig_h2: 362,
            dig_h3: 0,
            dig_h4: 324,
            dig_h5: 50,
            dig_h6: 30,
        }
    }
}

impl FakeBme280State {
    fn write(&mut self, register: u8, value: u8) {
        match register {
            REG_RESET => {}
            REG_CTRL_MEAS => {
                if value & 0b11 == 0b01 {
                    self.forced += 1;
                    self.busy_remaining = self.busy_for;
                }
                self.registers[register as usize] = value;
            }
            _ => self.registers[register as usize] = value,
        }
    }

    fn read(&mut self, register: u8) -> u8 {
        match register {
            REG_STATUS if self.busy_remaining > 0 => {
                self.busy_remaining -= 1;
                0x08
            }
            REG_STATUS => 0x00,
            _ => self.registers[register as usize],
        }
    }
}

impl ErrorType for FakeBme280 {
    type Error = ErrorKind;
}

impl I2c for FakeBme280 {
    async fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        if !state.present || address != BME280_PRIMARY_ADDRESS {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        if state.failing {
            return Err(ErrorKind::Bus);
        }
        for operation in operations {
            match operation {
                Operation::Write(bytes) => {
                    if let Some((register, values)) = bytes.split_first() {
                        state.pointer = *register;
                        for value in values {
                            let pointer = state.pointer;
                            state.write(pointer, *value);
                            state.pointer = pointer.wrapping_add(1);
                        }
                    }
                }
                Operation::Read(buf) => {
                    for byte in buf.iter_mut() {
                        let pointer = state.pointer;
                        *byte = state.read(pointer);
                        state.pointer = pointer.wrapping_add(1);
                    }
                }
            }
        }
        Ok(())
    }
}
