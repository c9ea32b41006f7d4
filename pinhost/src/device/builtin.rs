//! Built-in device backends.
//!
//! Small generic peripherals that exercise each capability of the device
//! interface. They are registered in the module catalog under the names
//! `indicator`, `pin-mirror`, `spi-echo` and `i2c-memory`.

use super::registry::DeviceModule;
use super::{Capabilities, Device, DeviceError};
use crate::gpio::PinLine;
use crate::log_sink::{DeviceLog, LogLevel, LogSink};

inventory::submit! {
    DeviceModule {
        name: "indicator",
        description: "Logs level changes on connected pins",
        create: create_indicator,
    }
}

inventory::submit! {
    DeviceModule {
        name: "pin-mirror",
        description: "Copies device pin 0 onto device pin 1 every tick",
        create: create_pin_mirror,
    }
}

inventory::submit! {
    DeviceModule {
        name: "spi-echo",
        description: "SPI loopback, MISO follows MOSI",
        create: create_spi_echo,
    }
}

inventory::submit! {
    DeviceModule {
        name: "i2c-memory",
        description: "256-byte I2C register file",
        create: create_i2c_memory,
    }
}

fn create_indicator() -> Result<Box<dyn Device>, i32> {
    Ok(Box::new(Indicator::default()))
}

fn create_pin_mirror() -> Result<Box<dyn Device>, i32> {
    Ok(Box::new(PinMirror::default()))
}

fn create_spi_echo() -> Result<Box<dyn Device>, i32> {
    Ok(Box::new(SpiEcho::default()))
}

fn create_i2c_memory() -> Result<Box<dyn Device>, i32> {
    Ok(Box::new(I2cMemory::default()))
}

fn attach(log: &mut Option<DeviceLog>, sink: LogSink, prefix: &str, level: LogLevel) {
    *log = Some(DeviceLog::new(sink, prefix, level));
}

fn emit(log: &Option<DeviceLog>, level: LogLevel, message: impl FnOnce() -> String) {
    if let Some(log) = log {
        if log.enabled(level) {
            log.emit(level, &message());
        }
    }
}

/// Logs every level change of its connected pins.
#[derive(Default)]
pub struct Indicator {
    label: Option<String>,
    pins: Vec<u8>,
    log: Option<DeviceLog>,
}

impl Indicator {
    /// Property 0: UTF-8 label used in log lines.
    pub const PROP_LABEL: u32 = 0;

    /// Device-side pins connected so far.
    pub fn pins(&self) -> &[u8] {
        &self.pins
    }
}

impl Device for Indicator {
    fn capabilities(&self) -> Capabilities {
        Capabilities::CONFIGURE
            | Capabilities::CONNECT
            | Capabilities::PIN_CHANGE
            | Capabilities::ATTACH_LOG
    }

    fn configure(&mut self, property: u32, data: &[u8]) -> Result<(), DeviceError> {
        match property {
            Self::PROP_LABEL => {
                let label = std::str::from_utf8(data)
                    .map_err(|e| DeviceError::InvalidData(e.to_string()))?;
                self.label = Some(label.to_string());
                Ok(())
            }
            _ => Err(DeviceError::InvalidProperty(property)),
        }
    }

    fn connect(&mut self, pin: u8, _line: PinLine) -> Result<(), DeviceError> {
        self.pins.push(pin);
        Ok(())
    }

    fn pin_change(&mut self, pin: u8, value: u32) -> Result<(), DeviceError> {
        let label = self.label.as_deref().unwrap_or("indicator");
        emit(&self.log, LogLevel::Info, || {
            let state = if value == 0 { "off" } else { "on" };
            format!("{label} pin {pin} {state} ({value})")
        });
        Ok(())
    }

    fn attach_log(
        &mut self,
        sink: LogSink,
        prefix: &str,
        level: LogLevel,
    ) -> Result<(), DeviceError> {
        attach(&mut self.log, sink, prefix, level);
        Ok(())
    }
}

/// Copies the level on device pin 0 to device pin 1 on every tick.
#[derive(Default)]
pub struct PinMirror {
    input: Option<PinLine>,
    output: Option<PinLine>,
    invert: bool,
}

impl PinMirror {
    /// Property 0: one byte, non-zero inverts the copy.
    pub const PROP_INVERT: u32 = 0;
    pub const INPUT_PIN: u8 = 0;
    pub const OUTPUT_PIN: u8 = 1;
}

impl Device for PinMirror {
    fn capabilities(&self) -> Capabilities {
        Capabilities::CONFIGURE | Capabilities::CONNECT | Capabilities::UPDATE
    }

    fn configure(&mut self, property: u32, data: &[u8]) -> Result<(), DeviceError> {
        match (property, data) {
            (Self::PROP_INVERT, [flag]) => {
                self.invert = *flag != 0;
                Ok(())
            }
            (Self::PROP_INVERT, _) => Err(DeviceError::InvalidData("expected one byte".into())),
            _ => Err(DeviceError::InvalidProperty(property)),
        }
    }

    fn connect(&mut self, pin: u8, line: PinLine) -> Result<(), DeviceError> {
        match pin {
            Self::INPUT_PIN => self.input = Some(line),
            Self::OUTPUT_PIN => self.output = Some(line),
            _ => return Err(DeviceError::InvalidPin(pin)),
        }
        Ok(())
    }

    fn update(&mut self) -> Result<(), DeviceError> {
        let (Some(input), Some(output)) = (&self.input, &self.output) else {
            return Ok(());
        };
        let level = (input.get() != 0) != self.invert;
        let value = u32::from(level);
        if output.get() != value {
            output.set(value);
        }
        Ok(())
    }
}

/// SPI loopback: the received data equals the transmitted data.
#[derive(Default)]
pub struct SpiEcho {
    bits: u64,
    log: Option<DeviceLog>,
}

impl SpiEcho {
    pub fn bits_transferred(&self) -> u64 {
        self.bits
    }
}

impl Device for SpiEcho {
    fn capabilities(&self) -> Capabilities {
        Capabilities::SPI | Capabilities::ATTACH_LOG
    }

    fn transfer_bits_spi(&mut self, data: &mut [u8], size_bits: usize) -> Result<(), DeviceError> {
        let bytes = size_bits.div_ceil(8);
        if bytes > data.len() {
            return Err(DeviceError::InvalidData(format!(
                "{size_bits} bits do not fit in {} bytes",
                data.len()
            )));
        }
        self.bits += size_bits as u64;
        emit(&self.log, LogLevel::Verbose, || {
            format!("spi {size_bits} bits: {}", hex::encode(&data[..bytes]))
        });
        Ok(())
    }

    fn attach_log(
        &mut self,
        sink: LogSink,
        prefix: &str,
        level: LogLevel,
    ) -> Result<(), DeviceError> {
        attach(&mut self.log, sink, prefix, level);
        Ok(())
    }
}

/// 256-byte register file on the I2C bus.
///
/// A request is `[address, register, data...]`: the register pointer is set
/// to `register`, data bytes are written from there on, then the response is
/// read from wherever the pointer ended up. The pointer wraps at 256.
/// Requests for other addresses are not answered.
pub struct I2cMemory {
    address: u8,
    memory: [u8; 256],
    pointer: u8,
    log: Option<DeviceLog>,
}

impl I2cMemory {
    /// Property 0: one byte, 7-bit bus address.
    pub const PROP_ADDRESS: u32 = 0;
    /// Property 1: initial contents, loaded from register 0.
    pub const PROP_CONTENTS: u32 = 1;
    pub const DEFAULT_ADDRESS: u8 = 0x50;
}

impl Default for I2cMemory {
    fn default() -> Self {
        Self {
            address: Self::DEFAULT_ADDRESS,
            memory: [0; 256],
            pointer: 0,
            log: None,
        }
    }
}

impl Device for I2cMemory {
    fn capabilities(&self) -> Capabilities {
        Capabilities::CONFIGURE | Capabilities::I2C | Capabilities::ATTACH_LOG
    }

    fn configure(&mut self, property: u32, data: &[u8]) -> Result<(), DeviceError> {
        match (property, data) {
            (Self::PROP_ADDRESS, [addr]) if *addr <= 0x7F => {
                self.address = *addr;
                Ok(())
            }
            (Self::PROP_ADDRESS, _) => Err(DeviceError::InvalidData(
                "expected a 7-bit address".into(),
            )),
            (Self::PROP_CONTENTS, contents) if contents.len() <= self.memory.len() => {
                self.memory[..contents.len()].copy_from_slice(contents);
                Ok(())
            }
            (Self::PROP_CONTENTS, _) => Err(DeviceError::InvalidData(
                "contents exceed 256 bytes".into(),
            )),
            _ => Err(DeviceError::InvalidProperty(property)),
        }
    }

    fn transfer_bytes_i2c(
        &mut self,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<Option<usize>, DeviceError> {
        let Some((&address, rest)) = input.split_first() else {
            return Ok(None);
        };
        if address != self.address {
            return Ok(None);
        }
        if let Some((&register, data)) = rest.split_first() {
            self.pointer = register;
            for &byte in data {
                self.memory[self.pointer as usize] = byte;
                self.pointer = self.pointer.wrapping_add(1);
            }
            if !data.is_empty() {
                emit(&self.log, LogLevel::Debug, || {
                    format!("wrote {} bytes at 0x{register:02X}", data.len())
                });
            }
        }
        for out in output.iter_mut() {
            *out = self.memory[self.pointer as usize];
            self.pointer = self.pointer.wrapping_add(1);
        }
        Ok(Some(output.len()))
    }

    fn attach_log(
        &mut self,
        sink: LogSink,
        prefix: &str,
        level: LogLevel,
    ) -> Result<(), DeviceError> {
        attach(&mut self.log, sink, prefix, level);
        Ok(())
    }
}
