//! Peripheral backend interface.
//!
//! A device is a pluggable peripheral implementation: a display controller,
//! a sensor, a button matrix, a loopback. Each backend advertises what it
//! can do through a [`Capabilities`] set and implements the matching
//! operations of the [`Device`] trait. Callers consult `capabilities()`
//! before every invocation; capabilities may change over a device's life
//! (e.g. after `configure`), so they are never cached.

pub mod builtin;
#[cfg(test)]
pub(crate) mod mock;
pub mod registry;

use bitflags::bitflags;
use thiserror::Error;

use crate::gpio::PinLine;
use crate::log_sink::{LogLevel, LogSink};

pub use registry::{DeviceId, DeviceModule, DeviceRegistry, LoadError, ModuleCatalog};

bitflags! {
    /// Operations a backend supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u16 {
        const CONFIGURE = 1 << 0;
        const CONNECT = 1 << 1;
        const UPDATE = 1 << 2;
        const PIN_CHANGE = 1 << 3;
        const SPI = 1 << 4;
        const I2C = 1 << 5;
        const ATTACH_LOG = 1 << 6;
    }
}

/// Errors reported by device backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("operation not supported")]
    Unsupported,
    #[error("unknown property {0}")]
    InvalidProperty(u32),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("device pin {0} not available")]
    InvalidPin(u8),
    #[error("backend status {0}")]
    Status(i32),
}

/// A peripheral backend.
///
/// Every operation has a default that reports [`DeviceError::Unsupported`]
/// or does nothing, so a backend only implements what its capability set
/// advertises.
pub trait Device: Send {
    /// Operations this backend currently supports.
    fn capabilities(&self) -> Capabilities;

    /// Set a backend-defined property.
    fn configure(&mut self, property: u32, data: &[u8]) -> Result<(), DeviceError> {
        let _ = (property, data);
        Err(DeviceError::Unsupported)
    }

    /// Bind device-side `pin` to an MCU pin. `line` reads and drives the MCU
    /// pin; drives are applied once the current dispatch completes.
    fn connect(&mut self, pin: u8, line: PinLine) -> Result<(), DeviceError> {
        let _ = (pin, line);
        Err(DeviceError::Unsupported)
    }

    /// Periodic tick, once per host frame.
    fn update(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// A connected MCU pin changed; `pin` is the device-side pin.
    fn pin_change(&mut self, pin: u8, value: u32) -> Result<(), DeviceError> {
        let _ = (pin, value);
        Ok(())
    }

    /// Full-duplex SPI transfer of `size_bits` bits, in place.
    fn transfer_bits_spi(&mut self, data: &mut [u8], size_bits: usize) -> Result<(), DeviceError> {
        let _ = (data, size_bits);
        Err(DeviceError::Unsupported)
    }

    /// I2C request/response. `output.len()` is the capacity; returns the
    /// number of bytes written to `output`, or `None` when the request was
    /// not addressed to this device.
    fn transfer_bytes_i2c(
        &mut self,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<Option<usize>, DeviceError> {
        let _ = (input, output);
        Err(DeviceError::Unsupported)
    }

    /// Route this backend's diagnostics through `sink`.
    fn attach_log(
        &mut self,
        sink: LogSink,
        prefix: &str,
        level: LogLevel,
    ) -> Result<(), DeviceError> {
        let _ = (sink, prefix, level);
        Err(DeviceError::Unsupported)
    }

    /// Release backend resources. Called once, at emulator shutdown.
    fn destroy(&mut self) {}
}
