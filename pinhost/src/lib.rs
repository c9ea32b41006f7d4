//! Host-side emulation of a microcontroller's pin, bus and UART layer.
//!
//! Embedded application code written against a GPIO/SPI/I2C/UART API runs
//! against an [`Emulator`] whose peripherals are pluggable [`Device`]
//! backends, and whose UARTs are bridged to host serial ports by a
//! [`SerialBridge`].

pub mod bus;
pub mod clock;
pub mod config;
pub mod device;
pub mod display;
pub mod emulator;
pub mod error;
pub mod gpio;
pub mod log_sink;
pub mod serial;
pub mod tracing;

pub use device::{Capabilities, Device, DeviceError, DeviceId};
pub use emulator::Emulator;
pub use error::{Error, Result};
pub use serial::SerialBridge;
