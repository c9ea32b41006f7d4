//! Common error types for pinhost.
//!
//! This module provides a centralized Error enum using thiserror,
//! with conversions from underlying error types used throughout the crate.

use thiserror::Error;

use crate::bus::BusKind;
use crate::device::{DeviceError, LoadError};

/// Main error type for pinhost operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Device module could not be loaded
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Device handle does not belong to this emulator
    #[error("Unknown device handle")]
    UnknownDevice,

    /// Device does not advertise the capability an operation needs
    #[error("Device '{device}' does not support {capability}")]
    Unsupported {
        device: String,
        capability: &'static str,
    },

    /// Device backend rejected a request
    #[error("Device '{device}' failed: {source}")]
    Device {
        device: String,
        #[source]
        source: DeviceError,
    },

    /// Bus port index outside the fixed table
    #[error("{kind} port {port} out of range")]
    BusPort { kind: BusKind, port: usize },

    /// UART index outside the fixed table
    #[error("UART {0} out of range")]
    UartIndex(usize),

    /// UART state machine rejected a transition
    #[error("UART {uart}: {reason}")]
    Uart { uart: usize, reason: &'static str },

    /// Frame buffer request rejected
    #[error("Display: {0}")]
    Display(&'static str),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
