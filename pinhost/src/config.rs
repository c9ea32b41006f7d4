//! Configuration management for pinhost.
//!
//! Configuration is read from a JSON file when one is given, otherwise
//! defaults apply. Environment variables override individual settings
//! afterwards:
//!
//! - `PINHOST_LOG_UART`: UART index that receives backend diagnostics
//! - `PINHOST_SERIAL_TEMPLATE`: host serial path template, `{n}` is
//!   replaced by the host port number

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::log_sink::LogLevel;
use crate::serial::UART_COUNT;

pub const ENV_LOG_UART: &str = "PINHOST_LOG_UART";
pub const ENV_SERIAL_TEMPLATE: &str = "PINHOST_SERIAL_TEMPLATE";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub emulator: EmulatorConfig,
    pub serial: SerialConfig,
    pub display: DisplayConfig,
    /// Devices the runner loads and wires at startup, in order.
    pub devices: Vec<DeviceConfig>,
}

/// Core engine settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Queued pin drives applied per dispatch before the rest is dropped.
    pub settle_limit: usize,

    /// Host frame period of the runner, in milliseconds.
    pub frame_ms: u64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            settle_limit: 64,
            frame_ms: 16,
        }
    }
}

/// Serial bridge settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SerialConfig {
    pub path_template: String,

    /// Size of a single host read.
    pub chunk_size: usize,

    /// Receive buffer capacity allocated by `begin`.
    pub rx_capacity: usize,

    pub log_uart: usize,

    /// Serve every host port from an in-memory echo instead of a device.
    pub loopback: bool,

    /// UARTs the runner attaches and opens at startup.
    pub ports: Vec<UartConfig>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path_template: "/dev/ttyS{n}".into(),
            chunk_size: 1024,
            rx_capacity: 1024,
            log_uart: 0,
            loopback: false,
            ports: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UartConfig {
    pub uart: usize,
    pub host_port: u16,
    #[serde(default)]
    pub baud: u32,
}

/// Frame buffer geometry.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u16,
    pub height: u16,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
        }
    }
}

/// One device to load.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Module name in the catalog.
    pub module: String,

    #[serde(default)]
    pub properties: Vec<PropertyConfig>,

    #[serde(default)]
    pub pins: Vec<PinLink>,

    /// SPI ports to attach to.
    #[serde(default)]
    pub spi: Vec<usize>,

    /// I2C ports to attach to.
    #[serde(default)]
    pub i2c: Vec<usize>,

    /// Prefix of diagnostic lines; logging stays off when absent.
    #[serde(default)]
    pub log_prefix: Option<String>,

    #[serde(default)]
    pub log_level: LogLevel,
}

/// Backend property, with the payload as a hex string.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PropertyConfig {
    pub id: u32,
    #[serde(default)]
    pub data: String,
}

impl PropertyConfig {
    pub fn bytes(&self) -> Result<Vec<u8>> {
        hex::decode(&self.data)
            .map_err(|e| Error::Config(format!("property {}: {e}", self.id)))
    }
}

/// MCU pin to device-side pin.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct PinLink {
    pub pin: u8,
    pub device_pin: u8,
}

impl Config {
    /// Load from `path` (or defaults), apply environment overrides and
    /// validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_json(&fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply overrides from `lookup`, normally the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_LOG_UART) {
            self.serial.log_uart = value
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{ENV_LOG_UART}: not a UART index: {value}")))?;
        }
        if let Some(value) = lookup(ENV_SERIAL_TEMPLATE) {
            self.serial.path_template = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.emulator.settle_limit == 0 {
            return Err(Error::Config("settle_limit must be positive".into()));
        }
        if self.serial.log_uart >= UART_COUNT {
            return Err(Error::Config(format!(
                "log_uart {} out of range (0..{UART_COUNT})",
                self.serial.log_uart
            )));
        }
        if !self.serial.path_template.contains("{n}") {
            return Err(Error::Config("path_template must contain {n}".into()));
        }
        if self.serial.chunk_size == 0 || self.serial.rx_capacity == 0 {
            return Err(Error::Config("serial buffer sizes must be positive".into()));
        }
        if self.display.width == 0 || self.display.height == 0 {
            return Err(Error::Config("display size must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.serial.path_template, "/dev/ttyS{n}");
        assert_eq!(config.serial.rx_capacity, 1024);
        assert_eq!((config.display.width, config.display.height), (320, 240));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = Config::from_json(
            r#"{
                "serial": { "log_uart": 2 },
                "devices": [
                    {
                        "module": "indicator",
                        "pins": [{ "pin": 2, "device_pin": 0 }],
                        "properties": [{ "id": 0, "data": "6c6564" }],
                        "log_prefix": "[led] ",
                        "log_level": "debug"
                    }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.serial.log_uart, 2);
        assert_eq!(config.serial.chunk_size, 1024);
        assert_eq!(config.emulator.settle_limit, 64);
        let device = &config.devices[0];
        assert_eq!(device.module, "indicator");
        assert_eq!(device.log_level, LogLevel::Debug);
        assert_eq!(device.properties[0].bytes().unwrap(), b"led");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(|key| match key {
                ENV_LOG_UART => Some("1".into()),
                ENV_SERIAL_TEMPLATE => Some("/dev/ttyUSB{n}".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.serial.log_uart, 1);
        assert_eq!(config.serial.path_template, "/dev/ttyUSB{n}");

        let err = config.apply_overrides(|key| (key == ENV_LOG_UART).then(|| "two".into()));
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.serial.log_uart = UART_COUNT;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.serial.path_template = "/dev/ttyS0".into();
        assert!(config.validate().is_err());

        assert!(Config::from_json("{ not json").is_err());
    }
}
