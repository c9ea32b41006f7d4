//! SPI and I2C bus fan-out.
//!
//! Each bus kind has a fixed number of ports, and each port an ordered list
//! of attached devices. A transfer is broadcast to every attached device
//! that advertises the transfer capability at the time of the call, in
//! attachment order. There is no arbitration: when several devices write
//! the response buffer, the last one wins.

use std::fmt;

use crate::device::{Capabilities, DeviceId, DeviceRegistry};
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Number of SPI ports.
pub const SPI_PORT_COUNT: usize = 3;

/// Number of I2C ports.
pub const I2C_PORT_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Spi,
    I2c,
}

impl BusKind {
    pub fn port_count(self) -> usize {
        match self {
            BusKind::Spi => SPI_PORT_COUNT,
            BusKind::I2c => I2C_PORT_COUNT,
        }
    }

    fn capability(self) -> Capabilities {
        match self {
            BusKind::Spi => Capabilities::SPI,
            BusKind::I2c => Capabilities::I2C,
        }
    }
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusKind::Spi => write!(f, "SPI"),
            BusKind::I2c => write!(f, "I2C"),
        }
    }
}

/// Attachment tables for both bus kinds.
pub struct Buses {
    spi: [Vec<DeviceId>; SPI_PORT_COUNT],
    i2c: [Vec<DeviceId>; I2C_PORT_COUNT],
}

impl Buses {
    pub fn new() -> Self {
        Self {
            spi: Default::default(),
            i2c: Default::default(),
        }
    }

    /// Devices attached to a port, in attachment order.
    pub fn attached(&self, kind: BusKind, port: usize) -> Result<&[DeviceId]> {
        self.port(kind, port).map(Vec::as_slice)
    }

    /// Attach `device` to `port`. The device must currently advertise the
    /// bus's transfer capability.
    pub fn attach(
        &mut self,
        kind: BusKind,
        port: usize,
        device: DeviceId,
        devices: &DeviceRegistry,
    ) -> Result<()> {
        self.port(kind, port)?;
        let caps = devices.capabilities(device).ok_or(Error::UnknownDevice)?;
        if !caps.contains(kind.capability()) {
            return Err(Error::Unsupported {
                device: devices.name(device).unwrap_or_default().to_string(),
                capability: match kind {
                    BusKind::Spi => "SPI transfers",
                    BusKind::I2c => "I2C transfers",
                },
            });
        }
        self.port_mut(kind, port)?.push(device);
        debug!(
            bus = %kind,
            port,
            device = devices.name(device).unwrap_or_default(),
            "Device attached to bus"
        );
        Ok(())
    }

    /// Broadcast an SPI transfer of `size_bits` bits. `data` is exchanged in
    /// place. Returns how many devices took part.
    pub fn transfer_spi(
        &self,
        port: usize,
        data: &mut [u8],
        size_bits: usize,
        devices: &mut DeviceRegistry,
    ) -> Result<usize> {
        let attached = self.port(BusKind::Spi, port)?;
        trace!(port, size_bits, "SPI transfer");
        let mut reached = 0;
        for &id in attached {
            if devices.transfer_spi(id, data, size_bits) {
                reached += 1;
            }
        }
        Ok(reached)
    }

    /// Broadcast an I2C request. `output.len()` is the response capacity;
    /// returns the response length reported by the last responding device,
    /// or 0 when none responded.
    pub fn transfer_i2c(
        &self,
        port: usize,
        input: &[u8],
        output: &mut [u8],
        devices: &mut DeviceRegistry,
    ) -> Result<usize> {
        let attached = self.port(BusKind::I2c, port)?;
        trace!(port, request = %hex::encode(input), capacity = output.len(), "I2C transfer");
        let mut len = 0;
        for &id in attached {
            if let Some(n) = devices.transfer_i2c(id, input, output) {
                len = n;
            }
        }
        Ok(len)
    }

    fn port(&self, kind: BusKind, port: usize) -> Result<&Vec<DeviceId>> {
        let table: &[Vec<DeviceId>] = match kind {
            BusKind::Spi => &self.spi,
            BusKind::I2c => &self.i2c,
        };
        table.get(port).ok_or(Error::BusPort { kind, port })
    }

    fn port_mut(&mut self, kind: BusKind, port: usize) -> Result<&mut Vec<DeviceId>> {
        let table: &mut [Vec<DeviceId>] = match kind {
            BusKind::Spi => &mut self.spi,
            BusKind::I2c => &mut self.i2c,
        };
        table.get_mut(port).ok_or(Error::BusPort { kind, port })
    }
}

impl Default for Buses {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{Call, Journal, MockDevice};
    use crate::log_sink;

    fn registry() -> DeviceRegistry {
        let (sink, _drain) = log_sink::channel();
        DeviceRegistry::new(sink)
    }

    #[test]
    fn test_spi_broadcast_in_attachment_order() {
        let mut devices = registry();
        let journal = Journal::default();
        let first = devices.install("first", Box::new(MockDevice::new("first", &journal)));
        let second = devices.install("second", Box::new(MockDevice::new("second", &journal)));
        let mut buses = Buses::new();
        buses.attach(BusKind::Spi, 0, second, &devices).unwrap();
        buses.attach(BusKind::Spi, 0, first, &devices).unwrap();

        let mut data = [0x9F, 0x00];
        assert_eq!(buses.transfer_spi(0, &mut data, 12, &mut devices).unwrap(), 2);
        assert_eq!(
            journal.all(),
            vec![
                ("second".into(), Call::Spi(vec![0x9F, 0x00], 12)),
                ("first".into(), Call::Spi(vec![0x9F, 0x00], 12)),
            ]
        );
    }

    #[test]
    fn test_out_of_range_ports_are_rejected() {
        let mut devices = registry();
        let journal = Journal::default();
        let id = devices.install("mock", Box::new(MockDevice::new("mock", &journal)));
        let mut buses = Buses::new();

        assert!(matches!(
            buses.attach(BusKind::Spi, SPI_PORT_COUNT, id, &devices),
            Err(Error::BusPort { kind: BusKind::Spi, .. })
        ));
        assert!(buses.attach(BusKind::I2c, I2C_PORT_COUNT, id, &devices).is_err());
        assert!(buses
            .transfer_spi(SPI_PORT_COUNT, &mut [0], 8, &mut devices)
            .is_err());
        assert!(buses
            .transfer_i2c(I2C_PORT_COUNT, &[0x50], &mut [0], &mut devices)
            .is_err());
        for port in 0..SPI_PORT_COUNT {
            assert!(buses.attached(BusKind::Spi, port).unwrap().is_empty());
        }
        assert!(journal.all().is_empty());
    }

    #[test]
    fn test_attach_requires_transfer_capability() {
        let mut devices = registry();
        let journal = Journal::default();
        let id = devices.install(
            "spi-only",
            Box::new(MockDevice::new("spi-only", &journal).with_capabilities(Capabilities::SPI)),
        );
        let mut buses = Buses::new();
        assert!(buses.attach(BusKind::I2c, 0, id, &devices).is_err());
        assert!(buses.attach(BusKind::Spi, 1, id, &devices).is_ok());
        assert!(buses.attached(BusKind::I2c, 0).unwrap().is_empty());
    }

    #[test]
    fn test_capability_checked_on_every_transfer() {
        let mut devices = registry();
        let journal = Journal::default();
        let mock = MockDevice::new("fickle", &journal);
        let switch = mock.capability_switch();
        let id = devices.install("fickle", Box::new(mock));
        let mut buses = Buses::new();
        buses.attach(BusKind::Spi, 2, id, &devices).unwrap();

        *switch.lock() = Capabilities::CONNECT;
        assert_eq!(buses.transfer_spi(2, &mut [1], 8, &mut devices).unwrap(), 0);
        *switch.lock() = Capabilities::SPI;
        assert_eq!(buses.transfer_spi(2, &mut [1], 8, &mut devices).unwrap(), 1);
        assert_eq!(journal.calls_of("fickle").len(), 1);
    }

    #[test]
    fn test_i2c_last_writer_wins() {
        let mut devices = registry();
        let journal = Journal::default();
        let a = devices.install("a", Box::new(MockDevice::new("a", &journal).filling(0x11)));
        let b = devices.install("b", Box::new(MockDevice::new("b", &journal).filling(0x22)));
        let silent = devices.install("silent", Box::new(MockDevice::new("silent", &journal)));
        let mut buses = Buses::new();
        buses.attach(BusKind::I2c, 1, a, &devices).unwrap();
        buses.attach(BusKind::I2c, 1, b, &devices).unwrap();
        buses.attach(BusKind::I2c, 1, silent, &devices).unwrap();

        let mut out = [0u8; 4];
        let len = buses.transfer_i2c(1, &[0x50, 0x00], &mut out, &mut devices).unwrap();
        assert_eq!(len, 0, "last responder reported nothing");
        assert_eq!(out, [0x22; 4]);

        let mut out = [0u8; 2];
        let len = buses.transfer_i2c(0, &[0x50], &mut out, &mut devices).unwrap();
        assert_eq!(len, 0, "empty port");
    }

    #[test]
    fn test_device_on_both_buses() {
        let mut devices = registry();
        let id = devices.load("i2c-memory").unwrap();
        let echo = devices.load("spi-echo").unwrap();
        let mut buses = Buses::new();
        buses.attach(BusKind::I2c, 0, id, &devices).unwrap();
        buses.attach(BusKind::I2c, 1, id, &devices).unwrap();
        assert!(buses.attach(BusKind::Spi, 0, id, &devices).is_err());
        buses.attach(BusKind::Spi, 0, echo, &devices).unwrap();

        let mut out = [0u8; 0];
        buses.transfer_i2c(0, &[0x50, 0x00, 7, 8], &mut out, &mut devices).unwrap();
        let mut out = [0u8; 2];
        assert_eq!(buses.transfer_i2c(1, &[0x50, 0x00], &mut out, &mut devices).unwrap(), 2);
        assert_eq!(out, [7, 8]);
    }

    #[test]
    fn test_i2c_unaddressed_devices_keep_response_length() {
        use crate::device::builtin::I2cMemory;

        let mut devices = registry();
        let first = devices.load("i2c-memory").unwrap();
        let second = devices.load("i2c-memory").unwrap();
        devices
            .configure(first, I2cMemory::PROP_CONTENTS, &[0xDE, 0xAD])
            .unwrap();
        devices
            .configure(second, I2cMemory::PROP_ADDRESS, &[0x51])
            .unwrap();
        let mut buses = Buses::new();
        buses.attach(BusKind::I2c, 0, first, &devices).unwrap();
        buses.attach(BusKind::I2c, 0, second, &devices).unwrap();

        let mut out = [0u8; 2];
        let len = buses.transfer_i2c(0, &[0x50, 0x00], &mut out, &mut devices).unwrap();
        assert_eq!(len, 2);
        assert_eq!(out, [0xDE, 0xAD]);
    }
}
