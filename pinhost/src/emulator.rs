//! The emulator context.
//!
//! One [`Emulator`] owns the pin table, the device registry and the bus
//! tables of a simulated MCU, and exposes the application-facing API over
//! them. It is driven from a single thread: application calls and the
//! host frame loop's [`Emulator::tick`] take `&mut self`.

use crate::bus::{BusKind, Buses};
use crate::clock::{CallContext, Clock};
use crate::config::{Config, DeviceConfig};
use crate::device::{Device, DeviceId, DeviceRegistry};
use crate::display::Display;
use crate::error::Result;
use crate::gpio::{Gpio, InterruptHandler, InterruptMode, Level, PinEvent, PinMode};
use crate::log_sink::{LogLevel, LogSink};
use crate::tracing::prelude::*;
use tokio::sync::broadcast;

pub struct Emulator {
    clock: Clock,
    gpio: Gpio,
    devices: DeviceRegistry,
    buses: Buses,
    display: Display,
}

impl Emulator {
    /// Build an emulator; device backends log through `log`.
    pub fn new(config: &Config, log: LogSink) -> Self {
        let clock = Clock::new();
        Self {
            clock,
            gpio: Gpio::new(clock, config.emulator.settle_limit),
            devices: DeviceRegistry::new(log),
            buses: Buses::new(),
            display: Display::from_config(&config.display),
        }
    }

    pub fn gpio(&self) -> &Gpio {
        &self.gpio
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.devices
    }

    pub fn buses(&self) -> &Buses {
        &self.buses
    }

    /// Shared handle for the presentation side.
    pub fn display(&self) -> &Display {
        &self.display
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PinEvent> {
        self.gpio.subscribe()
    }

    // Pins

    pub fn pin_mode(&mut self, pin: u8, mode: PinMode) {
        self.gpio.set_mode(pin, mode);
    }

    pub fn write(&mut self, pin: u8, value: u32) {
        self.gpio.write(pin, value, &mut self.devices);
    }

    pub fn read(&self, pin: u8) -> u32 {
        self.gpio.read(pin)
    }

    pub fn digital_write(&mut self, pin: u8, level: Level) {
        self.gpio.digital_write(pin, level, &mut self.devices);
    }

    pub fn digital_read(&self, pin: u8) -> Level {
        self.gpio.digital_read(pin)
    }

    pub fn analog_write(&mut self, pin: u8, value: i32) {
        self.gpio.analog_write(pin, value, &mut self.devices);
    }

    pub fn analog_read(&self, pin: u8) -> u32 {
        self.gpio.analog_read(pin)
    }

    /// Inject an external level on `pin`, as a test harness or a host-side
    /// stimulus would.
    pub fn drive(&mut self, pin: u8, value: u32) {
        self.gpio.drive(pin, value, &mut self.devices);
    }

    pub fn attach_interrupt(&mut self, pin: u8, handler: InterruptHandler, mode: InterruptMode) {
        self.gpio.attach_interrupt(pin, handler, mode);
    }

    pub fn detach_interrupt(&mut self, pin: u8) {
        self.gpio.detach_interrupt(pin);
    }

    // Devices

    pub fn load_device(&mut self, module: &str) -> Result<DeviceId> {
        Ok(self.devices.load(module)?)
    }

    pub fn install_device(&mut self, name: &str, device: Box<dyn Device>) -> DeviceId {
        self.devices.install(name, device)
    }

    pub fn configure_device(&mut self, device: DeviceId, property: u32, data: &[u8]) -> Result<()> {
        self.devices.configure(device, property, data)
    }

    pub fn attach_log(&mut self, device: DeviceId, prefix: &str, level: LogLevel) -> Result<()> {
        self.devices.attach_log(device, prefix, level)
    }

    /// Connect MCU `pin` to `device_pin` on `device`.
    pub fn connect(&mut self, pin: u8, device: DeviceId, device_pin: u8) -> Result<()> {
        self.gpio.connect(pin, device, device_pin, &mut self.devices)
    }

    pub fn attach_bus(&mut self, kind: BusKind, port: usize, device: DeviceId) -> Result<()> {
        self.buses.attach(kind, port, device, &self.devices)
    }

    /// Load and wire a device as described by `config`.
    pub fn add_device(&mut self, config: &DeviceConfig) -> Result<DeviceId> {
        let id = self.load_device(&config.module)?;
        for property in &config.properties {
            self.configure_device(id, property.id, &property.bytes()?)?;
        }
        if let Some(prefix) = &config.log_prefix {
            self.attach_log(id, prefix, config.log_level)?;
        }
        for link in &config.pins {
            self.connect(link.pin, id, link.device_pin)?;
        }
        for &port in &config.spi {
            self.attach_bus(BusKind::Spi, port, id)?;
        }
        for &port in &config.i2c {
            self.attach_bus(BusKind::I2c, port, id)?;
        }
        Ok(id)
    }

    // Buses

    /// SPI transfer on `port`; returns how many devices took part.
    pub fn spi_transfer(
        &mut self,
        port: usize,
        data: &mut [u8],
        size_bits: usize,
    ) -> Result<usize> {
        let reached = self.buses.transfer_spi(port, data, size_bits, &mut self.devices)?;
        self.gpio.settle(&mut self.devices);
        Ok(reached)
    }

    /// I2C request on `port`; returns the response length.
    pub fn i2c_transfer(&mut self, port: usize, input: &[u8], output: &mut [u8]) -> Result<usize> {
        let len = self.buses.transfer_i2c(port, input, output, &mut self.devices)?;
        self.gpio.settle(&mut self.devices);
        Ok(len)
    }

    // Host loop

    /// One host frame: update every device, then apply the pin drives the
    /// updates queued. Returns how many devices were updated.
    pub fn tick(&mut self) -> usize {
        let updated = self.devices.tick();
        self.gpio.settle(&mut self.devices);
        updated
    }

    /// Destroy every device. Idempotent; also runs on drop.
    pub fn shutdown(&mut self) {
        info!(devices = self.devices.len(), "Emulator shutting down");
        self.devices.shutdown();
    }

    // Timing

    pub fn timing(&self) -> CallContext<'_> {
        CallContext::application(&self.clock)
    }

    pub fn millis(&self) -> u32 {
        self.clock.millis()
    }

    pub fn micros(&self) -> u32 {
        self.clock.micros()
    }

    pub fn delay(&self, ms: u32) {
        self.timing().delay(ms);
    }

    pub fn delay_microseconds(&self, us: u32) {
        self.timing().delay_microseconds(us);
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        self.devices.shutdown();
    }
}
