//! Device registry and module catalog.
//!
//! Backends are found by module name. Built-in modules register themselves
//! with `inventory::submit!` and a [`DeviceModule`] descriptor; hosts and
//! tests can add more at runtime through [`ModuleCatalog::register`].
//!
//! Loaded devices are never unloaded or deduplicated: like physical
//! hardware, a device exists from the moment it is loaded until the
//! emulator shuts down. Every device is addressed by a [`DeviceId`].

use std::collections::HashMap;
use std::sync::Arc;

use slotmap::{new_key_type, SlotMap};
use thiserror::Error;

use super::{Capabilities, Device};
use crate::error::{Error, Result};
use crate::gpio::PinLine;
use crate::log_sink::{LogLevel, LogSink};
use crate::tracing::prelude::*;

new_key_type! {
    /// Stable handle of a loaded device.
    pub struct DeviceId;
}

/// Creation entry point of a module. `Err` carries the backend's status
/// code.
pub type CreateFn = fn() -> std::result::Result<Box<dyn Device>, i32>;

type Factory = Arc<dyn Fn() -> std::result::Result<Box<dyn Device>, i32> + Send + Sync>;

/// Statically registered backend module.
pub struct DeviceModule {
    pub name: &'static str,
    pub description: &'static str,
    pub create: CreateFn,
}

inventory::collect!(DeviceModule);

/// Reasons a module fails to load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("device module '{0}' not found")]
    NotFound(String),
    #[error("device module '{module}' failed to create device (status {status})")]
    CreateFailed { module: String, status: i32 },
}

/// Name-to-entry-point lookup for device modules.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    runtime: HashMap<String, Factory>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under `name`, shadowing any built-in of the same
    /// name.
    pub fn register<F>(&mut self, name: &str, create: F)
    where
        F: Fn() -> std::result::Result<Box<dyn Device>, i32> + Send + Sync + 'static,
    {
        self.runtime.insert(name.to_string(), Arc::new(create));
    }

    /// Every module name known to the catalog, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = inventory::iter::<DeviceModule>()
            .map(|m| m.name.to_string())
            .chain(self.runtime.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn resolve(&self, name: &str) -> Option<Factory> {
        if let Some(factory) = self.runtime.get(name) {
            return Some(Arc::clone(factory));
        }
        inventory::iter::<DeviceModule>()
            .find(|m| m.name == name)
            .map(|m| {
                let create = m.create;
                Arc::new(move || create()) as Factory
            })
    }
}

struct DeviceEntry {
    name: String,
    device: Box<dyn Device>,
}

/// Owner of every loaded device.
pub struct DeviceRegistry {
    devices: SlotMap<DeviceId, DeviceEntry>,
    catalog: ModuleCatalog,
    log: LogSink,
    shut_down: bool,
}

impl DeviceRegistry {
    /// Create an empty registry whose backends log through `log`.
    pub fn new(log: LogSink) -> Self {
        Self::with_catalog(log, ModuleCatalog::new())
    }

    pub fn with_catalog(log: LogSink, catalog: ModuleCatalog) -> Self {
        Self {
            devices: SlotMap::with_key(),
            catalog,
            log,
            shut_down: false,
        }
    }

    pub fn catalog_mut(&mut self) -> &mut ModuleCatalog {
        &mut self.catalog
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Device handles in load order.
    pub fn ids(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.devices.keys()
    }

    pub fn name(&self, id: DeviceId) -> Option<&str> {
        self.devices.get(id).map(|e| e.name.as_str())
    }

    /// Current capabilities of a device, queried fresh.
    pub fn capabilities(&self, id: DeviceId) -> Option<Capabilities> {
        self.devices.get(id).map(|e| e.device.capabilities())
    }

    /// Load module `name` and register the device it creates.
    ///
    /// On failure the registry is unchanged.
    pub fn load(&mut self, name: &str) -> std::result::Result<DeviceId, LoadError> {
        let factory = self
            .catalog
            .resolve(name)
            .ok_or_else(|| LoadError::NotFound(name.to_string()))?;
        let device = factory().map_err(|status| LoadError::CreateFailed {
            module: name.to_string(),
            status,
        })?;
        let id = self.install(name, device);
        info!(module = name, "Device loaded");
        Ok(id)
    }

    /// Register an already constructed device.
    pub fn install(&mut self, name: &str, device: Box<dyn Device>) -> DeviceId {
        let caps = device.capabilities();
        let id = self.devices.insert(DeviceEntry {
            name: name.to_string(),
            device,
        });
        debug!(device = name, capabilities = ?caps, "Device registered");
        id
    }

    /// Set a backend property.
    pub fn configure(&mut self, id: DeviceId, property: u32, data: &[u8]) -> Result<()> {
        let entry = self.entry_with(id, Capabilities::CONFIGURE, "configure")?;
        entry
            .device
            .configure(property, data)
            .map_err(|source| Error::Device {
                device: entry.name.clone(),
                source,
            })
    }

    /// Hand the log sink to a device. Succeeds without effect when the
    /// device has no log support.
    pub fn attach_log(&mut self, id: DeviceId, prefix: &str, level: LogLevel) -> Result<()> {
        let sink = self.log.clone();
        let entry = self.devices.get_mut(id).ok_or(Error::UnknownDevice)?;
        if !entry.device.capabilities().contains(Capabilities::ATTACH_LOG) {
            trace!(device = %entry.name, "No log support, skipping");
            return Ok(());
        }
        entry
            .device
            .attach_log(sink, prefix, level)
            .map_err(|source| Error::Device {
                device: entry.name.clone(),
                source,
            })
    }

    /// Run `update` on every device that supports it, in load order.
    /// Returns how many devices were updated.
    pub fn tick(&mut self) -> usize {
        let mut updated = 0;
        for entry in self.devices.values_mut() {
            if !entry.device.capabilities().contains(Capabilities::UPDATE) {
                continue;
            }
            if let Err(e) = entry.device.update() {
                warn!(device = %entry.name, error = %e, "Device update failed");
            }
            updated += 1;
        }
        updated
    }

    /// Destroy every device once. Later calls do nothing.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        for entry in self.devices.values_mut() {
            debug!(device = %entry.name, "Destroying device");
            entry.device.destroy();
        }
    }

    pub(crate) fn connect(&mut self, id: DeviceId, device_pin: u8, line: PinLine) -> Result<()> {
        let entry = self.entry_with(id, Capabilities::CONNECT, "connect")?;
        entry
            .device
            .connect(device_pin, line)
            .map_err(|source| Error::Device {
                device: entry.name.clone(),
                source,
            })
    }

    pub(crate) fn pin_change(&mut self, id: DeviceId, pin: u8, value: u32) {
        let Some(entry) = self.devices.get_mut(id) else {
            return;
        };
        if !entry.device.capabilities().contains(Capabilities::PIN_CHANGE) {
            return;
        }
        trace!(device = %entry.name, pin, value, "Pin change");
        if let Err(e) = entry.device.pin_change(pin, value) {
            warn!(device = %entry.name, pin, error = %e, "Pin change rejected");
        }
    }

    /// Returns false when the device is gone or lacks SPI.
    pub(crate) fn transfer_spi(&mut self, id: DeviceId, data: &mut [u8], size_bits: usize) -> bool {
        let Some(entry) = self.devices.get_mut(id) else {
            return false;
        };
        if !entry.device.capabilities().contains(Capabilities::SPI) {
            return false;
        }
        if let Err(e) = entry.device.transfer_bits_spi(data, size_bits) {
            warn!(device = %entry.name, error = %e, "SPI transfer failed");
        }
        true
    }

    /// Returns the length the device wrote, or None when it did not
    /// respond (gone, no I2C, not addressed, or failed).
    pub(crate) fn transfer_i2c(
        &mut self,
        id: DeviceId,
        input: &[u8],
        output: &mut [u8],
    ) -> Option<usize> {
        let entry = self.devices.get_mut(id)?;
        if !entry.device.capabilities().contains(Capabilities::I2C) {
            return None;
        }
        match entry.device.transfer_bytes_i2c(input, output) {
            Ok(Some(len)) => Some(len.min(output.len())),
            Ok(None) => {
                trace!(device = %entry.name, "I2C request not addressed to device");
                None
            }
            Err(e) => {
                warn!(device = %entry.name, error = %e, "I2C transfer failed");
                None
            }
        }
    }

    fn entry_with(
        &mut self,
        id: DeviceId,
        cap: Capabilities,
        label: &'static str,
    ) -> Result<&mut DeviceEntry> {
        let entry = self.devices.get_mut(id).ok_or(Error::UnknownDevice)?;
        if !entry.device.capabilities().contains(cap) {
            return Err(Error::Unsupported {
                device: entry.name.clone(),
                capability: label,
            });
        }
        Ok(entry)
    }
}
