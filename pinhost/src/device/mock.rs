//! Recording test double for device backends.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{Capabilities, Device, DeviceError};
use crate::gpio::PinLine;
use crate::log_sink::{LogLevel, LogSink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Configure(u32, Vec<u8>),
    Connect(u8),
    Update,
    PinChange(u8, u32),
    Spi(Vec<u8>, usize),
    I2c(Vec<u8>, usize),
    AttachLog(String, LogLevel),
    Destroy,
}

/// Calls from every mock sharing the journal, in global order.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<(String, Call)>>>);

impl Journal {
    pub fn all(&self) -> Vec<(String, Call)> {
        self.0.lock().clone()
    }

    pub fn calls_of(&self, name: &str) -> Vec<Call> {
        self.0
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, c)| c.clone())
            .collect()
    }

    fn record(&self, name: &str, call: Call) {
        self.0.lock().push((name.to_string(), call));
    }
}

enum Reaction {
    None,
    Echo { from: u8, to: u8 },
    Invert { pin: u8 },
}

pub struct MockDevice {
    name: String,
    journal: Journal,
    caps: Arc<Mutex<Capabilities>>,
    lines: Vec<(u8, PinLine)>,
    reaction: Reaction,
    reject_connect: bool,
    fill: Option<u8>,
    sink: Option<LogSink>,
}

impl MockDevice {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            journal: journal.clone(),
            caps: Arc::new(Mutex::new(Capabilities::all())),
            lines: Vec::new(),
            reaction: Reaction::None,
            reject_connect: false,
            fill: None,
            sink: None,
        }
    }

    pub fn with_capabilities(self, caps: Capabilities) -> Self {
        *self.caps.lock() = caps;
        self
    }

    /// Handle for changing capabilities after the mock is installed.
    pub fn capability_switch(&self) -> Arc<Mutex<Capabilities>> {
        Arc::clone(&self.caps)
    }

    pub fn rejecting_connect(mut self) -> Self {
        self.reject_connect = true;
        self
    }

    /// Copy changes on device pin `from` to the line of device pin `to`.
    pub fn echoing(mut self, from: u8, to: u8) -> Self {
        self.reaction = Reaction::Echo { from, to };
        self
    }

    /// Drive the inverse of every change on `pin` back onto it.
    pub fn inverting(mut self, pin: u8) -> Self {
        self.reaction = Reaction::Invert { pin };
        self
    }

    /// Overwrite transfer buffers with `byte`.
    pub fn filling(mut self, byte: u8) -> Self {
        self.fill = Some(byte);
        self
    }

    fn line(&self, pin: u8) -> Option<&PinLine> {
        self.lines.iter().find(|(p, _)| *p == pin).map(|(_, l)| l)
    }
}

impl Device for MockDevice {
    fn capabilities(&self) -> Capabilities {
        *self.caps.lock()
    }

    fn configure(&mut self, property: u32, data: &[u8]) -> Result<(), DeviceError> {
        self.journal.record(&self.name, Call::Configure(property, data.to_vec()));
        if property == 0 {
            Ok(())
        } else {
            Err(DeviceError::InvalidProperty(property))
        }
    }

    fn connect(&mut self, pin: u8, line: PinLine) -> Result<(), DeviceError> {
        self.journal.record(&self.name, Call::Connect(pin));
        if self.reject_connect {
            return Err(DeviceError::InvalidPin(pin));
        }
        self.lines.push((pin, line));
        Ok(())
    }

    fn update(&mut self) -> Result<(), DeviceError> {
        self.journal.record(&self.name, Call::Update);
        if let Some(sink) = &self.sink {
            sink.log(format!("{} tick", self.name));
        }
        Ok(())
    }

    fn pin_change(&mut self, pin: u8, value: u32) -> Result<(), DeviceError> {
        self.journal.record(&self.name, Call::PinChange(pin, value));
        match self.reaction {
            Reaction::Echo { from, to } if from == pin => {
                if let Some(line) = self.line(to) {
                    line.set(value);
                }
            }
            Reaction::Invert { pin: p } if p == pin => {
                if let Some(line) = self.line(pin) {
                    line.set(u32::from(value == 0));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn transfer_bits_spi(&mut self, data: &mut [u8], size_bits: usize) -> Result<(), DeviceError> {
        self.journal.record(&self.name, Call::Spi(data.to_vec(), size_bits));
        if let Some(byte) = self.fill {
            data.fill(byte);
        }
        Ok(())
    }

    fn transfer_bytes_i2c(
        &mut self,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<Option<usize>, DeviceError> {
        self.journal.record(&self.name, Call::I2c(input.to_vec(), output.len()));
        match self.fill {
            Some(byte) => {
                output.fill(byte);
                Ok(Some(output.len()))
            }
            None => Ok(Some(0)),
        }
    }

    fn attach_log(
        &mut self,
        sink: LogSink,
        prefix: &str,
        level: LogLevel,
    ) -> Result<(), DeviceError> {
        self.journal.record(&self.name, Call::AttachLog(prefix.to_string(), level));
        self.sink = Some(sink);
        Ok(())
    }

    fn destroy(&mut self) {
        self.journal.record(&self.name, Call::Destroy);
    }
}
