//! GPIO pin engine.
//!
//! Models the MCU's 256-entry pin table: per-pin mode, value, interrupt
//! configuration and the list of device connections. A value change runs
//! through one state machine no matter who caused it (application write,
//! device drive, host injection):
//!
//! 1. Store the value if it differs. Edge modes stop here when it does not;
//!    `Low` mode keeps going and re-fires on every low write, mirroring a
//!    level-sensitive interrupt line.
//! 2. Run the interrupt handler if the mode's condition holds.
//! 3. If the value changed, publish a [`PinEvent`] and forward the value to
//!    every connected device advertising `PIN_CHANGE`.
//!
//! Devices and interrupt handlers never mutate the engine directly. Their
//! pin drives go into the [`PinBank`] queue and are applied after the
//! current dispatch returns, until the queue is empty (run-to-completion).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::broadcast;

use crate::clock::{CallContext, Clock};
use crate::device::{DeviceId, DeviceRegistry};
use crate::error::Result;
use crate::tracing::prelude::*;

/// Size of the pin address space.
pub const PIN_COUNT: usize = 256;

const EVENT_CAPACITY: usize = 256;

/// Functional mode of a pin.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum PinMode {
    #[default]
    Unset,
    Input,
    InputPullUp,
    InputPullDown,
    Output,
    OutputOpenDrain,
}

impl PinMode {
    pub fn is_input(self) -> bool {
        matches!(
            self,
            PinMode::Input | PinMode::InputPullUp | PinMode::InputPullDown
        )
    }

    pub fn is_output(self) -> bool {
        matches!(self, PinMode::Output | PinMode::OutputOpenDrain)
    }
}

/// Condition under which a pin's interrupt handler runs.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum InterruptMode {
    #[default]
    None,
    /// Every write of a low value, transition or not.
    Low,
    Falling,
    Rising,
    /// Any change of value.
    Change,
}

/// Digital level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        if value {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl From<Level> for u32 {
    fn from(level: Level) -> Self {
        match level {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

/// Pin values shared with device backends, plus the queue of pending
/// drives.
#[derive(Debug)]
pub struct PinBank {
    values: Vec<AtomicU32>,
    pending: Mutex<VecDeque<(u8, u32)>>,
}

impl PinBank {
    fn new() -> Self {
        Self {
            values: (0..PIN_COUNT).map(|_| AtomicU32::new(0)).collect(),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn value(&self, pin: u8) -> u32 {
        self.values[pin as usize].load(Ordering::Acquire)
    }

    fn store(&self, pin: u8, value: u32) {
        self.values[pin as usize].store(value, Ordering::Release);
    }

    /// Queue a drive of `pin` to `value`.
    pub fn drive(&self, pin: u8, value: u32) {
        self.pending.lock().push_back((pin, value));
    }

    fn pop_pending(&self) -> Option<(u8, u32)> {
        self.pending.lock().pop_front()
    }

    fn discard_pending(&self) -> usize {
        let mut pending = self.pending.lock();
        let count = pending.len();
        pending.clear();
        count
    }
}

/// A device's accessor for one MCU pin.
#[derive(Debug, Clone)]
pub struct PinLine {
    pin: u8,
    bank: Arc<PinBank>,
}

impl PinLine {
    /// MCU pin this line is bound to.
    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn get(&self) -> u32 {
        self.bank.value(self.pin)
    }

    /// Drive the MCU pin. Applied once the engine regains control.
    pub fn set(&self, value: u32) {
        self.bank.drive(self.pin, value);
    }
}

/// What an interrupt handler can see and do while it runs.
pub struct InterruptContext<'a> {
    pin: u8,
    bank: &'a PinBank,
    clock: &'a Clock,
}

impl<'a> InterruptContext<'a> {
    /// Pin whose interrupt is being serviced.
    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn read(&self, pin: u8) -> u32 {
        self.bank.value(pin)
    }

    /// Drive a pin; applied after the handler returns.
    pub fn drive(&self, pin: u8, value: u32) {
        self.bank.drive(pin, value);
    }

    /// Timing primitives, which refuse to block here.
    pub fn timing(&self) -> CallContext<'a> {
        CallContext::interrupt(self.clock)
    }
}

/// Interrupt service routine.
pub type InterruptHandler = Box<dyn FnMut(&mut InterruptContext<'_>) + Send>;

/// Binding of an MCU pin to a device-side pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub device: DeviceId,
    pub device_pin: u8,
}

/// Published on every mode or value change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinEvent {
    pub pin: u8,
    pub mode: PinMode,
    pub value: u32,
}

#[derive(Default)]
struct GpioPin {
    mode: PinMode,
    interrupt_mode: InterruptMode,
    handler: Option<InterruptHandler>,
    connections: Vec<Connection>,
}

/// The pin table and its state machine.
pub struct Gpio {
    pins: Vec<GpioPin>,
    bank: Arc<PinBank>,
    clock: Clock,
    events: broadcast::Sender<PinEvent>,
    settle_limit: usize,
}

impl Gpio {
    pub fn new(clock: Clock, settle_limit: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            pins: (0..PIN_COUNT).map(|_| GpioPin::default()).collect(),
            bank: Arc::new(PinBank::new()),
            clock,
            events,
            settle_limit,
        }
    }

    /// Receive a [`PinEvent`] for every subsequent mode or value change.
    pub fn subscribe(&self) -> broadcast::Receiver<PinEvent> {
        self.events.subscribe()
    }

    pub fn mode(&self, pin: u8) -> PinMode {
        self.pins[pin as usize].mode
    }

    pub fn interrupt_mode(&self, pin: u8) -> InterruptMode {
        self.pins[pin as usize].interrupt_mode
    }

    /// Raw stored value, regardless of mode.
    pub fn value(&self, pin: u8) -> u32 {
        self.bank.value(pin)
    }

    pub fn connections(&self, pin: u8) -> &[Connection] {
        &self.pins[pin as usize].connections
    }

    /// Snapshot of every pin with a mode set, in pin order.
    pub fn configured_pins(&self) -> Vec<PinEvent> {
        self.pins
            .iter()
            .enumerate()
            .filter(|(_, p)| p.mode != PinMode::Unset)
            .map(|(i, p)| PinEvent {
                pin: i as u8,
                mode: p.mode,
                value: self.bank.value(i as u8),
            })
            .collect()
    }

    pub fn set_mode(&mut self, pin: u8, mode: PinMode) {
        self.pins[pin as usize].mode = mode;
        trace!(pin, %mode, "Pin mode set");
        self.publish(pin);
    }

    /// Write a raw value. Ignored unless the pin is an output.
    pub fn write(&mut self, pin: u8, value: u32, devices: &mut DeviceRegistry) {
        let mode = self.mode(pin);
        if !mode.is_output() {
            trace!(pin, %mode, value, "Ignoring write to non-output pin");
            return;
        }
        self.set_value(pin, value, devices);
    }

    /// Read the raw value of an input or output pin; 0 for anything else.
    pub fn read(&self, pin: u8) -> u32 {
        let mode = self.mode(pin);
        if mode.is_input() || mode.is_output() {
            self.bank.value(pin)
        } else {
            0
        }
    }

    pub fn digital_write(&mut self, pin: u8, level: Level, devices: &mut DeviceRegistry) {
        self.write(pin, level.into(), devices);
    }

    pub fn digital_read(&self, pin: u8) -> Level {
        Level::from(self.read(pin) != 0)
    }

    /// PWM-style write, clamped to 0..=255. Ignored unless the pin is an
    /// output.
    pub fn analog_write(&mut self, pin: u8, value: i32, devices: &mut DeviceRegistry) {
        self.write(pin, value.clamp(0, 255) as u32, devices);
    }

    /// Raw value of an input pin; 0 for anything else.
    pub fn analog_read(&self, pin: u8) -> u32 {
        if self.mode(pin).is_input() {
            self.bank.value(pin)
        } else {
            0
        }
    }

    /// Apply an external signal to a pin regardless of its mode.
    pub fn drive(&mut self, pin: u8, value: u32, devices: &mut DeviceRegistry) {
        self.set_value(pin, value, devices);
    }

    /// Bind `pin` to `device_pin` on `device`.
    ///
    /// The device receives a [`PinLine`] for the MCU pin and, from now on,
    /// a `pin_change` call for every value change.
    pub fn connect(
        &mut self,
        pin: u8,
        device: DeviceId,
        device_pin: u8,
        devices: &mut DeviceRegistry,
    ) -> Result<()> {
        let line = PinLine {
            pin,
            bank: Arc::clone(&self.bank),
        };
        devices.connect(device, device_pin, line)?;
        self.pins[pin as usize].connections.push(Connection { device, device_pin });
        debug!(pin, device_pin, "Pin connected");
        self.settle(devices);
        Ok(())
    }

    /// Install `handler` for `mode`, switching the pin to `Input` unless it
    /// already is an input.
    pub fn attach_interrupt(&mut self, pin: u8, handler: InterruptHandler, mode: InterruptMode) {
        if !self.mode(pin).is_input() {
            self.set_mode(pin, PinMode::Input);
        }
        let p = &mut self.pins[pin as usize];
        p.interrupt_mode = mode;
        p.handler = Some(handler);
        debug!(pin, %mode, "Interrupt attached");
    }

    /// Remove the handler. Also resets the pin's mode to `Unset`.
    pub fn detach_interrupt(&mut self, pin: u8) {
        let p = &mut self.pins[pin as usize];
        p.mode = PinMode::Unset;
        p.interrupt_mode = InterruptMode::None;
        p.handler = None;
        debug!(pin, "Interrupt detached");
        self.publish(pin);
    }

    /// Apply queued drives until none remain or the settle limit is hit.
    pub fn settle(&mut self, devices: &mut DeviceRegistry) {
        let mut steps = 0;
        while let Some((pin, value)) = self.bank.pop_pending() {
            if steps == self.settle_limit {
                let dropped = self.bank.discard_pending() + 1;
                warn!(
                    limit = self.settle_limit,
                    dropped, "Pin drives did not settle, discarding the rest"
                );
                return;
            }
            steps += 1;
            self.apply_value(pin, value, devices);
        }
    }

    fn set_value(&mut self, pin: u8, value: u32, devices: &mut DeviceRegistry) {
        self.apply_value(pin, value, devices);
        self.settle(devices);
    }

    fn apply_value(&mut self, pin: u8, value: u32, devices: &mut DeviceRegistry) {
        let old = self.bank.value(pin);
        let changed = old != value;
        let interrupt_mode = self.pins[pin as usize].interrupt_mode;
        if !changed && interrupt_mode != InterruptMode::Low {
            return;
        }
        if changed {
            self.bank.store(pin, value);
        }

        let fire = match interrupt_mode {
            InterruptMode::None => false,
            InterruptMode::Low => value == 0,
            InterruptMode::Falling => old != 0 && value == 0,
            InterruptMode::Rising => old == 0 && value != 0,
            InterruptMode::Change => changed,
        };
        if fire {
            self.dispatch_interrupt(pin);
        }

        if changed {
            self.publish(pin);
            for conn in &self.pins[pin as usize].connections {
                devices.pin_change(conn.device, conn.device_pin, value);
            }
        }
    }

    fn dispatch_interrupt(&mut self, pin: u8) {
        let bank = &self.bank;
        let clock = &self.clock;
        if let Some(handler) = self.pins[pin as usize].handler.as_mut() {
            trace!(pin, "Servicing interrupt");
            let mut ctx = InterruptContext { pin, bank, clock };
            handler(&mut ctx);
        }
    }

    fn publish(&self, pin: u8) {
        // No subscribers is fine.
        let _ = self.events.send(PinEvent {
            pin,
            mode: self.mode(pin),
            value: self.bank.value(pin),
        });
    }
}
