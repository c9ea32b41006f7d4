//! Diagnostic text path from device backends to the log UART.
//!
//! There is a single sink per emulator. Backends receive a clone of it via
//! `attach_log` and push text; the serial bridge drains the queue into the
//! designated log UART during the host loop. Text pushed before any UART is
//! open stays queued until it can be written.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::mpsc;

use crate::tracing::prelude::*;

/// Backend log verbosity, most severe first.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None = 0,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Verbose,
}

/// Create a connected sink/drain pair.
pub fn channel() -> (LogSink, LogDrain) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LogSink { tx }, LogDrain { rx })
}

/// Producer side, cloned into each backend.
#[derive(Debug, Clone)]
pub struct LogSink {
    tx: mpsc::UnboundedSender<String>,
}

impl LogSink {
    /// Queue one line of text.
    pub fn log(&self, text: impl Into<String>) {
        if self.tx.send(text.into()).is_err() {
            trace!("Log drain gone, dropping backend text.");
        }
    }
}

/// Consumer side, owned by the serial bridge.
#[derive(Debug)]
pub struct LogDrain {
    rx: mpsc::UnboundedReceiver<String>,
}

impl LogDrain {
    /// Take every queued line without waiting.
    pub fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.rx.try_recv() {
            lines.push(line);
        }
        lines
    }
}

/// Per-backend view of the sink: a prefix and a verbosity threshold.
#[derive(Debug, Clone)]
pub struct DeviceLog {
    sink: LogSink,
    prefix: String,
    level: LogLevel,
}

impl DeviceLog {
    pub fn new(sink: LogSink, prefix: &str, level: LogLevel) -> Self {
        Self {
            sink,
            prefix: prefix.to_string(),
            level,
        }
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::None && level <= self.level
    }

    /// Emit `message` if `level` passes the threshold.
    pub fn emit(&self, level: LogLevel, message: &str) {
        if self.enabled(level) {
            self.sink.log(format!("{}{}", self.prefix, message));
        }
    }
}
