//! Serial bridge between emulated UARTs and host byte streams.
//!
//! Each UART moves through three states:
//!
//! ```text
//! Unattached --attach--> Closed --begin--> Open
//!                          ^                 |
//!                          +------end--------+
//! ```
//!
//! An open UART owns one tokio worker that reads the host stream in chunks
//! and appends to a shared [`RxBuffer`]. Application reads take the buffer
//! lock for a single operation and never wait for data. Closing cancels
//! the worker's token and awaits it.

pub mod buffer;
pub mod format;
pub mod host;

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use buffer::RxBuffer;
pub use format::SerialFormat;
pub use host::{HostPorts, HostStream, LoopbackHost, TokioSerialHost};

use crate::config::SerialConfig;
use crate::error::{Error, Result};
use crate::log_sink::LogDrain;
use crate::tracing::{prelude::*, CONSOLE_TARGET};

/// Number of UARTs.
pub const UART_COUNT: usize = 3;

/// Baud rate used when `begin` is called with 0.
pub const DEFAULT_BAUD: u32 = 9600;

/// Called from [`SerialBridge::dispatch_receive_events`] while the UART has
/// buffered bytes.
pub type ReceiveCallback = Box<dyn FnMut(&SerialReader) + Send>;

/// Read access to one UART's receive buffer, handed to receive callbacks.
pub struct SerialReader {
    uart: usize,
    rx: Arc<Mutex<RxBuffer>>,
}

impl SerialReader {
    pub fn uart(&self) -> usize {
        self.uart
    }

    pub fn available(&self) -> usize {
        self.rx.lock().len()
    }

    pub fn read(&self) -> Option<u8> {
        self.rx.lock().pop()
    }

    pub fn read_into(&self, buf: &mut [u8]) -> usize {
        self.rx.lock().read_into(buf)
    }
}

struct OpenPort {
    baud: u32,
    format: SerialFormat,
    writer: WriteHalf<HostStream>,
    rx: Arc<Mutex<RxBuffer>>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

#[derive(Default)]
struct Uart {
    host_port: Option<u16>,
    open: Option<OpenPort>,
    on_receive: Option<ReceiveCallback>,
    rx_pin: Option<u8>,
    tx_pin: Option<u8>,
}

/// The UART table and its host side.
pub struct SerialBridge {
    uarts: Vec<Uart>,
    host: Box<dyn HostPorts>,
    chunk_size: usize,
    rx_capacity: usize,
    log_uart: usize,
    logs: LogDrain,
    pending_logs: VecDeque<String>,
}

impl SerialBridge {
    /// Create a bridge whose UARTs open streams through `host`. Backend
    /// diagnostics from `logs` go to the configured log UART.
    pub fn new(host: Box<dyn HostPorts>, config: &SerialConfig, logs: LogDrain) -> Self {
        Self {
            uarts: (0..UART_COUNT).map(|_| Uart::default()).collect(),
            host,
            chunk_size: config.chunk_size.max(1),
            rx_capacity: config.rx_capacity,
            log_uart: config.log_uart,
            logs,
            pending_logs: VecDeque::new(),
        }
    }

    /// Bridge over native serial devices, or loopback when configured.
    pub fn from_config(config: &SerialConfig, logs: LogDrain) -> Self {
        let host: Box<dyn HostPorts> = if config.loopback {
            Box::new(LoopbackHost::new())
        } else {
            Box::new(TokioSerialHost::new(config.path_template.clone()))
        };
        Self::new(host, config, logs)
    }

    pub fn log_uart(&self) -> usize {
        self.log_uart
    }

    /// Map `uart` to host port `host_port`.
    pub fn attach(&mut self, uart: usize, host_port: u16) -> Result<()> {
        if host_port == 0 {
            return Err(Error::Uart {
                uart,
                reason: "host port 0 is not a port",
            });
        }
        let slot = self.uart_mut(uart)?;
        if slot.host_port.is_some() {
            return Err(Error::Uart {
                uart,
                reason: "already attached",
            });
        }
        slot.host_port = Some(host_port);
        debug!(uart, host_port, "UART attached");
        Ok(())
    }

    /// Host port `uart` is attached to.
    pub fn attached(&self, uart: usize) -> Option<u16> {
        self.uarts.get(uart).and_then(|u| u.host_port)
    }

    pub fn is_open(&self, uart: usize) -> bool {
        self.uarts.get(uart).is_some_and(|u| u.open.is_some())
    }

    /// Open `uart`: open the host stream, allocate the receive buffer and
    /// start the reader worker. A baud rate of 0 means 9600. Beginning an
    /// open UART changes nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn begin(
        &mut self,
        uart: usize,
        baud: u32,
        config: u32,
        rx_pin: Option<u8>,
        tx_pin: Option<u8>,
    ) -> Result<()> {
        let baud = if baud == 0 { DEFAULT_BAUD } else { baud };
        let chunk_size = self.chunk_size;
        let rx_capacity = self.rx_capacity;
        let slot = self.uarts.get(uart).ok_or(Error::UartIndex(uart))?;
        if slot.open.is_some() {
            trace!(uart, "UART already open");
            return Ok(());
        }
        let host_port = slot.host_port.ok_or(Error::Uart {
            uart,
            reason: "not attached to a host port",
        })?;
        let format = SerialFormat::from_config(config).ok_or(Error::Uart {
            uart,
            reason: "unsupported serial format",
        })?;
        let runtime = Handle::try_current().map_err(|_| Error::Uart {
            uart,
            reason: "no async runtime",
        })?;

        let stream = self.host.open(host_port, baud, format)?;
        let (reader, writer) = tokio::io::split(stream);
        let rx = Arc::new(Mutex::new(RxBuffer::with_capacity(rx_capacity)));
        let cancel = CancellationToken::new();
        let worker = runtime.spawn(receive(
            uart,
            reader,
            Arc::clone(&rx),
            cancel.clone(),
            chunk_size,
        ));

        let slot = self.uart_mut(uart)?;
        slot.open = Some(OpenPort {
            baud,
            format,
            writer,
            rx,
            cancel,
            worker,
        });
        slot.rx_pin = rx_pin;
        slot.tx_pin = tx_pin;
        info!(uart, host_port, baud, ?format, "UART opened");
        Ok(())
    }

    /// Close `uart`. With `full`, the receive callback and pin assignments
    /// are cleared as well.
    pub async fn end(&mut self, uart: usize, full: bool) -> Result<()> {
        let slot = self.uart_mut(uart)?;
        if full {
            slot.on_receive = None;
            slot.rx_pin = None;
            slot.tx_pin = None;
        }
        let Some(mut port) = slot.open.take() else {
            return Ok(());
        };
        port.cancel.cancel();
        if let Err(e) = port.worker.await {
            warn!(uart, error = %e, "UART worker ended abnormally");
        }
        if let Err(e) = port.writer.shutdown().await {
            trace!(uart, error = %e, "Host stream shutdown failed");
        }
        debug!(uart, "UART closed");
        Ok(())
    }

    /// Buffered byte count; 0 while closed.
    pub fn available(&self, uart: usize) -> Result<usize> {
        Ok(self.rx(uart)?.map_or(0, |rx| rx.lock().len()))
    }

    pub fn peek(&self, uart: usize) -> Result<Option<u8>> {
        Ok(self.rx(uart)?.and_then(|rx| rx.lock().peek()))
    }

    pub fn read(&self, uart: usize) -> Result<Option<u8>> {
        Ok(self.rx(uart)?.and_then(|rx| rx.lock().pop()))
    }

    /// Move buffered bytes into `buf`; returns how many.
    pub fn read_into(&self, uart: usize, buf: &mut [u8]) -> Result<usize> {
        Ok(self.rx(uart)?.map_or(0, |rx| rx.lock().read_into(buf)))
    }

    /// Write to the host stream. Returns the byte count, which is the
    /// requested length when the UART is not open. Text written to the log
    /// UART is mirrored to the console log.
    pub async fn write(&mut self, uart: usize, bytes: &[u8]) -> Result<usize> {
        let log_uart = self.log_uart;
        let slot = self.uart_mut(uart)?;
        if uart == log_uart {
            let text = String::from_utf8_lossy(bytes);
            info!(target: CONSOLE_TARGET, "{}", text.trim_end_matches(['\r', '\n']));
        }
        if let Some(port) = slot.open.as_mut() {
            port.writer.write_all(bytes).await?;
            port.writer.flush().await?;
        }
        Ok(bytes.len())
    }

    pub fn baud_rate(&self, uart: usize) -> Result<u32> {
        self.port(uart)?.map(|p| p.baud).ok_or(Error::Uart {
            uart,
            reason: "not open",
        })
    }

    pub fn format(&self, uart: usize) -> Result<SerialFormat> {
        self.port(uart)?.map(|p| p.format).ok_or(Error::Uart {
            uart,
            reason: "not open",
        })
    }

    /// RX and TX pins given to the last `begin`.
    pub fn pins(&self, uart: usize) -> Result<(Option<u8>, Option<u8>)> {
        let slot = self.uarts.get(uart).ok_or(Error::UartIndex(uart))?;
        Ok((slot.rx_pin, slot.tx_pin))
    }

    /// Register the receive callback of `uart`, replacing any previous one.
    pub fn on_receive(&mut self, uart: usize, callback: ReceiveCallback) -> Result<()> {
        self.uart_mut(uart)?.on_receive = Some(callback);
        Ok(())
    }

    /// Run the receive callback of every open UART that has buffered bytes.
    /// Returns how many callbacks ran.
    pub fn dispatch_receive_events(&mut self) -> usize {
        let mut dispatched = 0;
        for (uart, slot) in self.uarts.iter_mut().enumerate() {
            let (Some(port), Some(callback)) = (&slot.open, slot.on_receive.as_mut()) else {
                continue;
            };
            if port.rx.lock().is_empty() {
                continue;
            }
            let reader = SerialReader {
                uart,
                rx: Arc::clone(&port.rx),
            };
            callback(&reader);
            dispatched += 1;
        }
        dispatched
    }

    /// Write queued backend diagnostics to the log UART, one line each with
    /// CRLF. Lines stay queued while the log UART is not open. Returns the
    /// number of lines written.
    pub async fn forward_logs(&mut self) -> Result<usize> {
        self.pending_logs.extend(self.logs.drain());
        if self.pending_logs.is_empty() || !self.is_open(self.log_uart) {
            return Ok(0);
        }
        let uart = self.log_uart;
        let mut written = 0;
        while let Some(line) = self.pending_logs.pop_front() {
            let mut bytes = line.into_bytes();
            bytes.extend_from_slice(b"\r\n");
            self.write(uart, &bytes).await?;
            written += 1;
        }
        Ok(written)
    }

    /// Close every open UART.
    pub async fn shutdown(&mut self) {
        for uart in 0..UART_COUNT {
            if let Err(e) = self.end(uart, true).await {
                warn!(uart, error = %e, "Failed to close UART");
            }
        }
    }

    fn uart_mut(&mut self, uart: usize) -> Result<&mut Uart> {
        self.uarts.get_mut(uart).ok_or(Error::UartIndex(uart))
    }

    fn port(&self, uart: usize) -> Result<Option<&OpenPort>> {
        let slot = self.uarts.get(uart).ok_or(Error::UartIndex(uart))?;
        Ok(slot.open.as_ref())
    }

    fn rx(&self, uart: usize) -> Result<Option<&Arc<Mutex<RxBuffer>>>> {
        Ok(self.port(uart)?.map(|p| &p.rx))
    }
}

impl Drop for SerialBridge {
    fn drop(&mut self) {
        for port in self.uarts.iter().filter_map(|u| u.open.as_ref()) {
            port.cancel.cancel();
        }
    }
}

/// Reader worker of one open UART.
async fn receive(
    uart: usize,
    mut reader: ReadHalf<HostStream>,
    rx: Arc<Mutex<RxBuffer>>,
    cancel: CancellationToken,
    chunk_size: usize,
) {
    trace!(uart, "Receive task started.");
    let mut chunk = vec![0u8; chunk_size];
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            result = reader.read(&mut chunk) => match result {
                Ok(0) => {
                    debug!(uart, "Host stream reached EOF");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!(uart, error = %e, "Host stream read failed");
                    break;
                }
            },
        };
        rx.lock().extend(&chunk[..n]);
    }
    trace!(uart, "Receive task stopped.");
}
