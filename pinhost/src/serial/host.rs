//! Host side of the serial bridge.
//!
//! A UART attached to host port `n` is backed by whatever byte stream a
//! [`HostPorts`] implementation opens for `n`: a native serial device, or
//! an in-memory loopback.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tokio_serial::SerialPortBuilderExt;

use super::format::SerialFormat;
use crate::error::Result;
use crate::tracing::prelude::*;

/// Byte stream backing an open UART.
pub trait SerialIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> SerialIo for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type HostStream = Box<dyn SerialIo>;

/// Opens host streams by port number.
pub trait HostPorts: Send + Sync {
    /// Open host port `port` with the given line settings. Must be called
    /// from within a tokio runtime.
    fn open(&self, port: u16, baud: u32, format: SerialFormat) -> Result<HostStream>;
}

/// Native serial devices, located by substituting the port number into a
/// path template such as `/dev/ttyUSB{n}`.
#[derive(Debug, Clone)]
pub struct TokioSerialHost {
    template: String,
}

impl TokioSerialHost {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn path(&self, port: u16) -> String {
        self.template.replace("{n}", &port.to_string())
    }
}

impl HostPorts for TokioSerialHost {
    fn open(&self, port: u16, baud: u32, format: SerialFormat) -> Result<HostStream> {
        let path = self.path(port);
        debug!(path = %path, baud, ?format, "Opening serial device");
        let stream = tokio_serial::new(&path, baud)
            .data_bits(format.data_bits)
            .parity(format.parity)
            .stop_bits(format.stop_bits)
            .open_native_async()?;
        Ok(Box::new(stream))
    }
}

/// Every port is an in-memory pipe whose far end echoes writes back.
#[derive(Debug, Clone)]
pub struct LoopbackHost {
    capacity: usize,
}

impl LoopbackHost {
    pub fn new() -> Self {
        Self { capacity: 4096 }
    }
}

impl Default for LoopbackHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostPorts for LoopbackHost {
    fn open(&self, port: u16, baud: u32, _format: SerialFormat) -> Result<HostStream> {
        let runtime = Handle::try_current().map_err(io::Error::other)?;
        let (near, far) = tokio::io::duplex(self.capacity);
        runtime.spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(far);
            match tokio::io::copy(&mut reader, &mut writer).await {
                Ok(n) => trace!(port, bytes = n, "Loopback closed"),
                Err(e) => trace!(port, error = %e, "Loopback failed"),
            }
        });
        debug!(port, baud, "Opened loopback port");
        Ok(Box::new(near))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_path_template() {
        let host = TokioSerialHost::new("/dev/ttyS{n}");
        assert_eq!(host.path(3), "/dev/ttyS3");
    }

    #[tokio::test]
    async fn test_loopback_echoes() {
        let mut stream = LoopbackHost::new()
            .open(1, 9600, SerialFormat::default())
            .unwrap();
        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }
}
