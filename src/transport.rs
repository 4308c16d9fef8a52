//! # Modbus Transport Layer
//!
//! A [`Transporter`] moves one encoded application data unit (ADU) to the
//! device and returns the raw response ADU. It knows nothing about slave ids or
//! function codes; framing is the job of [`crate::packager`].
//!
//! Transporters are shared by every client the gateway builds, so `send` takes
//! `&self` and each implementation serializes access to its physical link
//! internally.
//!
//! ## Supported Transports
//!
//! ### Modbus TCP (`TcpTransporter`)
//! - Lazy connection, dropped on I/O failure and re-established on next send
//! - Reads the MBAP header first, then the declared remaining length
//!
//! ### Serial (`SerialTransporter`)
//! - RS-232 / RS-485 via `tokio-serial`
//! - RTU frames end at a 3.5 character silent interval
//! - ASCII frames end at CR LF
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use voltage_modbus_rpc::transport::{TcpTransporter, Transporter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transporter = TcpTransporter::new("127.0.0.1:502", Duration::from_secs(5));
//!
//!     let request = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02];
//!     let response = transporter.send(&request).await?;
//!     println!("Response: {:02X?}", response);
//!
//!     let stats = transporter.stats().await;
//!     println!("Requests sent: {}", stats.requests_sent);
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_serial::SerialPort as _;

use crate::error::{ModbusError, ModbusResult};
use crate::logging::log_packet;
use crate::packager::{Framing, MAX_ASCII_FRAME_SIZE, MAX_RTU_FRAME_SIZE, MAX_TCP_FRAME_SIZE, MBAP_HEADER_SIZE};

/// Byte-oriented request/response exchange with a Modbus device
///
/// Implementations must be safe to share between concurrently built clients.
#[async_trait]
pub trait Transporter: Send + Sync {
    /// Send a request ADU and wait for the complete response ADU
    ///
    /// # Errors
    ///
    /// - `ModbusError::Timeout` - request or response timed out
    /// - `ModbusError::Connection` - link could not be (re)established
    /// - `ModbusError::Io` - link failed mid-exchange
    /// - `ModbusError::Frame` - response could not be delimited
    async fn send(&self, adu: &[u8]) -> ModbusResult<Vec<u8>>;
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl TransportStats {
    fn record_request(&mut self, adu: &[u8]) {
        self.requests_sent += 1;
        self.bytes_sent += adu.len() as u64;
    }

    fn record_outcome(&mut self, outcome: &ModbusResult<Vec<u8>>) {
        match outcome {
            Ok(response) => {
                self.responses_received += 1;
                self.bytes_received += response.len() as u64;
            }
            Err(error) => {
                self.errors += 1;
                if matches!(error, ModbusError::Timeout { .. }) {
                    self.timeouts += 1;
                }
            }
        }
    }
}

fn timeout_error(operation: &str, duration: Duration) -> ModbusError {
    ModbusError::timeout(operation, duration.as_millis() as u64)
}

/// Whether a failed exchange may leave unread response bytes on the link
///
/// A late reply to a timed-out request would otherwise be taken as the answer
/// to the next one.
fn leaves_link_dirty(error: &ModbusError) -> bool {
    matches!(
        error,
        ModbusError::Io { .. } | ModbusError::Timeout { .. } | ModbusError::Frame { .. }
    )
}

struct TcpState {
    stream: Option<TcpStream>,
    stats: TransportStats,
}

/// Modbus TCP transporter
pub struct TcpTransporter {
    address: String,
    timeout: Duration,
    packet_logging: bool,
    state: Mutex<TcpState>,
}

impl TcpTransporter {
    /// Create a new TCP transporter; the connection is opened on first use
    pub fn new<S: Into<String>>(address: S, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            packet_logging: false,
            state: Mutex::new(TcpState {
                stream: None,
                stats: TransportStats::default(),
            }),
        }
    }

    /// Enable or disable packet logging
    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    /// Check if a connection is currently held
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.stream.is_some()
    }

    /// Get communication statistics
    pub async fn stats(&self) -> TransportStats {
        self.state.lock().await.stats.clone()
    }

    async fn open_stream(&self) -> ModbusResult<TcpStream> {
        match timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ModbusError::connection(format!(
                "Failed to connect to {}: {}",
                self.address, e
            ))),
            Err(_) => Err(timeout_error("connect", self.timeout)),
        }
    }

    async fn exchange(stream: &mut TcpStream, adu: &[u8], limit: Duration) -> ModbusResult<Vec<u8>> {
        timeout(limit, stream.write_all(adu))
            .await
            .map_err(|_| timeout_error("send request", limit))??;

        // MBAP header + unit id
        let mut header = [0u8; MBAP_HEADER_SIZE + 1];
        timeout(limit, stream.read_exact(&mut header))
            .await
            .map_err(|_| timeout_error("read response header", limit))??;

        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if length == 0 || MBAP_HEADER_SIZE + length > MAX_TCP_FRAME_SIZE {
            return Err(ModbusError::frame(format!(
                "length in response header '{}' must not be zero or greater than '{}'",
                length,
                MAX_TCP_FRAME_SIZE - MBAP_HEADER_SIZE
            )));
        }

        let mut response = vec![0u8; MBAP_HEADER_SIZE + length];
        response[..header.len()].copy_from_slice(&header);
        if length > 1 {
            timeout(limit, stream.read_exact(&mut response[header.len()..]))
                .await
                .map_err(|_| timeout_error("read response data", limit))??;
        }

        Ok(response)
    }
}

#[async_trait]
impl Transporter for TcpTransporter {
    async fn send(&self, adu: &[u8]) -> ModbusResult<Vec<u8>> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if state.stream.is_none() {
            match self.open_stream().await {
                Ok(stream) => state.stream = Some(stream),
                Err(e) => {
                    state.stats.errors += 1;
                    return Err(e);
                }
            }
        }

        state.stats.record_request(adu);
        if self.packet_logging {
            log_packet("send", adu, Framing::Tcp.label());
        }

        let outcome = match state.stream.as_mut() {
            Some(stream) => Self::exchange(stream, adu, self.timeout).await,
            None => Err(ModbusError::connection("TCP stream not connected")),
        };

        state.stats.record_outcome(&outcome);
        match &outcome {
            Ok(response) if self.packet_logging => log_packet("receive", response, Framing::Tcp.label()),
            Ok(_) => {}
            // a half-read stream cannot be resynchronized
            Err(_) => state.stream = None,
        }

        outcome
    }
}

/// Serial line settings
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: tokio_serial::DataBits,
    pub stop_bits: tokio_serial::StopBits,
    pub parity: tokio_serial::Parity,
    pub timeout: Duration,
}

impl SerialSettings {
    /// RTU defaults: 8 data bits, no parity, 1 stop bit, 1 second timeout
    pub fn new<S: Into<String>>(port: S, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            data_bits: tokio_serial::DataBits::Eight,
            stop_bits: tokio_serial::StopBits::One,
            parity: tokio_serial::Parity::None,
            timeout: Duration::from_millis(1000),
        }
    }

    /// Minimum silent interval between RTU frames (3.5 character times)
    ///
    /// Fixed at 1750us above 19200 baud.
    pub fn frame_gap(&self) -> Duration {
        if self.baud_rate == 0 || self.baud_rate > 19200 {
            return Duration::from_micros(1750);
        }
        // 11 bits per character in microseconds
        let char_time_us = (11_000_000 / self.baud_rate) as u64;
        Duration::from_micros(char_time_us * 35 / 10)
    }
}

struct SerialState {
    port: Option<tokio_serial::SerialStream>,
    stats: TransportStats,
}

/// Serial transporter for RTU and ASCII framing
pub struct SerialTransporter {
    framing: Framing,
    settings: SerialSettings,
    frame_gap: Duration,
    packet_logging: bool,
    state: Mutex<SerialState>,
}

impl SerialTransporter {
    /// Create a serial transporter and open the port immediately
    pub fn new(framing: Framing, settings: SerialSettings) -> ModbusResult<Self> {
        let mut transporter = Self::unopened(framing, settings)?;
        let port = transporter.open_port()?;
        transporter.state.get_mut().port = Some(port);
        Ok(transporter)
    }

    /// Create a serial transporter that opens the port on first send
    pub fn unopened(framing: Framing, settings: SerialSettings) -> ModbusResult<Self> {
        if framing == Framing::Tcp {
            return Err(ModbusError::configuration("TCP framing requires a TCP transporter"));
        }

        Ok(Self {
            framing,
            frame_gap: settings.frame_gap(),
            settings,
            packet_logging: false,
            state: Mutex::new(SerialState {
                port: None,
                stats: TransportStats::default(),
            }),
        })
    }

    /// Enable or disable packet logging
    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    /// Get communication statistics
    pub async fn stats(&self) -> TransportStats {
        self.state.lock().await.stats.clone()
    }

    fn open_port(&self) -> ModbusResult<tokio_serial::SerialStream> {
        let builder = tokio_serial::new(&self.settings.port, self.settings.baud_rate)
            .data_bits(self.settings.data_bits)
            .stop_bits(self.settings.stop_bits)
            .parity(self.settings.parity)
            .timeout(self.settings.timeout);

        let port = tokio_serial::SerialStream::open(&builder).map_err(|e| {
            ModbusError::connection(format!("Failed to open serial port {}: {}", self.settings.port, e))
        })?;
        // drop bytes left over from an abandoned exchange
        port.clear(tokio_serial::ClearBuffer::Input).map_err(|e| {
            ModbusError::connection(format!("Failed to clear serial port {}: {}", self.settings.port, e))
        })?;
        Ok(port)
    }

    /// Read an RTU frame: bytes until the line stays silent for one frame gap
    async fn read_rtu_frame(port: &mut tokio_serial::SerialStream, frame_gap: Duration) -> ModbusResult<Vec<u8>> {
        let mut frame = Vec::new();
        let mut buffer = [0u8; 1];

        loop {
            match timeout(frame_gap, port.read_exact(&mut buffer)).await {
                Ok(Ok(_)) => {
                    frame.push(buffer[0]);
                    if frame.len() > MAX_RTU_FRAME_SIZE {
                        return Err(ModbusError::frame("RTU frame too large"));
                    }
                }
                Ok(Err(e)) => return Err(ModbusError::io(format!("Serial read error: {}", e))),
                // silence before the first byte just means the device is still working
                Err(_) if frame.is_empty() => continue,
                Err(_) => return Ok(frame),
            }
        }
    }

    /// Read an ASCII frame: bytes up to and including CR LF
    async fn read_ascii_frame(port: &mut tokio_serial::SerialStream) -> ModbusResult<Vec<u8>> {
        let mut frame = Vec::new();
        let mut buffer = [0u8; 1];

        loop {
            port.read_exact(&mut buffer)
                .await
                .map_err(|e| ModbusError::io(format!("Serial read error: {}", e)))?;
            frame.push(buffer[0]);

            if frame.ends_with(b"\r\n") {
                return Ok(frame);
            }
            if frame.len() > MAX_ASCII_FRAME_SIZE {
                return Err(ModbusError::frame("ASCII frame too large"));
            }
        }
    }

    async fn exchange(&self, port: &mut tokio_serial::SerialStream, adu: &[u8]) -> ModbusResult<Vec<u8>> {
        let limit = self.settings.timeout;

        if self.framing == Framing::Rtu {
            tokio::time::sleep(self.frame_gap).await;
        }

        match timeout(limit, port.write_all(adu)).await {
            Ok(Ok(_)) => {
                let _ = timeout(limit, port.flush()).await;
            }
            Ok(Err(e)) => {
                return Err(ModbusError::io(format!("Failed to send {} frame: {}", self.framing, e)));
            }
            Err(_) => return Err(timeout_error("send request", limit)),
        }

        let read = async {
            match self.framing {
                Framing::Ascii => Self::read_ascii_frame(port).await,
                _ => Self::read_rtu_frame(port, self.frame_gap).await,
            }
        };

        timeout(limit, read)
            .await
            .map_err(|_| timeout_error("read response", limit))?
    }
}

#[async_trait]
impl Transporter for SerialTransporter {
    async fn send(&self, adu: &[u8]) -> ModbusResult<Vec<u8>> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if state.port.is_none() {
            match self.open_port() {
                Ok(port) => state.port = Some(port),
                Err(e) => {
                    state.stats.errors += 1;
                    return Err(e);
                }
            }
        }

        state.stats.record_request(adu);
        if self.packet_logging {
            log_packet("send", adu, self.framing.label());
        }

        let outcome = match state.port.as_mut() {
            Some(port) => self.exchange(port, adu).await,
            None => Err(ModbusError::connection("Serial port not connected")),
        };

        state.stats.record_outcome(&outcome);
        match &outcome {
            Ok(response) if self.packet_logging => log_packet("receive", response, self.framing.label()),
            Ok(_) => {}
            // reopened and cleared on next send
            Err(e) if leaves_link_dirty(e) => state.port = None,
            Err(_) => {}
        }

        outcome
    }
}
