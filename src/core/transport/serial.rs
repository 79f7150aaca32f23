//! Serial link to the I/O controller

use super::{TransportError, TransportStats, TransportTrait};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Serial port flow control type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

impl std::str::FromStr for SerialFlowControl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "hw" | "hardware" | "rtscts" => Ok(Self::Hardware),
            "sw" | "software" | "xonxoff" => Ok(Self::Software),
            other => Err(format!("unknown flow control: {other}")),
        }
    }
}

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl std::str::FromStr for SerialParity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            other => Err(format!("unknown parity: {other}")),
        }
    }
}

/// Serial port configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Flow control
    pub flow_control: SerialFlowControl,
    /// Read poll timeout in milliseconds
    pub read_timeout_ms: u64,
}

impl SerialConfig {
    /// Create a new serial configuration with default settings
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
            read_timeout_ms: 100,
        }
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Set flow control
    #[must_use]
    pub fn flow_control(mut self, flow: SerialFlowControl) -> Self {
        self.flow_control = flow;
        self
    }

    /// Line settings in the usual short form, e.g. `8N1`
    pub fn line_code(&self) -> String {
        let parity = match self.parity {
            SerialParity::None => 'N',
            SerialParity::Odd => 'O',
            SerialParity::Even => 'E',
        };
        format!("{}{}{}", self.data_bits, parity, self.stop_bits)
    }

    fn builder(&self) -> serialport::SerialPortBuilder {
        let data_bits = match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let stop_bits = if self.stop_bits == 2 {
            StopBits::Two
        } else {
            StopBits::One
        };
        let parity = match self.parity {
            SerialParity::None => Parity::None,
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
        };
        let flow_control = match self.flow_control {
            SerialFlowControl::None => FlowControl::None,
            SerialFlowControl::Hardware => FlowControl::Hardware,
            SerialFlowControl::Software => FlowControl::Software,
        };

        serialport::new(&self.port, self.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(flow_control)
            .timeout(Duration::from_millis(self.read_timeout_ms))
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("COM1", 115200)
    }
}

// ============ Transport ============

/// Largest chunk handed out by one poll
const READ_CHUNK: usize = 4096;

type PortSlot = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

/// Serial link to the controller
///
/// The port is opened once and cloned into a read half and a write half.
/// Reads block for up to `read_timeout_ms` on the blocking pool, so a
/// control frame can go out while a poll is still waiting for status bytes.
pub struct SerialTransport {
    config: SerialConfig,
    reader: PortSlot,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
    stats: Arc<RwLock<TransportStats>>,
    connected_at: Mutex<Option<Instant>>,
}

impl SerialTransport {
    /// Transport for `config`, not yet opened
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            reader: Arc::new(Mutex::new(None)),
            writer: Mutex::new(None),
            stats: Arc::new(RwLock::new(TransportStats::default())),
            connected_at: Mutex::new(None),
        }
    }

    fn open_error(&self, err: &serialport::Error) -> TransportError {
        match err.kind() {
            serialport::ErrorKind::NoDevice => {
                TransportError::PortNotFound(self.config.port.clone())
            }
            serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
                TransportError::PermissionDenied(self.config.port.clone())
            }
            _ => TransportError::ConnectionFailed(format!("{}: {}", self.config.port, err)),
        }
    }
}

#[async_trait]
impl TransportTrait for SerialTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let writer = self.config.builder().open().map_err(|e| self.open_error(&e))?;
        let reader = writer.try_clone().map_err(|e| self.open_error(&e))?;

        *self.reader.lock() = Some(reader);
        *self.writer.lock() = Some(writer);
        *self.connected_at.lock() = Some(Instant::now());
        *self.stats.write() = TransportStats::default();

        tracing::info!("Opened {}", self.connection_info());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let had_writer = self.writer.lock().take().is_some();
        self.reader.lock().take();
        *self.connected_at.lock() = None;
        if had_writer {
            tracing::info!("Closed {}", self.config.port);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.writer.lock().is_some()
    }

    async fn send(&self, data: &[u8]) -> Result<usize, TransportError> {
        {
            let mut guard = self.writer.lock();
            let port = guard.as_mut().ok_or(TransportError::Disconnected)?;
            port.write_all(data).map_err(hangup_or_io)?;
            port.flush().map_err(hangup_or_io)?;
        }

        let mut stats = self.stats.write();
        stats.bytes_sent += data.len() as u64;
        stats.packets_sent += 1;
        Ok(data.len())
    }

    async fn receive(&self) -> Result<Bytes, TransportError> {
        let reader = Arc::clone(&self.reader);
        let stats = Arc::clone(&self.stats);
        tokio::task::spawn_blocking(move || poll_port(&reader, &stats))
            .await
            .map_err(|e| TransportError::IoError(io::Error::other(e)))?
    }

    fn connection_info(&self) -> String {
        let flow = match self.config.flow_control {
            SerialFlowControl::None => "",
            SerialFlowControl::Hardware => ", RTS/CTS",
            SerialFlowControl::Software => ", XON/XOFF",
        };
        format!(
            "{} @ {} baud {}{}",
            self.config.port,
            self.config.baud_rate,
            self.config.line_code(),
            flow
        )
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.read().clone();
        if let Some(connected_at) = *self.connected_at.lock() {
            stats.uptime_secs = connected_at.elapsed().as_secs();
        }
        stats
    }
}

/// One blocking read on the read half
///
/// An idle poll yields an empty chunk. End of stream and hangup kinds mean
/// the controller is gone.
fn poll_port(
    reader: &Mutex<Option<Box<dyn SerialPort>>>,
    stats: &RwLock<TransportStats>,
) -> Result<Bytes, TransportError> {
    let mut guard = reader.lock();
    let port = guard.as_mut().ok_or(TransportError::Disconnected)?;

    let mut buffer = BytesMut::zeroed(READ_CHUNK);
    let n = match port.read(&mut buffer) {
        Ok(0) => return Err(TransportError::Disconnected),
        Ok(n) => n,
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ) =>
        {
            return Ok(Bytes::new());
        }
        Err(e) => return Err(hangup_or_io(e)),
    };
    drop(guard);

    buffer.truncate(n);
    let mut stats = stats.write();
    stats.bytes_received += n as u64;
    stats.packets_received += 1;
    Ok(buffer.freeze())
}

/// Unplugging a USB adapter surfaces as one of these kinds, depending on the
/// platform and on whether the read or the write notices first
fn hangup_or_io(err: io::Error) -> TransportError {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof => {
            tracing::debug!("Serial hangup: {}", err);
            TransportError::Disconnected
        }
        _ => TransportError::IoError(err),
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_settings() {
        assert_eq!("E".parse::<SerialParity>(), Ok(SerialParity::Even));
        assert!("mark".parse::<SerialParity>().is_err());
        assert_eq!("hw".parse::<SerialFlowControl>(), Ok(SerialFlowControl::Hardware));
    }

    #[test]
    fn test_connection_info() {
        let transport = SerialTransport::new(
            SerialConfig::new("/dev/ttyUSB0", 9600).parity(SerialParity::Odd).stop_bits(2),
        );
        assert_eq!(transport.connection_info(), "/dev/ttyUSB0 @ 9600 baud 8O2");
        assert!(!transport.is_connected());

        let transport = SerialTransport::new(
            SerialConfig::new("COM4", 115200).flow_control(SerialFlowControl::Hardware),
        );
        assert_eq!(transport.connection_info(), "COM4 @ 115200 baud 8N1, RTS/CTS");
    }

    #[tokio::test]
    async fn test_unopened_port_is_disconnected() {
        let transport = SerialTransport::new(SerialConfig::default());
        assert!(matches!(
            transport.send(&[0xA5]).await,
            Err(TransportError::Disconnected)
        ));
        assert!(matches!(
            transport.receive().await,
            Err(TransportError::Disconnected)
        ));
        assert_eq!(transport.stats(), TransportStats::default());
    }

    #[test]
    fn test_hangup_kinds_mean_disconnected() {
        for kind in [io::ErrorKind::BrokenPipe, io::ErrorKind::UnexpectedEof] {
            assert!(matches!(
                hangup_or_io(io::Error::from(kind)),
                TransportError::Disconnected
            ));
        }
        assert!(matches!(
            hangup_or_io(io::Error::from(io::ErrorKind::InvalidData)),
            TransportError::IoError(_)
        ));
    }
}
