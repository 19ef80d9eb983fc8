//! Serial port transport implementation

use super::{TransportError, TransportStats, TransportTrait, TransportType};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Largest chunk pulled from the port in one read
const READ_CHUNK: usize = 4096;

/// Serial port configuration (8N1, no flow control)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name (e.g., COM11, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Idle timeout for reads, in milliseconds
    pub timeout_ms: u64,
}

impl SerialConfig {
    /// Create a new serial configuration with default settings
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            timeout_ms: 10,
        }
    }

    /// Set read timeout
    #[must_use]
    pub fn timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("COM11", 115200)
    }
}

/// Serial port transport
pub struct SerialTransport {
    config: SerialConfig,
    port: Arc<Mutex<Option<Box<dyn SerialPort + Send>>>>,
    stats: Arc<RwLock<TransportStats>>,
    connected_at: Option<Instant>,
}

impl SerialTransport {
    /// Create a new serial transport
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            port: Arc::new(Mutex::new(None)),
            stats: Arc::new(RwLock::new(TransportStats::default())),
            connected_at: None,
        }
    }

    fn map_read_error(err: std::io::Error) -> TransportError {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::UnexpectedEof => {
                TransportError::Disconnected
            }
            _ => TransportError::IoError(err),
        }
    }
}

#[async_trait]
impl TransportTrait for SerialTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.config.port.is_empty() {
            return Err(TransportError::InvalidConfiguration("serial port name is empty".into()));
        }

        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => {
                    TransportError::PortNotFound(self.config.port.clone())
                }
                serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                    TransportError::PortNotFound(self.config.port.clone())
                }
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    TransportError::PermissionDenied(self.config.port.clone())
                }
                _ => TransportError::ConnectionFailed(e.to_string()),
            })?;

        *self.port.lock() = Some(port);
        self.connected_at = Some(Instant::now());
        *self.stats.write() = TransportStats::default();

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        *self.port.lock() = None;
        self.connected_at = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.lock().is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut port_guard = self.port.lock();
        let port = port_guard.as_mut().ok_or(TransportError::NotConnected)?;

        port.write_all(data).map_err(Self::map_read_error)?;
        port.flush().map_err(Self::map_read_error)?;

        let mut stats = self.stats.write();
        stats.bytes_sent += data.len() as u64;
        stats.packets_sent += 1;

        Ok(data.len())
    }

    async fn receive(&mut self) -> Result<Bytes, TransportError> {
        let mut port_guard = self.port.lock();
        let port = port_guard.as_mut().ok_or(TransportError::NotConnected)?;

        // Only read what is already queued so the call never waits on the line.
        let available = match port.bytes_to_read() {
            Ok(n) => n as usize,
            Err(e) if e.kind() == serialport::ErrorKind::NoDevice => {
                return Err(TransportError::Disconnected);
            }
            Err(e) => {
                self.stats.write().errors += 1;
                return Err(TransportError::IoError(e.into()));
            }
        };
        if available == 0 {
            return Ok(Bytes::new());
        }

        let mut buffer = vec![0u8; available.min(READ_CHUNK)];
        match port.read(&mut buffer) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => {
                buffer.truncate(n);
                drop(port_guard);

                let mut stats = self.stats.write();
                stats.bytes_received += n as u64;
                stats.packets_received += 1;

                Ok(Bytes::from(buffer))
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Bytes::new()),
            Err(e) => {
                self.stats.write().errors += 1;
                Err(Self::map_read_error(e))
            }
        }
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Serial
    }

    fn connection_info(&self) -> String {
        format!("{} @ {} baud (8N1)", self.config.port, self.config.baud_rate)
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.read().clone();
        if let Some(connected_at) = self.connected_at {
            stats.uptime_secs = connected_at.elapsed().as_secs();
        }
        stats
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))
}
