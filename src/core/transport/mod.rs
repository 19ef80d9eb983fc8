//! Transport layer for reaching the device under test
//!
//! Supports:
//! - Serial ports (USB-Serial console of the device)
//! - Raw TCP connections (network console)
//!
//! Endpoints implement [`TransportTrait`]. [`BufferedTransport`] wraps one
//! endpoint with a background reader that drains incoming bytes into a
//! shared buffer.

mod buffered;
mod serial;
mod tcp;

pub use buffered::{BufferedTransport, ConnectionState};
pub use serial::{list_ports, SerialConfig, SerialTransport};
pub use tcp::{TcpConfig, TcpTransport};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Transport {
    /// Serial port connection
    Serial(SerialConfig),
    /// Raw TCP connection
    Tcp(TcpConfig),
}

impl Default for Transport {
    fn default() -> Self {
        Self::Serial(SerialConfig::default())
    }
}

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Serial port
    Serial,
    /// Raw TCP
    Tcp,
    /// In-process simulated device
    Virtual,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "Serial"),
            Self::Tcp => write!(f, "TCP"),
            Self::Virtual => write!(f, "Virtual"),
        }
    }
}

/// Transport error types
///
/// `NotConnected` and `Disconnected` are the connection errors of the
/// bench: the endpoint is unavailable or was closed mid-run.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timeout
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Transport is closed
    #[error("Not connected")]
    NotConnected,

    /// Peer closed the link
    #[error("Disconnected")]
    Disconnected,
}

impl TransportError {
    /// Whether the error means the link is gone for good.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Disconnected)
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Writes issued
    pub packets_sent: u64,
    /// Reads that returned data
    pub packets_received: u64,
    /// Read errors swallowed by the background reader
    pub errors: u64,
    /// Connection uptime in seconds
    pub uptime_secs: u64,
}

/// Byte-stream endpoint
#[async_trait]
pub trait TransportTrait: Send + Sync {
    /// Acquire the endpoint
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Release the endpoint
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Send data
    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Receive data (non-blocking, returns immediately with available data)
    async fn receive(&mut self) -> Result<Bytes, TransportError>;

    /// Get transport type
    fn transport_type(&self) -> TransportType;

    /// Get connection info string
    fn connection_info(&self) -> String;

    /// Get statistics
    fn stats(&self) -> TransportStats;
}

/// Create an endpoint from configuration
pub fn create_transport(config: Transport) -> Box<dyn TransportTrait> {
    match config {
        Transport::Serial(cfg) => Box::new(SerialTransport::new(cfg)),
        Transport::Tcp(cfg) => Box::new(TcpTransport::new(cfg)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_loss_classification() {
        assert!(TransportError::NotConnected.is_connection_loss());
        assert!(TransportError::Disconnected.is_connection_loss());
        assert!(!TransportError::Timeout(3).is_connection_loss());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "glitch");
        assert!(!TransportError::from(io).is_connection_loss());
    }

    #[test]
    fn test_create_transport_kinds() {
        let serial = create_transport(Transport::Serial(SerialConfig::new("/dev/ttyUSB0", 115200)));
        assert_eq!(serial.transport_type(), TransportType::Serial);
        assert!(!serial.is_connected());

        let tcp = create_transport(Transport::Tcp(TcpConfig::new("10.0.0.5", 23)));
        assert_eq!(tcp.transport_type(), TransportType::Tcp);
        assert_eq!(tcp.connection_info(), "10.0.0.5:23");
    }
}
