//! Endpoint wrapper with a background reader
//!
//! A spawned task polls the endpoint and appends whatever arrives to a
//! shared buffer. Callers write directly and take everything buffered since
//! the previous take with [`BufferedTransport::drain`].

use super::{TransportError, TransportStats, TransportTrait};
use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Receive buffer cap; the oldest bytes are dropped beyond this.
const MAX_BUFFERED: usize = 65536;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Endpoint released or lost
    Closed,
    /// Endpoint acquired and being read
    Open,
}

type SharedEndpoint = Arc<tokio::sync::Mutex<Box<dyn TransportTrait>>>;

/// Buffered, background-read transport
pub struct BufferedTransport {
    endpoint: SharedEndpoint,
    buffer: Arc<Mutex<BytesMut>>,
    state: Arc<RwLock<ConnectionState>>,
    shutdown: CancellationToken,
    reader: Option<JoinHandle<()>>,
    info: String,
}

impl BufferedTransport {
    /// Connect the endpoint and start the background reader.
    pub async fn open(
        mut endpoint: Box<dyn TransportTrait>,
        poll_interval: Duration,
    ) -> Result<Self, TransportError> {
        endpoint.connect().await?;
        let info = endpoint.connection_info();
        debug!(endpoint = %info, "endpoint opened");

        let endpoint: SharedEndpoint = Arc::new(tokio::sync::Mutex::new(endpoint));
        let buffer = Arc::new(Mutex::new(BytesMut::with_capacity(8192)));
        let state = Arc::new(RwLock::new(ConnectionState::Open));
        let shutdown = CancellationToken::new();

        let reader = tokio::spawn(read_loop(
            endpoint.clone(),
            buffer.clone(),
            state.clone(),
            shutdown.clone(),
            poll_interval,
        ));

        Ok(Self {
            endpoint,
            buffer,
            state,
            shutdown,
            reader: Some(reader),
            info,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Check if open
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Endpoint description captured at open time
    pub fn connection_info(&self) -> &str {
        &self.info
    }

    /// Write bytes to the endpoint.
    pub async fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        self.ensure_open()?;
        let result = self.endpoint.lock().await.send(data).await;
        match result {
            Ok(n) => {
                trace!(bytes = n, "tx");
                Ok(n)
            }
            Err(e) => {
                if e.is_connection_loss() {
                    *self.state.write() = ConnectionState::Closed;
                }
                Err(e)
            }
        }
    }

    /// Take every byte buffered since the previous drain.
    pub fn drain(&self) -> Result<Bytes, TransportError> {
        self.ensure_open()?;
        let taken = std::mem::take(&mut *self.buffer.lock());
        Ok(taken.freeze())
    }

    /// Endpoint statistics
    pub async fn stats(&self) -> TransportStats {
        self.endpoint.lock().await.stats()
    }

    /// Stop the reader and release the endpoint. Safe to call repeatedly.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.shutdown.cancel();
        if let Some(reader) = self.reader.take() {
            if let Err(e) = reader.await {
                warn!("background reader ended abnormally: {e}");
            }
        }

        let mut endpoint = self.endpoint.lock().await;
        let result = if endpoint.is_connected() {
            endpoint.disconnect().await
        } else {
            Ok(())
        };
        *self.state.write() = ConnectionState::Closed;
        self.buffer.lock().clear();
        debug!(endpoint = %self.info, "endpoint closed");
        result
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        match self.state() {
            ConnectionState::Open => Ok(()),
            ConnectionState::Closed => Err(TransportError::NotConnected),
        }
    }
}

impl Drop for BufferedTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn read_loop(
    endpoint: SharedEndpoint,
    buffer: Arc<Mutex<BytesMut>>,
    state: Arc<RwLock<ConnectionState>>,
    shutdown: CancellationToken,
    poll_interval: Duration,
) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let received = {
            let mut endpoint = endpoint.lock().await;
            endpoint.receive().await
        };

        match received {
            Ok(bytes) if !bytes.is_empty() => {
                trace!(bytes = bytes.len(), "rx");
                let mut buffer = buffer.lock();
                buffer.extend_from_slice(&bytes);
                if buffer.len() > MAX_BUFFERED {
                    let excess = buffer.len() - MAX_BUFFERED;
                    let _ = buffer.split_to(excess);
                    warn!(dropped = excess, "receive buffer full, oldest bytes dropped");
                }
            }
            Ok(_) => {}
            Err(e) if e.is_connection_loss() => {
                warn!("link lost: {e}");
                *state.write() = ConnectionState::Closed;
                break;
            }
            Err(e) => {
                warn!("read error ignored: {e}");
            }
        }

        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(poll_interval) => {}
        }
    }
}
