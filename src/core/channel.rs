//! Command/response exchange over a buffered transport
//!
//! The console protocol carries no correlation identifiers, so an exchange
//! is bracketed by time: discard whatever is already buffered, write the
//! command, wait the settle duration, and take what arrived meanwhile.
//! Bytes arriving after the settle window are not part of the response and
//! are discarded by the next exchange.

use super::transcript::SharedTranscript;
use super::transport::{BufferedTransport, TransportError};
use crate::config::LineEnding;
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

/// One command line plus the time to wait for its response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    line: String,
    settle: Duration,
}

impl CommandRequest {
    /// Create a request
    pub fn new(line: impl Into<String>, settle: Duration) -> Self {
        Self {
            line: line.into(),
            settle,
        }
    }

    /// Command text, without terminator
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Settle duration
    pub fn settle(&self) -> Duration {
        self.settle
    }
}

/// Bytes captured during one settle window
#[derive(Debug, Clone, Default)]
pub struct CommandResponse {
    raw: Bytes,
    text: String,
}

impl CommandResponse {
    /// Decode captured bytes; invalid UTF-8 is replaced, never rejected.
    pub fn from_bytes(raw: Bytes) -> Self {
        let text = String::from_utf8_lossy(&raw).into_owned();
        Self { raw, text }
    }

    /// Raw bytes
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Decoded text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Nothing arrived within the settle window
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Non-empty lines of the response
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty())
    }
}

/// Command channel
pub struct CommandChannel {
    transport: BufferedTransport,
    line_ending: LineEnding,
    transcript: Option<SharedTranscript>,
}

impl CommandChannel {
    /// Create a channel over an open transport
    pub fn new(transport: BufferedTransport, line_ending: LineEnding) -> Self {
        Self {
            transport,
            line_ending,
            transcript: None,
        }
    }

    /// Record every exchange into `transcript`
    #[must_use]
    pub fn with_transcript(mut self, transcript: SharedTranscript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// Underlying transport
    pub fn transport(&self) -> &BufferedTransport {
        &self.transport
    }

    /// Discard anything buffered, returning how many bytes were dropped.
    pub fn discard_pending(&self) -> Result<usize, TransportError> {
        let stale = self.transport.drain()?;
        if !stale.is_empty() {
            debug!(bytes = stale.len(), "discarded stale input");
            if let Some(transcript) = &self.transcript {
                transcript
                    .lock()
                    .log_info(&format!("discarded {} stale bytes", stale.len()));
            }
        }
        Ok(stale.len())
    }

    /// Send one command and capture its response. Never retries.
    pub async fn exchange(&self, request: &CommandRequest) -> Result<CommandResponse, TransportError> {
        self.discard_pending()?;

        let mut frame = Vec::with_capacity(request.line().len() + 2);
        frame.extend_from_slice(request.line().as_bytes());
        frame.extend_from_slice(self.line_ending.bytes());
        self.transport.write(&frame).await?;
        if let Some(transcript) = &self.transcript {
            transcript.lock().log_tx(request.line());
        }

        tokio::time::sleep(request.settle()).await;

        let response = CommandResponse::from_bytes(self.transport.drain()?);
        debug!(
            command = request.line(),
            bytes = response.raw().len(),
            "exchange complete"
        );
        if let Some(transcript) = &self.transcript {
            transcript.lock().log_rx(response.text());
        }
        Ok(response)
    }

    /// Release the transport. Safe to call repeatedly.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.transport.close().await
    }
}
