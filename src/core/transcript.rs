//! Wire transcript of command exchanges
//!
//! Records every command written and every response captured, with
//! timestamps, so a failed run can be replayed by eye.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// Shared handle to a transcript
pub type SharedTranscript = Arc<Mutex<Transcript>>;

/// Data direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    /// Response captured from the device
    Received,
    /// Command written to the device
    Sent,
    /// Annotation
    Info,
}

/// A single transcript entry
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TranscriptEntry {
    /// Capture time
    pub timestamp: DateTime<Local>,
    /// Direction
    pub direction: Direction,
    /// Decoded text
    pub text: String,
}

impl TranscriptEntry {
    fn new(direction: Direction, text: &str) -> Self {
        Self {
            timestamp: Local::now(),
            direction,
            text: text.to_string(),
        }
    }

    /// Format as one or more text lines
    pub fn to_text(&self) -> String {
        let dir = match self.direction {
            Direction::Received => "RX",
            Direction::Sent => "TX",
            Direction::Info => "##",
        };
        let stamp = self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f");
        let body = self.text.trim_end();
        if body.is_empty() {
            return format!("[{stamp}] {dir} <no data>");
        }
        body.lines()
            .map(|line| format!("[{stamp}] {dir} {}", line.trim_end_matches('\r')))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// In-memory transcript with a bounded entry count
#[derive(Debug)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    max_entries: usize,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    /// Create a transcript keeping up to 10000 entries
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            max_entries: 10000,
        }
    }

    /// Create a shared transcript
    pub fn shared() -> SharedTranscript {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Set the entry cap
    pub fn set_max_entries(&mut self, max: usize) {
        self.max_entries = max;
        self.trim();
    }

    /// Record a written command
    pub fn log_tx(&mut self, text: &str) {
        self.push(TranscriptEntry::new(Direction::Sent, text));
    }

    /// Record a captured response
    pub fn log_rx(&mut self, text: &str) {
        self.push(TranscriptEntry::new(Direction::Received, text));
    }

    /// Record an annotation
    pub fn log_info(&mut self, text: &str) {
        self.push(TranscriptEntry::new(Direction::Info, text));
    }

    /// Entries in capture order
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Write the transcript as text
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for entry in &self.entries {
            writeln!(writer, "{}", entry.to_text())?;
        }
        writer.flush()
    }

    fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
        self.trim();
    }

    fn trim(&mut self) {
        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(0..excess);
        }
    }
}
