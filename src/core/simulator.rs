//! Virtual Device Simulator
//!
//! An in-process endpoint that answers console command lines, used for
//! dry runs and for testing the orchestration engine without hardware.
//! Replies can be delayed to reproduce responses that outlive a settle
//! window, and the link can be severed or made flaky on demand.

use super::transport::{TransportError, TransportStats, TransportTrait, TransportType};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default latency of a simulated reply
const REPLY_LATENCY: Duration = Duration::from_millis(20);

/// A reply produced by a device model
#[derive(Debug, Clone)]
pub struct DeviceReply {
    /// Text written back to the host
    pub text: String,
    /// Delay before the text becomes readable
    pub delay: Duration,
}

impl DeviceReply {
    /// Reply readable immediately
    pub fn now(text: impl Into<String>) -> Self {
        Self::after(text, Duration::ZERO)
    }

    /// Reply readable after `delay`
    pub fn after(text: impl Into<String>, delay: Duration) -> Self {
        Self {
            text: text.into(),
            delay,
        }
    }
}

/// Behaviour behind a virtual device
pub trait DeviceModel: Send {
    /// Handle one command line; `None` means the device stays silent.
    fn handle(&mut self, line: &str, now: Instant) -> Option<DeviceReply>;
}

struct FnModel<F>(F);

impl<F> DeviceModel for FnModel<F>
where
    F: FnMut(&str) -> Option<DeviceReply> + Send,
{
    fn handle(&mut self, line: &str, _now: Instant) -> Option<DeviceReply> {
        (self.0)(line)
    }
}

/// Test-side control over a virtual device's link
#[derive(Clone, Default)]
pub struct LinkControl {
    severed: Arc<AtomicBool>,
    refuse: Arc<AtomicBool>,
    read_errors: Arc<AtomicU32>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl LinkControl {
    /// Drop the link; the next read reports a disconnect.
    pub fn sever(&self) {
        self.severed.store(true, Ordering::SeqCst);
    }

    /// Make the next `connect` fail.
    pub fn refuse_connect(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    /// Fail the next `count` reads with a transient I/O error.
    pub fn inject_read_errors(&self, count: u32) {
        self.read_errors.store(count, Ordering::SeqCst);
    }

    /// Every command line the device has received, in order
    pub fn sent_lines(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

/// Simulated endpoint
pub struct VirtualDevice {
    model: Mutex<Box<dyn DeviceModel>>,
    link: LinkControl,
    connected: bool,
    partial: String,
    pending: VecDeque<(Instant, Bytes)>,
    stats: Arc<RwLock<TransportStats>>,
    name: String,
}

impl VirtualDevice {
    /// Create a device backed by `model`
    pub fn new(name: &str, model: impl DeviceModel + 'static) -> Self {
        Self {
            model: Mutex::new(Box::new(model)),
            link: LinkControl::default(),
            connected: false,
            partial: String::new(),
            pending: VecDeque::new(),
            stats: Arc::new(RwLock::new(TransportStats::default())),
            name: name.to_string(),
        }
    }

    /// Create a device answering through a closure
    pub fn from_fn<F>(handler: F) -> Self
    where
        F: FnMut(&str) -> Option<DeviceReply> + Send + 'static,
    {
        Self::new("virtual", FnModel(handler))
    }

    /// Handle for steering the link from outside
    pub fn link(&self) -> LinkControl {
        self.link.clone()
    }

    fn accept_line(&mut self, line: &str) {
        let now = Instant::now();
        self.link.sent.lock().push(line.to_string());
        if let Some(reply) = self.model.lock().handle(line, now) {
            let due = now + reply.delay;
            // Keep the queue ordered by due time.
            let at = self.pending.partition_point(|(t, _)| *t <= due);
            self.pending.insert(at, (due, Bytes::from(reply.text.into_bytes())));
        }
    }
}

#[async_trait]
impl TransportTrait for VirtualDevice {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.link.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(format!("{} refused connection", self.name)));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.pending.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.link.severed.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }

        self.partial.push_str(&String::from_utf8_lossy(data));
        while let Some(end) = self.partial.find(|c: char| c == '\r' || c == '\n') {
            let line: String = self.partial.drain(..=end).collect();
            let line = line.trim();
            if !line.is_empty() {
                self.accept_line(line);
            }
        }

        let mut stats = self.stats.write();
        stats.bytes_sent += data.len() as u64;
        stats.packets_sent += 1;
        Ok(data.len())
    }

    async fn receive(&mut self) -> Result<Bytes, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.link.severed.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        let injected = self
            .link
            .read_errors
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            self.stats.write().errors += 1;
            return Err(TransportError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected framing error",
            )));
        }

        let now = Instant::now();
        let mut out = Vec::new();
        while let Some((due, _)) = self.pending.front() {
            if *due > now {
                break;
            }
            if let Some((_, chunk)) = self.pending.pop_front() {
                out.extend_from_slice(&chunk);
            }
        }
        if !out.is_empty() {
            let mut stats = self.stats.write();
            stats.bytes_received += out.len() as u64;
            stats.packets_received += 1;
        }
        Ok(Bytes::from(out))
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Virtual
    }

    fn connection_info(&self) -> String {
        format!("{} (simulated)", self.name)
    }

    fn stats(&self) -> TransportStats {
        self.stats.read().clone()
    }
}

/// Register layout and behaviour of one simulated counter
#[derive(Debug, Clone)]
struct CounterChannel {
    index_reg: u32,
    raw_reg: u32,
    freq_reg: u32,
    overload_reg: u32,
    ctrl_reg: u32,
    prescaler: i64,
    bit_width: u32,
    count_down: bool,
    start_value: i64,
    accumulated: f64,
    running_since: Option<Instant>,
}

impl CounterChannel {
    fn from_options(options: &HashMap<&str, &str>) -> Option<Self> {
        let reg = |key: &str| options.get(key).and_then(|v| v.parse::<u32>().ok());
        Some(Self {
            index_reg: reg("index-reg")?,
            raw_reg: reg("raw-reg")?,
            freq_reg: reg("freq-reg")?,
            overload_reg: reg("overload-reg")?,
            ctrl_reg: reg("ctrl-reg")?,
            prescaler: options.get("prescaler").and_then(|v| v.parse().ok()).unwrap_or(1).max(1),
            bit_width: options.get("bit-width").and_then(|v| v.parse().ok()).unwrap_or(32).clamp(8, 62),
            count_down: options.get("direction") == Some(&"down"),
            start_value: options.get("start-value").and_then(|v| v.parse().ok()).unwrap_or(0),
            accumulated: 0.0,
            running_since: None,
        })
    }

    fn pulses(&self, rate: f64, now: Instant) -> i64 {
        let live = self
            .running_since
            .map_or(0.0, |since| now.duration_since(since).as_secs_f64() * rate);
        (self.accumulated + live).floor() as i64
    }

    fn control(&mut self, value: i64, rate: f64, now: Instant) {
        match value {
            1 => {
                self.accumulated = 0.0;
                self.running_since = None;
            }
            2 => {
                if self.running_since.is_none() {
                    self.running_since = Some(now);
                }
            }
            4 => {
                self.accumulated = self.pulses(rate, now) as f64;
                self.running_since = None;
            }
            _ => {}
        }
    }

    fn registers(&self, rate: f64, now: Instant) -> [(u32, i64); 5] {
        let modulus = 1i64 << self.bit_width;
        let pulses = self.pulses(rate, now);
        let unwrapped = if self.count_down {
            self.start_value - pulses
        } else {
            self.start_value + pulses
        };
        let overflowed = unwrapped >= modulus || unwrapped < 0;
        let freq = if self.running_since.is_some() { rate as i64 } else { 0 };
        [
            (self.index_reg, unwrapped.rem_euclid(modulus)),
            (self.raw_reg, (pulses / self.prescaler).rem_euclid(modulus)),
            (self.freq_reg, freq),
            (self.overload_reg, i64::from(overflowed)),
            (self.ctrl_reg, 0),
        ]
    }
}

/// Pulse counter device fed by a constant-rate signal on every input.
///
/// Understands the counter console subset:
/// `set counter <n> mode 1 key:value ...`, `set register <addr> value:<v>`
/// (1 = reset, 2 = start, 4 = stop on a control register) and
/// `show registers <start> <count>`, answered with run lines of up to ten
/// tab-separated values.
pub struct PulseCounter {
    rate: f64,
    counters: HashMap<u32, CounterChannel>,
    holding: HashMap<u32, i64>,
}

impl PulseCounter {
    /// Counter fed with `rate` pulses per second
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            counters: HashMap::new(),
            holding: HashMap::new(),
        }
    }

    /// Convenience: a [`VirtualDevice`] wrapping a fresh counter
    pub fn device(rate: f64) -> VirtualDevice {
        VirtualDevice::new("pulse-counter", Self::new(rate))
    }

    fn register_value(&self, address: u32, now: Instant) -> i64 {
        self.counters
            .values()
            .flat_map(|c| c.registers(self.rate, now))
            .find(|(reg, _)| *reg == address)
            .map(|(_, v)| v)
            .or_else(|| self.holding.get(&address).copied())
            .unwrap_or(0)
    }

    fn set_counter(&mut self, tokens: &[&str]) -> String {
        let Some(id) = tokens.get(2).and_then(|t| t.parse::<u32>().ok()) else {
            return "ERROR: counter id expected\r\n".into();
        };
        let options: HashMap<&str, &str> = tokens.iter().filter_map(|t| t.split_once(':')).collect();
        match CounterChannel::from_options(&options) {
            Some(channel) => {
                self.counters.insert(id, channel);
                format!("Counter {id} configured\r\n")
            }
            None => "ERROR: missing register mapping\r\n".into(),
        }
    }

    fn set_register(&mut self, tokens: &[&str], now: Instant) -> String {
        let address = tokens.get(2).and_then(|t| t.parse::<u32>().ok());
        let value = tokens
            .get(3)
            .and_then(|t| t.strip_prefix("value:"))
            .and_then(|v| v.parse::<i64>().ok());
        let (Some(address), Some(value)) = (address, value) else {
            return "ERROR: usage: set register <addr> value:<v>\r\n".into();
        };
        let rate = self.rate;
        match self.counters.values_mut().find(|c| c.ctrl_reg == address) {
            Some(counter) => counter.control(value, rate, now),
            None => {
                self.holding.insert(address, value);
            }
        }
        format!("Reg[{address}] = {value}\r\n")
    }

    fn show_registers(&self, tokens: &[&str], now: Instant) -> String {
        let start = tokens.get(2).and_then(|t| t.parse::<u32>().ok()).unwrap_or(0);
        let count = tokens.get(3).and_then(|t| t.parse::<u32>().ok()).unwrap_or(32);
        let mut out = String::from("\r\n=== HOLDING REGISTERS ===\r\n");
        let stop = start.saturating_add(count);
        let mut base = start;
        while base < stop {
            let end = base.saturating_add(10).min(stop);
            let values: Vec<String> = (base..end)
                .map(|a| self.register_value(a, now).to_string())
                .collect();
            out.push_str(&format!("{base}: {}\r\n", values.join("\t")));
            base = end;
        }
        out
    }
}

impl DeviceModel for PulseCounter {
    fn handle(&mut self, line: &str, now: Instant) -> Option<DeviceReply> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let text = match tokens.as_slice() {
            ["set", "counter", ..] => self.set_counter(&tokens),
            ["set", "register", ..] => self.set_register(&tokens, now),
            ["show", "registers", ..] => self.show_registers(&tokens, now),
            _ => format!("Unknown command: {line}\r\n"),
        };
        Some(DeviceReply::after(text, REPLY_LATENCY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "set counter 1 mode 1 hw-mode:hw edge:rising direction:up hw-gpio:19 \
        prescaler:1 bit-width:32 index-reg:100 raw-reg:110 freq-reg:120 overload-reg:130 ctrl-reg:140";

    #[tokio::test(start_paused = true)]
    async fn test_delayed_reply_becomes_readable_later() {
        let mut device = VirtualDevice::from_fn(|_| {
            Some(DeviceReply::after("late\r\n", Duration::from_millis(300)))
        });
        device.connect().await.unwrap();
        device.send(b"anything\r\n").await.unwrap();

        assert!(device.receive().await.unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(&device.receive().await.unwrap()[..], b"late\r\n");
    }

    #[tokio::test]
    async fn test_lines_split_across_writes() {
        let mut device = VirtualDevice::from_fn(|_| None);
        let link = device.link();
        device.connect().await.unwrap();
        device.send(b"show reg").await.unwrap();
        device.send(b"isters 100 4\r\nhelp\n").await.unwrap();
        assert_eq!(link.sent_lines(), vec!["show registers 100 4", "help"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulse_counter_counts_while_running() {
        let mut counter = PulseCounter::new(5000.0);
        let t0 = Instant::now();
        counter.handle(CONFIG, t0);
        counter.handle("set register 140 value:2", t0);

        let later = t0 + Duration::from_secs(10);
        let reply = counter.handle("show registers 100 40", later).unwrap();
        assert!(reply.text.contains("100: 50000\t"));
        assert!(reply.text.contains("120: 5000\t"));

        counter.handle("set register 140 value:4", later);
        let much_later = later + Duration::from_secs(5);
        let reply = counter.handle("show registers 100 1", much_later).unwrap();
        assert!(reply.text.contains("100: 50000\r\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulse_counter_wraps_at_bit_width() {
        let mut counter = PulseCounter::new(5000.0);
        let t0 = Instant::now();
        counter.handle(&CONFIG.replace("bit-width:32", "bit-width:16"), t0);
        counter.handle("set register 140 value:2", t0);

        let reply = counter
            .handle("show registers 100 40", t0 + Duration::from_secs(15))
            .unwrap();
        assert!(reply.text.contains("100: 9464\t"));
        assert!(reply.text.contains("130: 1\t"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dump_at_top_of_address_space() {
        let mut counter = PulseCounter::new(5000.0);
        let now = Instant::now();
        let reply = counter.handle("show registers 4294967290 40", now).unwrap();
        assert!(reply.text.contains("4294967290: 0\t0\t0\t0\t0\r\n"));
        let reply = counter.handle("show registers 4294967295 40", now).unwrap();
        assert!(reply.text.ends_with("=== HOLDING REGISTERS ===\r\n"));
    }
}
