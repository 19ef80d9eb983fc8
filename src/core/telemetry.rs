//! Telemetry extraction from console responses
//!
//! Two line layouts carry addressed values:
//!
//! - numeric run: `100: 5012\t0\t5000` binds consecutive addresses starting
//!   at the leading base address;
//! - indexed: `Coil[200]: 1` or `Reg[140] = 2` binds one value to one
//!   address. Symbolic states (ON/OFF, HIGH/LOW, TRUE/FALSE) read as 1/0.
//!
//! Lines are scanned in order and the first line covering the address
//! wins. Anything else is skipped, so banners, prompts and half-received
//! lines never make extraction fail; a missing address is `None`, never 0.

use regex::Regex;
use std::sync::OnceLock;

/// An address and the value found for it, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSample {
    /// Register, coil or input address
    pub address: u32,
    /// Value, or `None` when no line covered the address
    pub value: Option<i64>,
}

impl RegisterSample {
    /// Whether a value was found
    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }
}

/// One parsed telemetry line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryLine {
    /// `<base>: <v0> <v1> ...`
    Run {
        /// Address of the first value
        base: u32,
        /// Consecutive values
        values: Vec<i64>,
    },
    /// `<Kind>[<address>]: <value>`
    Indexed {
        /// Label before the bracket (Coil, Input, Reg, ...)
        kind: String,
        /// Address inside the brackets
        address: u32,
        /// Bound value
        value: i64,
    },
}

impl TelemetryLine {
    /// Parse one line; `None` for anything that is not telemetry.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        parse_indexed(line).or_else(|| parse_run(line))
    }

    /// Value this line holds for `address`
    pub fn value_at(&self, address: u32) -> Option<i64> {
        match self {
            Self::Run { base, values } => {
                let offset = address.checked_sub(*base)? as usize;
                values.get(offset).copied()
            }
            Self::Indexed { address: a, value, .. } => (*a == address).then_some(*value),
        }
    }

    fn kind_matches(&self, wanted: &str) -> bool {
        match self {
            Self::Run { .. } => false,
            Self::Indexed { kind, .. } => kind.eq_ignore_ascii_case(wanted),
        }
    }
}

fn indexed_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^([A-Za-z][A-Za-z0-9_ ]*?)\s*\[\s*(\d+)\s*\]\s*[:=]\s*([+-]?\w+)").ok()
        })
        .as_ref()
}

fn parse_value_token(token: &str) -> Option<i64> {
    if let Ok(v) = token.parse::<i64>() {
        return Some(v);
    }
    match token.to_ascii_uppercase().as_str() {
        "ON" | "HIGH" | "TRUE" => Some(1),
        "OFF" | "LOW" | "FALSE" => Some(0),
        _ => None,
    }
}

fn parse_indexed(line: &str) -> Option<TelemetryLine> {
    let captures = indexed_pattern()?.captures(line)?;
    Some(TelemetryLine::Indexed {
        kind: captures[1].trim().to_string(),
        address: captures[2].parse().ok()?,
        value: parse_value_token(&captures[3])?,
    })
}

fn parse_run(line: &str) -> Option<TelemetryLine> {
    let (head, tail) = line.split_once(':')?;
    let base = head.trim().parse::<u32>().ok()?;
    let values = tail
        .split_whitespace()
        .map(str::parse::<i64>)
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    if values.is_empty() {
        return None;
    }
    Some(TelemetryLine::Run { base, values })
}

/// Value bound to `address` in `text`, from the first matching line.
pub fn extract(text: &str, address: u32) -> Option<i64> {
    text.lines()
        .filter_map(TelemetryLine::parse)
        .find_map(|line| line.value_at(address))
}

/// Like [`extract`], but only indexed lines of the given kind count.
pub fn extract_kind(text: &str, kind: &str, address: u32) -> Option<i64> {
    text.lines()
        .filter_map(TelemetryLine::parse)
        .filter(|line| line.kind_matches(kind))
        .find_map(|line| line.value_at(address))
}

/// Sample `address` from `text`
pub fn sample(text: &str, address: u32) -> RegisterSample {
    RegisterSample {
        address,
        value: extract(text, address),
    }
}

/// Every addressed value in `text`; the first occurrence of an address wins.
pub fn extract_all(text: &str) -> Vec<RegisterSample> {
    let mut samples: Vec<RegisterSample> = Vec::new();
    let mut push = |address: u32, value: i64| {
        if !samples.iter().any(|s| s.address == address) {
            samples.push(RegisterSample {
                address,
                value: Some(value),
            });
        }
    };
    for line in text.lines().filter_map(TelemetryLine::parse) {
        match line {
            TelemetryLine::Run { base, values } => {
                for (offset, value) in values.into_iter().enumerate() {
                    // Values past the top of the address space are dropped.
                    let Some(address) = u32::try_from(offset).ok().and_then(|o| base.checked_add(o)) else {
                        break;
                    };
                    push(address, value);
                }
            }
            TelemetryLine::Indexed { address, value, .. } => push(address, value),
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "\r\n=== HOLDING REGISTERS ===\r\n\
        100: 50123\t0\t7\t-3\r\n\
        104: 11\t12\r\n\
        > \r\n";

    #[test]
    fn test_run_membership() {
        assert_eq!(extract(DUMP, 100), Some(50123));
        assert_eq!(extract(DUMP, 103), Some(-3));
        assert_eq!(extract(DUMP, 104), Some(11));
        assert_eq!(extract(DUMP, 105), Some(12));
        assert_eq!(extract(DUMP, 99), None);
        assert_eq!(extract(DUMP, 106), None);
    }

    #[test]
    fn test_every_address_in_run() {
        let values: Vec<i64> = (0..40).map(|i| i * 1000 + 7).collect();
        let line = format!(
            "100: {}",
            values.iter().map(ToString::to_string).collect::<Vec<_>>().join("\t")
        );
        for (i, v) in values.iter().enumerate() {
            assert_eq!(extract(&line, 100 + i as u32), Some(*v));
        }
        assert_eq!(extract(&line, 140), None);
    }

    #[test]
    fn test_space_separated_run() {
        assert_eq!(extract("100: 5  6 7", 102), Some(7));
    }

    #[test]
    fn test_indexed_lines() {
        let text = "Coil[200]: 1\nInput[13]: 0\nReg[140] = 2\n";
        assert_eq!(extract(text, 200), Some(1));
        assert_eq!(extract(text, 13), Some(0));
        assert_eq!(extract(text, 140), Some(2));
        assert_eq!(extract(text, 201), None);
    }

    #[test]
    fn test_symbolic_states() {
        let text = "Coil[0] = ON\nCoil[1] = OFF\nInput[2] = HIGH\nInput[3] = low\n";
        assert_eq!(extract(text, 0), Some(1));
        assert_eq!(extract(text, 1), Some(0));
        assert_eq!(extract(text, 2), Some(1));
        assert_eq!(extract(text, 3), Some(0));
    }

    #[test]
    fn test_kind_filter() {
        let text = "Coil[5]: 1\nInput[5]: 0\n";
        assert_eq!(extract_kind(text, "input", 5), Some(0));
        assert_eq!(extract_kind(text, "COIL", 5), Some(1));
        assert_eq!(extract_kind(text, "Reg", 5), None);
    }

    #[test]
    fn test_first_match_wins() {
        let text = "100: 1\t2\nReg[101] = 99\n101: 55\n";
        assert_eq!(extract(text, 101), Some(2));
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let text = "Version: 2.1.0\n100: 12\tabc\t14\n10:30:00 boot\nCounter: \n100: 1\t2\t3\n";
        assert_eq!(extract(text, 102), Some(3));
        assert_eq!(extract(text, 100), Some(1));
        assert_eq!(extract("Coil[7]: maybe", 7), None);
        assert_eq!(extract("no colon here 100 200", 100), None);
    }

    #[test]
    fn test_missing_address_is_none_not_zero() {
        let s = sample("", 100);
        assert_eq!(s, RegisterSample { address: 100, value: None });
        assert!(!s.is_present());
    }

    #[test]
    fn test_extract_all() {
        let samples = extract_all("100: 5\t6\nCoil[200]: ON\n101: 9\n");
        assert_eq!(
            samples,
            vec![
                RegisterSample { address: 100, value: Some(5) },
                RegisterSample { address: 101, value: Some(6) },
                RegisterSample { address: 200, value: Some(1) },
            ]
        );
    }

    #[test]
    fn test_extract_all_stops_at_top_address() {
        let samples = extract_all("4294967295: 1\t2\n");
        assert_eq!(samples, vec![RegisterSample { address: u32::MAX, value: Some(1) }]);
        assert_eq!(extract("4294967295: 1\t2\n", u32::MAX), Some(1));
    }
}
