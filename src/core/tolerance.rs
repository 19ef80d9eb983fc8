//! Tolerance evaluation of observed values against expected ones

use serde::Serialize;

/// Outcome of comparing an observed value with an expected one
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    /// Deviation does not exceed the tolerance fraction
    pub within_tolerance: bool,
    /// `|observed - expected| / |expected|`
    pub relative_deviation: f64,
}

impl Evaluation {
    /// Deviation as a percentage, for reports
    pub fn deviation_percent(&self) -> f64 {
        self.relative_deviation * 100.0
    }
}

/// Classify `observed` against `expected` with a tolerance fraction.
///
/// An expected value of zero admits no ratio: only an exact match passes,
/// reported as deviation 0.0, anything else as infinite deviation.
pub fn evaluate(expected: f64, observed: f64, tolerance: f64) -> Evaluation {
    if expected == 0.0 {
        let exact = observed == 0.0;
        return Evaluation {
            within_tolerance: exact,
            relative_deviation: if exact { 0.0 } else { f64::INFINITY },
        };
    }
    let relative_deviation = (observed - expected).abs() / expected.abs();
    Evaluation {
        within_tolerance: relative_deviation <= tolerance,
        relative_deviation,
    }
}
