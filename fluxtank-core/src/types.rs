//! Core types for FluxTank

use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp in seconds since Unix epoch
pub type Timestamp = u32;

/// A single sample of a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Timestamp in seconds
    pub ts: Timestamp,
    /// Sample value
    pub val: f64,
}

impl Point {
    /// Create a new point
    pub fn new(ts: Timestamp, val: f64) -> Self {
        Self { ts, val }
    }

    /// Bit-exact equality, so that NaN payloads and signed zeros compare as encoded
    pub fn bit_eq(&self, other: &Point) -> bool {
        self.ts == other.ts && self.val.to_bits() == other.val.to_bits()
    }
}

impl From<(Timestamp, f64)> for Point {
    fn from((ts, val): (Timestamp, f64)) -> Self {
        Self { ts, val }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.ts, self.val)
    }
}

/// Half-open time range `[from, to)` for reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub from: Timestamp,
    /// End timestamp (exclusive)
    pub to: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(from: Timestamp, to: Timestamp) -> Self {
        Self { from, to }
    }

    /// Check if a timestamp is within the range
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.from && ts < self.to
    }

    /// Check if the window `[start, start + span)` overlaps this range
    pub fn overlaps_window(&self, start: Timestamp, span: u32) -> bool {
        let end = start as u64 + span as u64;
        (start as u64) < self.to as u64 && end > self.from as u64
    }
}
