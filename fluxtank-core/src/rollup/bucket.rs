//! Reducers and the per-bucket accumulator

use crate::{FluxError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Consolidation function applied to a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    Min,
    Max,
    Sum,
    Count,
    Last,
    SumOfSquares,
}

impl Reducer {
    /// Number of reducers
    pub const COUNT: usize = 6;

    /// All reducers, in index order
    pub const ALL: [Reducer; Reducer::COUNT] = [
        Reducer::Min,
        Reducer::Max,
        Reducer::Sum,
        Reducer::Count,
        Reducer::Last,
        Reducer::SumOfSquares,
    ];

    /// Position in [`Reducer::ALL`]
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Short tag used in rollup series names
    pub fn as_str(self) -> &'static str {
        match self {
            Reducer::Min => "min",
            Reducer::Max => "max",
            Reducer::Sum => "sum",
            Reducer::Count => "cnt",
            Reducer::Last => "lst",
            Reducer::SumOfSquares => "sos",
        }
    }
}

impl FromStr for Reducer {
    type Err = FluxError;

    /// Parse a reducer tag or its long name
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "min" => Ok(Reducer::Min),
            "max" => Ok(Reducer::Max),
            "sum" => Ok(Reducer::Sum),
            "cnt" | "count" => Ok(Reducer::Count),
            "lst" | "last" => Ok(Reducer::Last),
            "sos" | "sumofsquares" => Ok(Reducer::SumOfSquares),
            _ => Err(FluxError::Config(format!("Unknown reducer: {}", s))),
        }
    }
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running accumulators of one open bucket
///
/// A bucket only exists once it has seen a point, so every reducer always has
/// a value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    min: f64,
    max: f64,
    sum: f64,
    count: u32,
    last: f64,
    sum_of_squares: f64,
}

impl Bucket {
    /// Start a bucket with its first value
    pub fn new(value: f64) -> Self {
        Self {
            min: value,
            max: value,
            sum: value,
            count: 1,
            last: value,
            sum_of_squares: value * value,
        }
    }

    /// Fold a value into all accumulators
    #[inline]
    pub fn add(&mut self, value: f64) {
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
        self.sum += value;
        self.count += 1;
        self.last = value;
        self.sum_of_squares += value * value;
    }

    /// Result of one reducer
    #[inline]
    pub fn value(&self, reducer: Reducer) -> f64 {
        match reducer {
            Reducer::Min => self.min,
            Reducer::Max => self.max,
            Reducer::Sum => self.sum,
            Reducer::Count => self.count as f64,
            Reducer::Last => self.last,
            Reducer::SumOfSquares => self.sum_of_squares,
        }
    }

    /// Number of points folded in
    pub fn count(&self) -> u32 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reducer_index_matches_all() {
        for (i, reducer) in Reducer::ALL.iter().enumerate() {
            assert_eq!(reducer.index(), i);
            assert_eq!(reducer.as_str().parse::<Reducer>(), Ok(*reducer));
        }
        assert_eq!("LAST".parse::<Reducer>(), Ok(Reducer::Last));
        assert!(matches!(
            "avg".parse::<Reducer>(),
            Err(FluxError::Config(_))
        ));
    }

    #[test]
    fn test_bucket_reducers() {
        let mut bucket = Bucket::new(5.0);
        for v in [2.0, 8.0, 1.0, 9.0, 4.0] {
            bucket.add(v);
        }

        assert_eq!(bucket.value(Reducer::Min), 1.0);
        assert_eq!(bucket.value(Reducer::Max), 9.0);
        assert_eq!(bucket.value(Reducer::Sum), 29.0);
        assert_eq!(bucket.value(Reducer::Count), 6.0);
        assert_eq!(bucket.value(Reducer::Last), 4.0);
        assert_eq!(bucket.value(Reducer::SumOfSquares), 191.0);
        assert_eq!(bucket.count(), 6);
    }

    #[test]
    fn test_single_value_bucket() {
        let bucket = Bucket::new(-3.0);
        assert_eq!(bucket.value(Reducer::Min), -3.0);
        assert_eq!(bucket.value(Reducer::Max), -3.0);
        assert_eq!(bucket.value(Reducer::Count), 1.0);
        assert_eq!(bucket.value(Reducer::SumOfSquares), 9.0);
    }

    #[test]
    fn test_reducer_serde_names() {
        let json = serde_json::to_string(&Reducer::SumOfSquares).unwrap();
        assert_eq!(json, "\"sumofsquares\"");
        let parsed: Reducer = serde_json::from_str("\"min\"").unwrap();
        assert_eq!(parsed, Reducer::Min);
    }
}
