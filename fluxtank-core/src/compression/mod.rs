//! Chunk compression for time-series data
//!
//! Implements the Gorilla scheme from Facebook's paper
//! "Gorilla: A Fast, Scalable, In-Memory Time Series Database":
//! delta-of-delta coded timestamps and XOR coded float values.
//!
//! Two header profiles share one payload algorithm:
//!
//! - [`Profile::Bounded`] writes `t0` into the stream and stores the first
//!   delta in 14 bits, so it only fits chunks shorter than ~4.5 hours. Large
//!   delta-of-delta jumps escape to 32 bits.
//! - [`Profile::Unbounded`] keeps `t0` out of the stream (the caller tracks it),
//!   assumes a starting delta of 60s and uses delta-of-delta from the very first
//!   point. Large jumps escape to 64 bits and the end marker is 5 bits.
//!
//! ```text
//! dod == 0               '0'
//! dod in [-63, 64]       '10'   + 7 bits
//! dod in [-255, 256]     '110'  + 9 bits
//! dod in [-2047, 2048]   '1110' + 12 bits
//! otherwise              profile escape
//! ```

mod bitstream;
mod chunk;
mod decoder;
mod encoder;

pub use bitstream::{BitReader, BitWriter};
pub use chunk::Chunk;
pub use decoder::ChunkIter;

use crate::{FluxError, Result};
use serde::{Deserialize, Serialize};

/// Width of the first delta in the bounded profile
pub const BOUNDED_FIRST_DELTA_BITS: u32 = 14;

/// First delta value reserved as the bounded end-of-stream marker
const BOUNDED_FIRST_DELTA_MARKER: u64 = (1 << BOUNDED_FIRST_DELTA_BITS) - 1;

/// Delta the unbounded profile assumes before the first point
pub const UNBOUNDED_INITIAL_DELTA: i64 = 60;

/// Delta-of-delta size classes shared by both profiles:
/// (lowest, highest, prefix, prefix length, payload bits)
const DOD_CLASSES: [(i64, i64, u64, u32, u32); 3] = [
    (-63, 64, 0b10, 2, 7),
    (-255, 256, 0b110, 3, 9),
    (-2047, 2048, 0b1110, 4, 12),
];

/// Header layout of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Fixed, short span: `t0` in stream, 14-bit first delta, 32-bit escape
    Bounded,
    /// Arbitrary span: `t0` held by the caller, 64-bit escape
    Unbounded,
}

impl Profile {
    /// Largest first delta (`ts - t0`) the profile can represent
    pub fn max_first_delta(self) -> u32 {
        match self {
            // the all-ones value marks end of stream
            Profile::Bounded => (BOUNDED_FIRST_DELTA_MARKER - 1) as u32,
            Profile::Unbounded => u32::MAX,
        }
    }

    /// Pick the tightest profile able to hold chunks of `span` seconds
    pub fn for_span(span: u32) -> Self {
        if span > 0 && span - 1 <= Profile::Bounded.max_first_delta() {
            Profile::Bounded
        } else {
            Profile::Unbounded
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Profile::Bounded => 1,
            Profile::Unbounded => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Profile::Bounded),
            2 => Ok(Profile::Unbounded),
            _ => Err(FluxError::InvalidFormat(format!(
                "Invalid chunk profile: {}",
                value
            ))),
        }
    }

    /// Escape prefix, its length and the escaped payload width
    fn escape(self) -> (u64, u32, u32) {
        match self {
            Profile::Bounded => (0b1111, 4, 32),
            Profile::Unbounded => (0b11110, 5, 64),
        }
    }

    /// Whether a delta-of-delta fits this profile's escape width
    fn fits_escape(self, dod: i64) -> bool {
        match self {
            Profile::Bounded => i32::try_from(dod).is_ok(),
            Profile::Unbounded => true,
        }
    }

    /// Write the end-of-stream marker
    ///
    /// The bounded marker starts with 14 one bits, so a reader still waiting for
    /// the first delta sees the reserved all-ones value and stops as well.
    fn write_end_marker(self, writer: &mut BitWriter) {
        match self {
            Profile::Bounded => {
                writer.write_bits(0b1111, 4);
                writer.write_bits(u32::MAX as u64, 32);
            }
            Profile::Unbounded => writer.write_bits(0b11111, 5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_for_span() {
        assert_eq!(Profile::for_span(600), Profile::Bounded);
        assert_eq!(Profile::for_span(4 * 3600), Profile::Bounded);
        assert_eq!(Profile::for_span(16383), Profile::Bounded);
        assert_eq!(Profile::for_span(16384), Profile::Unbounded);
        assert_eq!(Profile::for_span(24 * 3600), Profile::Unbounded);
        assert_eq!(Profile::for_span(0), Profile::Unbounded);
    }

    #[test]
    fn test_profile_byte_roundtrip() {
        for profile in [Profile::Bounded, Profile::Unbounded] {
            assert_eq!(Profile::from_u8(profile.as_u8()).unwrap(), profile);
        }
        assert!(matches!(Profile::from_u8(9), Err(FluxError::InvalidFormat(_))));
    }

    #[test]
    fn test_dod_classes_fit_payload() {
        for (lo, hi, _, _, bits) in DOD_CLASSES {
            let bias = (1i64 << (bits - 1)) - 1;
            assert_eq!(lo + bias, 0);
            assert!(hi + bias < 1 << bits);
        }
    }
}
