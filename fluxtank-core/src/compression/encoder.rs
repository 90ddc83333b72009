//! Rolling encoder state for an open chunk

use super::bitstream::BitWriter;
use super::{Profile, BOUNDED_FIRST_DELTA_BITS, DOD_CLASSES, UNBOUNDED_INITIAL_DELTA};
use crate::{FluxError, Result};

/// Predictive state needed to encode the next point of an open chunk
#[derive(Debug, Clone)]
pub(crate) struct SeriesEncoder {
    profile: Profile,
    started: bool,

    // Timestamp state
    prev_timestamp: u32,
    prev_timestamp_delta: i64,

    // Value state
    prev_value_bits: u64,
    /// (leading zeros, trailing zeros) of the last explicitly written XOR window
    window: Option<(u32, u32)>,
}

impl SeriesEncoder {
    /// Create encoder state anchored at `t0`, writing the stream header
    pub fn start(profile: Profile, t0: u32, writer: &mut BitWriter) -> Self {
        if profile == Profile::Bounded {
            writer.write_bits(t0 as u64, 32);
        }
        Self {
            profile,
            started: false,
            prev_timestamp: t0,
            prev_timestamp_delta: UNBOUNDED_INITIAL_DELTA,
            prev_value_bits: 0,
            window: None,
        }
    }

    /// Encode a timestamp-value pair
    ///
    /// Every check happens before the first bit is written, so a rejected
    /// point leaves both the stream and the predictive state untouched.
    pub fn encode(&mut self, writer: &mut BitWriter, timestamp: u32, value: f64) -> Result<()> {
        let delta = timestamp as i64 - self.prev_timestamp as i64;

        if !self.started {
            if delta < 0 {
                return Err(FluxError::EncodingContractViolation(format!(
                    "timestamp {} precedes chunk t0 {}",
                    timestamp, self.prev_timestamp
                )));
            }
            return self.encode_first(writer, timestamp, delta, value);
        }

        if delta <= 0 {
            return Err(FluxError::EncodingContractViolation(format!(
                "timestamp {} not after previous timestamp {}",
                timestamp, self.prev_timestamp
            )));
        }

        let delta_of_delta = delta - self.prev_timestamp_delta;
        self.check_dod(delta_of_delta)?;
        self.write_dod(writer, delta_of_delta);
        self.encode_value(writer, value);

        self.prev_timestamp_delta = delta;
        self.prev_timestamp = timestamp;
        Ok(())
    }

    fn encode_first(
        &mut self,
        writer: &mut BitWriter,
        timestamp: u32,
        delta: i64,
        value: f64,
    ) -> Result<()> {
        match self.profile {
            Profile::Bounded => {
                let max = Profile::Bounded.max_first_delta() as i64;
                if delta > max {
                    return Err(FluxError::EncodingContractViolation(format!(
                        "first delta {} exceeds bounded profile maximum {}",
                        delta, max
                    )));
                }
                writer.write_bits(delta as u64, BOUNDED_FIRST_DELTA_BITS);
            }
            Profile::Unbounded => {
                // the assumed starting delta bootstraps delta-of-delta coding
                let delta_of_delta = delta - self.prev_timestamp_delta;
                self.write_dod(writer, delta_of_delta);
            }
        }

        // First value is stored verbatim
        let value_bits = value.to_bits();
        writer.write_bits(value_bits, 64);

        self.prev_value_bits = value_bits;
        self.prev_timestamp_delta = delta;
        self.prev_timestamp = timestamp;
        self.started = true;
        Ok(())
    }

    fn check_dod(&self, delta_of_delta: i64) -> Result<()> {
        let in_class = delta_of_delta == 0
            || DOD_CLASSES
                .iter()
                .any(|&(lo, hi, ..)| delta_of_delta >= lo && delta_of_delta <= hi);
        if in_class || self.profile.fits_escape(delta_of_delta) {
            Ok(())
        } else {
            Err(FluxError::EncodingContractViolation(format!(
                "delta-of-delta {} overflows {:?} profile",
                delta_of_delta, self.profile
            )))
        }
    }

    fn write_dod(&self, writer: &mut BitWriter, delta_of_delta: i64) {
        // Regular intervals make delta-of-delta 0 most of the time
        if delta_of_delta == 0 {
            writer.write_bit(false);
            return;
        }

        for &(lo, hi, prefix, prefix_len, bits) in DOD_CLASSES.iter() {
            if delta_of_delta >= lo && delta_of_delta <= hi {
                let bias = (1i64 << (bits - 1)) - 1;
                writer.write_bits(prefix, prefix_len);
                writer.write_bits((delta_of_delta + bias) as u64, bits);
                return;
            }
        }

        let (prefix, prefix_len, bits) = self.profile.escape();
        writer.write_bits(prefix, prefix_len);
        match bits {
            32 => writer.write_bits(delta_of_delta as i32 as u32 as u64, 32),
            _ => writer.write_bits(delta_of_delta as u64, 64),
        }
    }

    fn encode_value(&mut self, writer: &mut BitWriter, value: f64) {
        let value_bits = value.to_bits();
        let xor = value_bits ^ self.prev_value_bits;

        if xor == 0 {
            writer.write_bit(false);
        } else {
            writer.write_bit(true);

            // 5-bit field
            let leading_zeros = xor.leading_zeros().min(31);
            let trailing_zeros = xor.trailing_zeros();

            match self.window {
                Some((prev_leading, prev_trailing))
                    if leading_zeros >= prev_leading && trailing_zeros >= prev_trailing =>
                {
                    writer.write_bit(false);
                    let meaningful_bits = 64 - prev_leading - prev_trailing;
                    writer.write_bits(xor >> prev_trailing, meaningful_bits);
                }
                _ => {
                    writer.write_bit(true);
                    let meaningful_bits = 64 - leading_zeros - trailing_zeros;
                    writer.write_bits(leading_zeros as u64, 5);
                    // 6-bit field, 64 wraps to 0
                    writer.write_bits((meaningful_bits % 64) as u64, 6);
                    writer.write_bits(xor >> trailing_zeros, meaningful_bits);
                    self.window = Some((leading_zeros, trailing_zeros));
                }
            }
        }

        self.prev_value_bits = value_bits;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_all(profile: Profile, t0: u32, points: &[(u32, f64)]) -> BitWriter {
        let mut writer = BitWriter::new();
        let mut encoder = SeriesEncoder::start(profile, t0, &mut writer);
        for &(ts, val) in points {
            encoder.encode(&mut writer, ts, val).unwrap();
        }
        writer
    }

    #[test]
    fn test_bounded_header_and_first_point() {
        let writer = encode_all(Profile::Bounded, 1000, &[(1010, 1.0)]);
        // 32 bit t0 + 14 bit delta + 64 bit value
        assert_eq!(writer.bit_len(), 32 + 14 + 64);
    }

    #[test]
    fn test_unbounded_first_point_at_assumed_delta() {
        let writer = encode_all(Profile::Unbounded, 1000, &[(1060, 1.0)]);
        // '0' dod + 64 bit value, no header
        assert_eq!(writer.bit_len(), 1 + 64);
    }

    #[test]
    fn test_constant_series_costs_two_bits_per_point() {
        let points: Vec<(u32, f64)> = (0..100).map(|i| (1000 + i * 10, 23.5)).collect();
        let writer = encode_all(Profile::Bounded, 1000, &points);
        // first point: header + delta + value, second: '10'+7 for the first dod + '0'
        let fixed = 32 + 14 + 64 + 9 + 1;
        assert_eq!(writer.bit_len(), fixed + 98 * 2);
    }

    #[test]
    fn test_rejected_point_leaves_state() {
        let mut writer = BitWriter::new();
        let mut encoder = SeriesEncoder::start(Profile::Bounded, 0, &mut writer);
        encoder.encode(&mut writer, 10, 1.0).unwrap();
        let bits = writer.bit_len();

        assert!(encoder.encode(&mut writer, 10, 2.0).is_err());
        assert!(encoder.encode(&mut writer, 5, 2.0).is_err());
        assert_eq!(writer.bit_len(), bits);

        encoder.encode(&mut writer, 20, 2.0).unwrap();
        assert!(writer.bit_len() > bits);
    }

    #[test]
    fn test_bounded_first_delta_limit() {
        let mut writer = BitWriter::new();
        let mut encoder = SeriesEncoder::start(Profile::Bounded, 0, &mut writer);
        let err = encoder.encode(&mut writer, 16383, 1.0).unwrap_err();
        assert!(matches!(err, FluxError::EncodingContractViolation(_)));
        encoder.encode(&mut writer, 16382, 1.0).unwrap();
    }

    #[test]
    fn test_bounded_escape_overflow() {
        let mut writer = BitWriter::new();
        let mut encoder = SeriesEncoder::start(Profile::Bounded, 0, &mut writer);
        encoder.encode(&mut writer, 1, 1.0).unwrap();
        encoder.encode(&mut writer, 2, 1.0).unwrap();
        // delta jumps from 1 to ~4e9: dod beyond i32
        let err = encoder.encode(&mut writer, u32::MAX, 1.0).unwrap_err();
        assert!(matches!(err, FluxError::EncodingContractViolation(_)));

        let mut writer = BitWriter::new();
        let mut encoder = SeriesEncoder::start(Profile::Unbounded, 0, &mut writer);
        encoder.encode(&mut writer, 1, 1.0).unwrap();
        encoder.encode(&mut writer, 2, 1.0).unwrap();
        encoder.encode(&mut writer, u32::MAX, 1.0).unwrap();
    }
}
