//! Forward-only chunk decoding

use super::bitstream::BitReader;
use super::{
    Profile, BOUNDED_FIRST_DELTA_BITS, BOUNDED_FIRST_DELTA_MARKER, DOD_CLASSES,
    UNBOUNDED_INITIAL_DELTA,
};
use crate::{FluxError, Point, Result};

/// Outcome of reading one delta-of-delta code
enum Dod {
    Value(i64),
    EndOfStream,
}

fn unexpected_end() -> FluxError {
    FluxError::DecodeCorruption("unexpected end of chunk".into())
}

/// Forward-only cursor over an encoded chunk
///
/// Each iterator rebuilds the predictive state on its own, so any number of
/// iterators can read the same finished buffer concurrently.
#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    reader: BitReader<'a>,
    profile: Profile,
    t0: u32,
    /// Points left when the count is known; `None` decodes up to the end marker
    remaining: Option<u32>,
    decoded: u32,
    header_read: bool,

    // Timestamp state
    prev_timestamp: u32,
    prev_timestamp_delta: i64,

    // Value state
    prev_value_bits: u64,
    window: Option<(u32, u32)>,

    current: Option<Point>,
    err: Option<FluxError>,
    done: bool,
}

impl<'a> ChunkIter<'a> {
    /// Create an iterator over `data` encoded with `profile` and anchored at `t0`
    ///
    /// With `count` set, decoding stops after that many points, which also makes
    /// buffers of still-open chunks readable. Without it the end marker written by
    /// `finish` terminates the stream.
    pub fn new(profile: Profile, t0: u32, data: &'a [u8], count: Option<u32>) -> Self {
        Self {
            reader: BitReader::new(data),
            profile,
            t0,
            remaining: count,
            decoded: 0,
            header_read: false,
            prev_timestamp: t0,
            prev_timestamp_delta: UNBOUNDED_INITIAL_DELTA,
            prev_value_bits: 0,
            window: None,
            current: None,
            err: None,
            done: false,
        }
    }

    /// Decode the next point; `Ok(None)` at end of stream
    pub fn next_point(&mut self) -> Result<Option<Point>> {
        if self.done {
            return match &self.err {
                Some(err) => Err(err.clone()),
                None => Ok(None),
            };
        }

        match self.step() {
            Ok(Some(point)) => {
                self.decoded += 1;
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                self.current = Some(point);
                Ok(Some(point))
            }
            Ok(None) => {
                self.done = true;
                Ok(None)
            }
            Err(err) => {
                self.done = true;
                self.err = Some(err.clone());
                Err(err)
            }
        }
    }

    /// The most recently decoded point
    pub fn values(&self) -> Option<Point> {
        self.current
    }

    /// Error that stopped iteration, if any
    pub fn err(&self) -> Option<&FluxError> {
        self.err.as_ref()
    }

    /// Decode everything left into a vector
    pub fn collect_points(mut self) -> Result<Vec<Point>> {
        // a point takes at least two bits after the first
        let hint = (self.remaining.unwrap_or(0) as usize).min(self.reader.remaining() / 2 + 1);
        let mut points = Vec::with_capacity(hint);
        while let Some(point) = self.next_point()? {
            points.push(point);
        }
        Ok(points)
    }

    fn step(&mut self) -> Result<Option<Point>> {
        if self.remaining == Some(0) {
            return Ok(None);
        }

        if !self.header_read {
            self.read_header()?;
        }

        let point = if self.decoded == 0 {
            self.decode_first()?
        } else {
            self.decode_next()?
        };

        if point.is_none() {
            if let Some(remaining) = self.remaining {
                return Err(FluxError::DecodeCorruption(format!(
                    "end marker after {} points, {} more expected",
                    self.decoded, remaining
                )));
            }
        }
        Ok(point)
    }

    fn read_header(&mut self) -> Result<()> {
        if self.profile == Profile::Bounded {
            let t0 = self.reader.read_bits(32).ok_or_else(unexpected_end)? as u32;
            if t0 != self.t0 {
                return Err(FluxError::DecodeCorruption(format!(
                    "stream t0 {} does not match chunk t0 {}",
                    t0, self.t0
                )));
            }
        }
        self.header_read = true;
        Ok(())
    }

    fn decode_first(&mut self) -> Result<Option<Point>> {
        let delta = match self.profile {
            Profile::Bounded => {
                let delta = self
                    .reader
                    .read_bits(BOUNDED_FIRST_DELTA_BITS)
                    .ok_or_else(unexpected_end)?;
                if delta == BOUNDED_FIRST_DELTA_MARKER {
                    return Ok(None);
                }
                delta as i64
            }
            Profile::Unbounded => match self.read_dod()? {
                Dod::EndOfStream => return Ok(None),
                Dod::Value(dod) => self.next_delta(dod)?,
            },
        };

        let timestamp = self.apply_delta(delta, 0)?;
        let value_bits = self.reader.read_bits(64).ok_or_else(unexpected_end)?;

        self.prev_timestamp_delta = delta;
        self.prev_timestamp = timestamp;
        self.prev_value_bits = value_bits;

        Ok(Some(Point::new(timestamp, f64::from_bits(value_bits))))
    }

    fn decode_next(&mut self) -> Result<Option<Point>> {
        let delta_of_delta = match self.read_dod()? {
            Dod::EndOfStream => return Ok(None),
            Dod::Value(dod) => dod,
        };

        let delta = self.next_delta(delta_of_delta)?;
        let timestamp = self.apply_delta(delta, 1)?;
        let value = self.decode_value()?;

        self.prev_timestamp_delta = delta;
        self.prev_timestamp = timestamp;

        Ok(Some(Point::new(timestamp, value)))
    }

    fn next_delta(&self, delta_of_delta: i64) -> Result<i64> {
        self.prev_timestamp_delta
            .checked_add(delta_of_delta)
            .ok_or_else(|| {
                FluxError::DecodeCorruption(format!(
                    "delta-of-delta {} overflows previous delta {}",
                    delta_of_delta, self.prev_timestamp_delta
                ))
            })
    }

    /// Advance the previous timestamp by `delta`, which must be at least `min_delta`
    fn apply_delta(&self, delta: i64, min_delta: i64) -> Result<u32> {
        let timestamp = (self.prev_timestamp as i64)
            .checked_add(delta)
            .filter(|_| delta >= min_delta)
            .and_then(|ts| u32::try_from(ts).ok());
        timestamp.ok_or_else(|| {
            FluxError::DecodeCorruption(format!(
                "invalid delta {} after timestamp {}",
                delta, self.prev_timestamp
            ))
        })
    }

    fn read_dod(&mut self) -> Result<Dod> {
        // bounded: '1111' escapes; unbounded: '11110' escapes and '11111' ends
        let (_, prefix_len, escape_bits) = self.profile.escape();
        let mut ones = 0u32;
        while ones < prefix_len {
            if !self.reader.read_bit().ok_or_else(unexpected_end)? {
                break;
            }
            ones += 1;
        }

        match (ones, self.profile) {
            (0, _) => Ok(Dod::Value(0)),
            (1..=3, _) => {
                let (_, _, _, _, bits) = DOD_CLASSES[ones as usize - 1];
                let bias = (1i64 << (bits - 1)) - 1;
                let raw = self.reader.read_bits(bits).ok_or_else(unexpected_end)?;
                Ok(Dod::Value(raw as i64 - bias))
            }
            (4, Profile::Bounded) => {
                let raw = self.reader.read_bits(escape_bits).ok_or_else(unexpected_end)?;
                if raw == u32::MAX as u64 {
                    Ok(Dod::EndOfStream)
                } else {
                    Ok(Dod::Value(raw as u32 as i32 as i64))
                }
            }
            (4, Profile::Unbounded) => {
                let raw = self.reader.read_bits(escape_bits).ok_or_else(unexpected_end)?;
                Ok(Dod::Value(raw as i64))
            }
            _ => Ok(Dod::EndOfStream),
        }
    }

    fn decode_value(&mut self) -> Result<f64> {
        if !self.reader.read_bit().ok_or_else(unexpected_end)? {
            // Same value
            return Ok(f64::from_bits(self.prev_value_bits));
        }

        let new_window = self.reader.read_bit().ok_or_else(unexpected_end)?;

        let (leading_zeros, trailing_zeros) = if new_window {
            let leading = self.reader.read_bits(5).ok_or_else(unexpected_end)? as u32;
            let meaningful = match self.reader.read_bits(6).ok_or_else(unexpected_end)? as u32 {
                0 => 64,
                n => n,
            };
            if leading + meaningful > 64 {
                return Err(FluxError::DecodeCorruption(format!(
                    "xor window of {} leading and {} meaningful bits exceeds 64",
                    leading, meaningful
                )));
            }
            let window = (leading, 64 - leading - meaningful);
            self.window = Some(window);
            window
        } else {
            self.window.ok_or_else(|| {
                FluxError::DecodeCorruption("xor window reused before being defined".into())
            })?
        };

        let meaningful_bits = 64 - leading_zeros - trailing_zeros;
        let meaningful_value = self
            .reader
            .read_bits(meaningful_bits)
            .ok_or_else(unexpected_end)?;

        let value_bits = self.prev_value_bits ^ (meaningful_value << trailing_zeros);
        self.prev_value_bits = value_bits;

        Ok(f64::from_bits(value_bits))
    }
}

impl Iterator for ChunkIter<'_> {
    type Item = Point;

    /// Yields points until end of stream; a decode error also ends iteration
    /// and is kept in [`ChunkIter::err`]
    fn next(&mut self) -> Option<Point> {
        self.next_point().ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::{BitWriter, Chunk};

    #[test]
    fn test_encode_decode_roundtrip() {
        let points: Vec<Point> = (0..100)
            .map(|i| Point::new(1000 + i * 10, 20.0 + i as f64 * 0.5))
            .collect();

        for profile in [Profile::Bounded, Profile::Unbounded] {
            let mut chunk = Chunk::new(profile, 1000);
            for p in &points {
                chunk.push(p.ts, p.val).unwrap();
            }
            chunk.finish();

            let decoded = chunk.iter().collect_points().unwrap();
            assert_eq!(decoded, points, "profile {:?}", profile);
        }
    }

    #[test]
    fn test_decode_until_end_marker() {
        for profile in [Profile::Bounded, Profile::Unbounded] {
            let mut chunk = Chunk::new(profile, 0);
            for i in 1..=50u32 {
                chunk.push(i * 15, 42.0).unwrap();
            }
            chunk.finish();

            let iter = ChunkIter::new(profile, 0, chunk.bytes(), None);
            let decoded: Vec<Point> = iter.collect();
            assert_eq!(decoded.len(), 50);
            assert!(decoded.iter().all(|p| p.val == 42.0));
            assert_eq!(decoded[49].ts, 750);
        }
    }

    #[test]
    fn test_empty_finished_chunk() {
        for profile in [Profile::Bounded, Profile::Unbounded] {
            let mut chunk = Chunk::new(profile, 3600);
            chunk.finish();

            let mut iter = ChunkIter::new(profile, 3600, chunk.bytes(), None);
            assert_eq!(iter.next_point().unwrap(), None);
            assert!(iter.err().is_none());
        }
    }

    #[test]
    fn test_truncated_buffer_is_corruption() {
        let mut chunk = Chunk::new(Profile::Bounded, 0);
        for i in 1..=20u32 {
            chunk.push(i * 10, i as f64 * 1.1).unwrap();
        }
        chunk.finish();

        let truncated = &chunk.bytes()[..chunk.bytes().len() / 2];
        let mut iter = ChunkIter::new(Profile::Bounded, 0, truncated, Some(20));
        let decoded: Vec<Point> = iter.by_ref().collect();
        assert!(decoded.len() < 20);
        assert!(matches!(iter.err(), Some(FluxError::DecodeCorruption(_))));
        // stays failed
        assert!(iter.next_point().is_err());
    }

    #[test]
    fn test_t0_mismatch_is_corruption() {
        let mut chunk = Chunk::new(Profile::Bounded, 600);
        chunk.push(610, 1.0).unwrap();

        let mut iter = ChunkIter::new(Profile::Bounded, 1200, chunk.bytes(), Some(1));
        assert!(matches!(
            iter.next_point(),
            Err(FluxError::DecodeCorruption(_))
        ));
    }

    #[test]
    fn test_escaped_delta_overflow_is_corruption() {
        for dod in [i64::MAX, i64::MIN] {
            let mut writer = BitWriter::new();
            writer.write_bits(0b11110, 5);
            writer.write_bits(dod as u64, 64);
            writer.write_bits(0, 64);

            let mut iter = ChunkIter::new(Profile::Unbounded, 0, writer.bytes(), Some(1));
            assert!(matches!(
                iter.next_point(),
                Err(FluxError::DecodeCorruption(_))
            ));
            assert!(iter.err().is_some());
        }
    }

    #[test]
    fn test_capacity_hint_bounded_by_payload() {
        let mut chunk = Chunk::new(Profile::Bounded, 0);
        chunk.push(10, 1.0).unwrap();
        chunk.finish();

        let iter = ChunkIter::new(Profile::Bounded, 0, chunk.bytes(), Some(u32::MAX));
        assert!(matches!(
            iter.collect_points(),
            Err(FluxError::DecodeCorruption(_))
        ));
    }

    #[test]
    fn test_early_end_marker_is_corruption() {
        let mut chunk = Chunk::new(Profile::Unbounded, 0);
        chunk.push(60, 1.0).unwrap();
        chunk.finish();

        let mut iter = ChunkIter::new(Profile::Unbounded, 0, chunk.bytes(), Some(2));
        assert_eq!(iter.next_point().unwrap(), Some(Point::new(60, 1.0)));
        assert!(iter.next_point().is_err());
        assert_eq!(iter.values(), Some(Point::new(60, 1.0)));
    }
}
