//! Compressed chunk of one series

use super::bitstream::BitWriter;
use super::decoder::ChunkIter;
use super::encoder::SeriesEncoder;
use super::Profile;
use crate::pool::BufferPool;
use crate::{FluxError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;

const MARSHAL_MAGIC: u8 = b'T';
const MARSHAL_VERSION: u8 = 1;
const FLAG_FINISHED: u8 = 0b01;
const FLAG_HAS_LAST: u8 = 0b10;

/// magic, version, profile, flags, t0, count, last_ts, tail_bits, payload_len
const MARSHAL_HEADER_LEN: usize = 1 + 1 + 1 + 1 + 4 + 4 + 4 + 1 + 4;

/// Compressed, time-ordered run of points anchored at `t0`
///
/// While open the chunk is mutated by its single writer through [`Chunk::push`].
/// After [`Chunk::finish`] it is read-only and can be shared (e.g. in an `Arc`)
/// between any number of iterators.
pub struct Chunk {
    profile: Profile,
    t0: u32,
    count: u32,
    last_ts: Option<u32>,
    finished: bool,
    writer: BitWriter,
    /// Present only while the chunk accepts points
    encoder: Option<SeriesEncoder>,
    pool: Option<Arc<dyn BufferPool>>,
}

impl Chunk {
    /// Open a chunk anchored at `t0`
    pub fn new(profile: Profile, t0: u32) -> Self {
        let writer = BitWriter::with_capacity(crate::config::CHUNK_BUFFER_CAPACITY);
        Self::open(profile, t0, writer, None)
    }

    /// Open a chunk whose buffer comes from, and returns to, `pool`
    pub fn new_in(profile: Profile, t0: u32, pool: Arc<dyn BufferPool>) -> Self {
        let writer = BitWriter::from_buffer(pool.acquire(crate::config::CHUNK_BUFFER_CAPACITY));
        Self::open(profile, t0, writer, Some(pool))
    }

    fn open(
        profile: Profile,
        t0: u32,
        mut writer: BitWriter,
        pool: Option<Arc<dyn BufferPool>>,
    ) -> Self {
        let encoder = SeriesEncoder::start(profile, t0, &mut writer);
        Self {
            profile,
            t0,
            count: 0,
            last_ts: None,
            finished: false,
            writer,
            encoder: Some(encoder),
            pool,
        }
    }

    /// Append a point
    ///
    /// The first timestamp must be `>= t0`, later ones strictly increasing.
    /// On error the chunk keeps its last valid state.
    pub fn push(&mut self, ts: u32, val: f64) -> Result<()> {
        if self.finished {
            return Err(FluxError::EncodingContractViolation(format!(
                "push of ts {} into finished chunk t0 {}",
                ts, self.t0
            )));
        }
        let encoder = self.encoder.as_mut().ok_or_else(|| {
            FluxError::EncodingContractViolation(format!(
                "push of ts {} into read-only chunk t0 {}",
                ts, self.t0
            ))
        })?;

        encoder.encode(&mut self.writer, ts, val)?;
        self.count += 1;
        self.last_ts = Some(ts);
        Ok(())
    }

    /// Write the end-of-stream marker and close the chunk; calling it again is a no-op
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.profile.write_end_marker(&mut self.writer);
        self.finished = true;
        self.encoder = None;
    }

    /// Backing buffer, valid before and after `finish`
    pub fn bytes(&self) -> &[u8] {
        self.writer.bytes()
    }

    /// Iterate over the points pushed so far
    pub fn iter(&self) -> ChunkIter<'_> {
        ChunkIter::new(self.profile, self.t0, self.bytes(), Some(self.count))
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn t0(&self) -> u32 {
        self.t0
    }

    /// Number of points in the chunk
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Timestamp of the last point pushed
    pub fn last_ts(&self) -> Option<u32> {
        self.last_ts
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether `push` can still be called
    pub fn is_writable(&self) -> bool {
        self.encoder.is_some()
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        self.writer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Take the encoded buffer out of the chunk; it is not returned to the pool
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.writer.take_buffer()
    }

    /// Serialize the chunk with its header and a CRC32 checksum
    ///
    /// Format (integers little-endian):
    /// - 1 byte: magic `'T'`
    /// - 1 byte: version
    /// - 1 byte: profile
    /// - 1 byte: flags (finished, has last timestamp)
    /// - 4 bytes: t0
    /// - 4 bytes: point count
    /// - 4 bytes: last timestamp
    /// - 1 byte: bits used in the last payload byte
    /// - 4 bytes: payload length
    /// - N bytes: payload
    /// - 4 bytes: CRC32 checksum of everything above
    pub fn marshal_binary(&self) -> Bytes {
        let payload = self.bytes();
        let mut buf = BytesMut::with_capacity(MARSHAL_HEADER_LEN + payload.len() + 4);

        let mut flags = 0;
        if self.finished {
            flags |= FLAG_FINISHED;
        }
        if self.last_ts.is_some() {
            flags |= FLAG_HAS_LAST;
        }

        buf.put_u8(MARSHAL_MAGIC);
        buf.put_u8(MARSHAL_VERSION);
        buf.put_u8(self.profile.as_u8());
        buf.put_u8(flags);
        buf.put_u32_le(self.t0);
        buf.put_u32_le(self.count);
        buf.put_u32_le(self.last_ts.unwrap_or(0));
        buf.put_u8(self.writer.tail_bits());
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(payload);

        let checksum = crc32fast::hash(&buf);
        buf.put_u32_le(checksum);

        buf.freeze()
    }

    /// Restore a chunk from [`Chunk::marshal_binary`] output
    ///
    /// The encoder's predictive state is not rebuilt: the restored chunk is
    /// read-only, iterators reconstruct what they need while decoding.
    pub fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        if data.len() < MARSHAL_HEADER_LEN + 4 {
            return Err(FluxError::InvalidFormat("Chunk too short".into()));
        }

        let body = &data[..data.len() - 4];
        let mut trailer = &data[data.len() - 4..];
        let expected = trailer.get_u32_le();
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(FluxError::ChecksumMismatch { expected, actual });
        }

        let mut cursor = body;
        if cursor.get_u8() != MARSHAL_MAGIC {
            return Err(FluxError::InvalidFormat("Bad chunk magic".into()));
        }
        let version = cursor.get_u8();
        if version != MARSHAL_VERSION {
            return Err(FluxError::InvalidFormat(format!(
                "Unsupported chunk version: {}",
                version
            )));
        }
        let profile = Profile::from_u8(cursor.get_u8())?;
        let flags = cursor.get_u8();
        let t0 = cursor.get_u32_le();
        let count = cursor.get_u32_le();
        let last_ts = cursor.get_u32_le();
        let tail_bits = cursor.get_u8();
        let payload_len = cursor.get_u32_le() as usize;

        if tail_bits > 7 {
            return Err(FluxError::InvalidFormat(format!(
                "Invalid tail bit count: {}",
                tail_bits
            )));
        }
        if cursor.remaining() != payload_len {
            return Err(FluxError::InvalidFormat(format!(
                "Payload length {} does not match {} remaining bytes",
                payload_len,
                cursor.remaining()
            )));
        }
        // the first point stores its value verbatim, later ones take at least 2 bits
        let min_bits = match count {
            0 => 0,
            n => 64 + 2 * (n as u64 - 1),
        };
        if (payload_len as u64) * 8 < min_bits {
            return Err(FluxError::InvalidFormat(format!(
                "Point count {} does not fit a {} byte payload",
                count, payload_len
            )));
        }

        Ok(Self {
            profile,
            t0,
            count,
            last_ts: (flags & FLAG_HAS_LAST != 0).then_some(last_ts),
            finished: flags & FLAG_FINISHED != 0,
            writer: BitWriter::restore(cursor.to_vec(), tail_bits),
            encoder: None,
            pool: None,
        })
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("profile", &self.profile)
            .field("t0", &self.t0)
            .field("count", &self.count)
            .field("last_ts", &self.last_ts)
            .field("finished", &self.finished)
            .field("bytes", &self.writer.len())
            .finish()
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let buffer = self.writer.take_buffer();
            if buffer.capacity() > 0 {
                pool.release(buffer);
            }
        }
    }
}
