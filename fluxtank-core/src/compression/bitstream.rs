//! Bit-level I/O for chunk compression

/// Bit writer for encoding compressed data
///
/// The partially filled trailing byte lives inside the buffer, so `bytes()` is
/// always a complete, zero-padded view of everything written so far.
#[derive(Debug)]
pub struct BitWriter {
    buffer: Vec<u8>,
    /// Bits used in the last byte; 0 means the next bit starts a new byte
    used: u8,
}

impl BitWriter {
    /// Create a new BitWriter
    pub fn new() -> Self {
        Self::from_buffer(Vec::new())
    }

    /// Create with capacity hint
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_buffer(Vec::with_capacity(capacity))
    }

    /// Create on top of a recycled buffer, discarding its contents
    pub fn from_buffer(mut buffer: Vec<u8>) -> Self {
        buffer.clear();
        Self { buffer, used: 0 }
    }

    /// Restore a writer positioned after `tail_bits` bits of the last byte
    pub fn restore(buffer: Vec<u8>, tail_bits: u8) -> Self {
        Self {
            buffer,
            used: tail_bits % 8,
        }
    }

    /// Write a single bit
    #[inline]
    pub fn write_bit(&mut self, bit: bool) {
        if self.used == 0 {
            self.buffer.push(0);
        }
        if bit {
            let last = self.buffer.len() - 1;
            self.buffer[last] |= 1 << (7 - self.used);
        }
        self.used = (self.used + 1) % 8;
    }

    /// Write the low `num_bits` bits of `value`, most significant first
    #[inline]
    pub fn write_bits(&mut self, value: u64, num_bits: u32) {
        debug_assert!(num_bits <= 64);

        let mut remaining = num_bits;
        while remaining > 0 {
            if self.used == 0 {
                self.buffer.push(0);
            }
            let free = 8 - self.used as u32;
            let take = free.min(remaining);
            let shift = remaining - take;
            let chunk = ((value >> shift) & ((1u64 << take) - 1)) as u8;

            let last = self.buffer.len() - 1;
            self.buffer[last] |= chunk << (free - take);
            self.used = ((self.used as u32 + take) % 8) as u8;
            remaining -= take;
        }
    }

    /// Written bytes, trailing byte zero-padded
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Bits used in the trailing byte (0 when byte aligned)
    pub fn tail_bits(&self) -> u8 {
        self.used
    }

    /// Total number of bits written
    pub fn bit_len(&self) -> usize {
        match self.used {
            0 => self.buffer.len() * 8,
            used => (self.buffer.len() - 1) * 8 + used as usize,
        }
    }

    /// Give the backing buffer back, e.g. to return it to a pool
    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    /// Take the backing buffer, leaving an empty writer behind
    pub fn take_buffer(&mut self) -> Vec<u8> {
        self.used = 0;
        std::mem::take(&mut self.buffer)
    }

    /// Get current size in bytes
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Bit reader for decoding compressed data
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_position: usize,
    bit_position: u8,
}

impl<'a> BitReader<'a> {
    /// Create a new BitReader
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_position: 0,
            bit_position: 0,
        }
    }

    /// Read a single bit
    #[inline]
    pub fn read_bit(&mut self) -> Option<bool> {
        if self.byte_position >= self.data.len() {
            return None;
        }

        let bit = (self.data[self.byte_position] >> (7 - self.bit_position)) & 1 == 1;
        self.bit_position += 1;

        if self.bit_position == 8 {
            self.byte_position += 1;
            self.bit_position = 0;
        }

        Some(bit)
    }

    /// Read multiple bits as a u64; `None` if fewer than `num_bits` remain
    #[inline]
    pub fn read_bits(&mut self, num_bits: u32) -> Option<u64> {
        debug_assert!(num_bits <= 64);

        if self.remaining() < num_bits as usize {
            return None;
        }

        let mut value = 0u64;
        let mut remaining = num_bits;
        while remaining > 0 {
            let avail = 8 - self.bit_position as u32;
            let take = avail.min(remaining);
            let byte = self.data[self.byte_position];
            let chunk = (byte >> (avail - take)) & (((1u16 << take) - 1) as u8);

            value = (value << take) | chunk as u64;
            self.bit_position += take as u8;
            if self.bit_position == 8 {
                self.byte_position += 1;
                self.bit_position = 0;
            }
            remaining -= take;
        }
        Some(value)
    }

    /// Number of unread bits, padding included
    pub fn remaining(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.position())
    }

    /// Check if there are more bits to read
    pub fn has_more(&self) -> bool {
        self.byte_position < self.data.len()
    }

    /// Get the current position in bits
    pub fn position(&self) -> usize {
        self.byte_position * 8 + self.bit_position as usize
    }
}
