//! Reusable byte buffers for chunk encoding
//!
//! Chunks take their backing buffer from an injected [`BufferPool`] and hand it
//! back when dropped, so steady-state ingestion does not allocate per chunk.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Arena interface the codec layer allocates through
pub trait BufferPool: Send + Sync {
    /// Hand out an empty buffer with at least `min_capacity` bytes of capacity
    fn acquire(&self, min_capacity: usize) -> Vec<u8>;

    /// Return a buffer for reuse
    fn release(&self, buffer: Vec<u8>);
}

/// Buffer pool configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of idle buffers kept
    pub max_buffers: usize,
    /// Buffers that grew beyond this capacity are freed instead of pooled
    pub max_buffer_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_buffers: crate::config::POOL_MAX_BUFFERS,
            max_buffer_capacity: crate::config::POOL_MAX_BUFFER_CAPACITY,
        }
    }
}

/// Pool usage counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub released: u64,
    pub discarded: u64,
    pub idle: usize,
}

/// Free-list backed [`BufferPool`]
#[derive(Debug)]
pub struct VecPool {
    free: Mutex<Vec<Vec<u8>>>,
    config: PoolConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
}

impl VecPool {
    /// Create a pool
    pub fn new(config: PoolConfig) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(config.max_buffers)),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            released: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Snapshot of the usage counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            idle: self.free.lock().len(),
        }
    }
}

impl Default for VecPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl BufferPool for VecPool {
    fn acquire(&self, min_capacity: usize) -> Vec<u8> {
        let recycled = {
            let mut free = self.free.lock();
            let idx = free.iter().rposition(|buf| buf.capacity() >= min_capacity);
            idx.map(|idx| free.swap_remove(idx))
        };

        match recycled {
            Some(mut buffer) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                buffer.clear();
                buffer
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(min_capacity)
            }
        }
    }

    fn release(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() > self.config.max_buffer_capacity {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut free = self.free.lock();
        if free.len() >= self.config.max_buffers {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        buffer.clear();
        free.push(buffer);
        self.released.fetch_add(1, Ordering::Relaxed);
    }
}
