//! In-memory chunked series
//!
//! An [`AggMetric`] keeps the most recent `num_chunks` chunks of one series,
//! each covering `chunk_span` seconds. It serves raw series directly and is the
//! sink behind every rollup reducer.

use crate::cluster::ClusterStatus;
use crate::compression::{Chunk, Profile};
use crate::pool::BufferPool;
use crate::rollup::Sink;
use crate::{FluxError, Point, Result, TimeRange};
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Chunk sizing of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    /// Width of one chunk in seconds
    pub chunk_span: u32,
    /// Number of chunks kept in memory
    pub num_chunks: u32,
}

impl MetricConfig {
    /// Create a config
    pub fn new(chunk_span: u32, num_chunks: u32) -> Self {
        Self {
            chunk_span,
            num_chunks,
        }
    }

    /// Header profile used for this metric's chunks
    pub fn profile(&self) -> Profile {
        Profile::for_span(self.chunk_span)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk_span == 0 {
            return Err(FluxError::Config("chunk span must be > 0".into()));
        }
        if self.num_chunks == 0 {
            return Err(FluxError::Config("number of chunks must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            chunk_span: crate::config::DEFAULT_CHUNK_SPAN,
            num_chunks: crate::config::DEFAULT_NUM_CHUNKS,
        }
    }
}

/// Ring of chunks; `current` is the newest, still-open one
struct Ring {
    chunks: Vec<Chunk>,
    current: usize,
}

impl Ring {
    /// Chunks from oldest to newest
    fn iter_oldest_first(&self) -> impl Iterator<Item = &Chunk> {
        let n = self.chunks.len();
        (0..n).map(move |i| &self.chunks[(self.current + 1 + i) % n])
    }
}

/// Chunked in-memory series
pub struct AggMetric {
    key: String,
    config: MetricConfig,
    profile: Profile,
    cluster: Arc<ClusterStatus>,
    pool: Option<Arc<dyn BufferPool>>,
    ring: RwLock<Ring>,
}

impl AggMetric {
    /// Create an empty metric
    pub fn new(
        key: impl Into<String>,
        config: MetricConfig,
        cluster: Arc<ClusterStatus>,
        pool: Option<Arc<dyn BufferPool>>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            key: key.into(),
            profile: config.profile(),
            config,
            cluster,
            pool,
            ring: RwLock::new(Ring {
                chunks: Vec::with_capacity(config.num_chunks as usize),
                current: 0,
            }),
        })
    }

    /// Series key
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> MetricConfig {
        self.config
    }

    /// Add a point, rotating to a new chunk when `ts` leaves the current window
    ///
    /// Points older than the current chunk or not after the last point are
    /// rejected and leave the metric unchanged.
    pub fn try_add(&self, ts: u32, val: f64) -> Result<()> {
        let t0 = ts - ts % self.config.chunk_span;
        let mut ring = self.ring.write();

        if ring.chunks.is_empty() {
            let chunk = self.open_chunk(t0, ts, val)?;
            ring.chunks.push(chunk);
            ring.current = 0;
            return Ok(());
        }

        let current = ring.current;
        let current_t0 = ring.chunks[current].t0();

        if t0 == current_t0 {
            return ring.chunks[current].push(ts, val);
        }
        if t0 < current_t0 {
            return Err(FluxError::EncodingContractViolation(format!(
                "ts {} is older than current chunk t0 {}",
                ts, current_t0
            )));
        }

        let chunk = self.open_chunk(t0, ts, val)?;
        ring.chunks[current].finish();
        debug!(
            "{}: finished chunk t0 {} with {} points",
            self.key,
            current_t0,
            ring.chunks[current].count()
        );

        if ring.chunks.len() < self.config.num_chunks as usize {
            ring.chunks.push(chunk);
            ring.current = ring.chunks.len() - 1;
        } else {
            // the oldest chunk is evicted and its buffer goes back to the pool
            let next = (current + 1) % ring.chunks.len();
            ring.chunks[next] = chunk;
            ring.current = next;
        }
        Ok(())
    }

    fn open_chunk(&self, t0: u32, ts: u32, val: f64) -> Result<Chunk> {
        let mut chunk = match &self.pool {
            Some(pool) => Chunk::new_in(self.profile, t0, pool.clone()),
            None => Chunk::new(self.profile, t0),
        };
        chunk.push(ts, val)?;
        Ok(chunk)
    }

    /// Points in `[from, to)`, oldest first
    ///
    /// Unless this node is primary, the still-open chunk is hidden and only
    /// finished chunks are returned. A chunk that fails to decode is skipped.
    pub fn get(&self, from: u32, to: u32) -> Vec<Point> {
        let range = TimeRange::new(from, to);
        let show_open = self.cluster.is_primary();
        let ring = self.ring.read();

        let mut points = Vec::new();
        for chunk in ring.iter_oldest_first() {
            if !chunk.is_finished() && !show_open {
                continue;
            }
            if !range.overlaps_window(chunk.t0(), self.config.chunk_span) {
                continue;
            }
            match chunk.iter().collect_points() {
                Ok(decoded) => points.extend(decoded.into_iter().filter(|p| range.contains(p.ts))),
                Err(e) => warn!("{}: skipping chunk t0 {}: {}", self.key, chunk.t0(), e),
            }
        }
        points
    }

    /// Marshaled copies of all chunks, oldest first
    pub fn snapshot(&self) -> Vec<Bytes> {
        let ring = self.ring.read();
        ring.iter_oldest_first().map(Chunk::marshal_binary).collect()
    }

    /// Number of chunks held
    pub fn chunk_count(&self) -> usize {
        self.ring.read().chunks.len()
    }

    /// Start of the oldest chunk held
    pub fn oldest_t0(&self) -> Option<u32> {
        self.ring.read().iter_oldest_first().next().map(Chunk::t0)
    }
}

impl Sink for AggMetric {
    fn append(&self, ts: u32, val: f64) {
        if let Err(e) = self.try_add(ts, val) {
            warn!("{}: dropping point ({}, {}): {}", self.key, ts, val, e);
        }
    }
}

impl fmt::Debug for AggMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggMetric")
            .field("key", &self.key)
            .field("config", &self.config)
            .field("profile", &self.profile)
            .field("chunks", &self.chunk_count())
            .finish()
    }
}
