//! FluxTank Core - In-Memory Write Path for Time-Series Data
//!
//! Ingests timestamped float samples, compresses them into Gorilla chunks and
//! maintains streaming rollups next to the raw data.
//!
//! # Architecture
//!
//! - **Compression**: delta-of-delta timestamps and XOR values packed into chunks
//! - **Metric**: ring of recent chunks for one series, gated by cluster role
//! - **Rollup**: fixed-width buckets reduced by min/max/sum/count/last/sum-of-squares
//! - **Pool**: reusable byte buffers backing chunk encoders

pub mod cluster;
pub mod compression;
pub mod metric;
pub mod pool;
pub mod rollup;
pub mod series;

mod error;
mod types;

pub use cluster::ClusterStatus;
pub use compression::{Chunk, ChunkIter, Profile};
pub use error::{FluxError, Result};
pub use metric::{AggMetric, MetricConfig};
pub use pool::{BufferPool, PoolConfig, VecPool};
pub use rollup::{Aggregator, Reducer, RollupConfig, Sink};
pub use series::RawSeries;
pub use types::*;

/// FluxTank version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Initial capacity of a chunk buffer (256B)
    pub const CHUNK_BUFFER_CAPACITY: usize = 256;

    /// Maximum idle buffers kept by a pool
    pub const POOL_MAX_BUFFERS: usize = 1024;

    /// Buffers larger than this are not pooled (64KB)
    pub const POOL_MAX_BUFFER_CAPACITY: usize = 64 * 1024;

    /// Raw chunk width (10 minutes)
    pub const DEFAULT_CHUNK_SPAN: u32 = 600;

    /// Raw chunks kept in memory
    pub const DEFAULT_NUM_CHUNKS: u32 = 5;

    /// Rollup bucket width (10 minutes)
    pub const DEFAULT_ROLLUP_SPAN: u32 = 600;

    /// Chunk width of rollup series (6 hours)
    pub const DEFAULT_ROLLUP_CHUNK_SPAN: u32 = 6 * 60 * 60;

    /// Rollup chunks kept in memory
    pub const DEFAULT_ROLLUP_NUM_CHUNKS: u32 = 2;
}
