//! Streaming rollups
//!
//! An [`Aggregator`] consumes one strictly increasing raw stream and buckets it
//! into fixed windows of `span` seconds. A window is identified by its closing
//! edge, its *boundary*. A bucket is committed to the six reducer sinks only
//! once a later point proves it closed, so readers never see a partial bucket.
//! Windows that received no points are skipped, never zero-filled.

mod bucket;

pub use bucket::{Bucket, Reducer};

use crate::cluster::ClusterStatus;
use crate::metric::{AggMetric, MetricConfig};
use crate::pool::BufferPool;
use crate::{FluxError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

/// Receiver of committed rollup points
///
/// The sink owns its chunking, persistence and read exposure.
pub trait Sink: Send + Sync {
    fn append(&self, ts: u32, val: f64);
}

impl<T: Sink + ?Sized> Sink for Arc<T> {
    fn append(&self, ts: u32, val: f64) {
        (**self).append(ts, val)
    }
}

/// Closing edge of the window `ts` belongs to
///
/// The smallest multiple of `span` that is `>= ts`; a timestamp exactly on a
/// multiple closes its own window. Saturates at `u32::MAX`.
#[inline]
pub fn boundary(ts: u32, span: u32) -> u32 {
    match ts % span {
        0 => ts,
        rem => ts.saturating_add(span - rem),
    }
}

/// Rollup configuration: bucket width plus sizing of the six sinks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollupConfig {
    /// Bucket width in seconds
    pub span: u32,
    /// Chunk width of the sinks
    pub chunk_span: u32,
    /// Chunks kept in memory per sink
    pub num_chunks: u32,
}

impl RollupConfig {
    /// Create a config
    pub fn new(span: u32, chunk_span: u32, num_chunks: u32) -> Self {
        Self {
            span,
            chunk_span,
            num_chunks,
        }
    }

    /// Sizing of each reducer sink
    pub fn metric_config(&self) -> MetricConfig {
        MetricConfig::new(self.chunk_span, self.num_chunks)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.span == 0 {
            return Err(FluxError::Config("rollup span must be > 0".into()));
        }
        self.metric_config().validate()
    }
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            span: crate::config::DEFAULT_ROLLUP_SPAN,
            chunk_span: crate::config::DEFAULT_ROLLUP_CHUNK_SPAN,
            num_chunks: crate::config::DEFAULT_ROLLUP_NUM_CHUNKS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    /// No point seen yet
    Empty,
    /// Bucket at `boundary` is accumulating
    Open { boundary: u32, bucket: Bucket },
    /// Bucket at `boundary` was committed by `flush`; only later windows may follow
    Flushed { boundary: u32 },
}

/// Per-series rollup state machine feeding six reducer sinks
pub struct Aggregator<S: Sink = Arc<AggMetric>> {
    key: String,
    span: u32,
    state: State,
    sinks: [S; Reducer::COUNT],
}

impl Aggregator<Arc<AggMetric>> {
    /// Create an aggregator writing into six chunked metrics named
    /// `{key}_{reducer}_{span}`
    pub fn new(
        key: impl Into<String>,
        config: &RollupConfig,
        cluster: Arc<ClusterStatus>,
        pool: Option<Arc<dyn BufferPool>>,
    ) -> Result<Self> {
        config.validate()?;
        let key = key.into();
        let metric_config = config.metric_config();

        let mut sinks = Vec::with_capacity(Reducer::COUNT);
        for reducer in Reducer::ALL {
            let name = format!("{}_{}_{}", key, reducer, config.span);
            let metric = AggMetric::new(name, metric_config, cluster.clone(), pool.clone())?;
            sinks.push(Arc::new(metric));
        }
        let sinks: [Arc<AggMetric>; Reducer::COUNT] = sinks
            .try_into()
            .map_err(|_| FluxError::Config("one sink per reducer required".into()))?;

        Self::with_sinks(key, config.span, sinks)
    }
}

impl<S: Sink> Aggregator<S> {
    /// Create an aggregator over caller-provided sinks, indexed by [`Reducer::index`]
    pub fn with_sinks(
        key: impl Into<String>,
        span: u32,
        sinks: [S; Reducer::COUNT],
    ) -> Result<Self> {
        if span == 0 {
            return Err(FluxError::Config("rollup span must be > 0".into()));
        }
        Ok(Self {
            key: key.into(),
            span,
            state: State::Empty,
            sinks,
        })
    }

    /// Check whether `ts` would be accepted by [`Aggregator::add`] without
    /// changing any state
    pub fn check(&self, ts: u32) -> Result<()> {
        let boundary = boundary(ts, self.span);
        match self.state {
            State::Open {
                boundary: current, ..
            } if boundary < current => Err(FluxError::OrderingViolation {
                ts,
                boundary,
                current,
            }),
            State::Flushed { boundary: current } if boundary <= current => {
                Err(FluxError::OrderingViolation {
                    ts,
                    boundary,
                    current,
                })
            }
            _ => Ok(()),
        }
    }

    /// Feed the next raw point
    ///
    /// Returns [`FluxError::OrderingViolation`] if `ts` maps to a window before
    /// the current one (or to an already flushed window); state is unchanged then.
    pub fn add(&mut self, ts: u32, val: f64) -> Result<()> {
        self.check(ts)?;
        let boundary = boundary(ts, self.span);

        match self.state {
            State::Open {
                boundary: current,
                ref mut bucket,
            } if boundary == current => {
                bucket.add(val);
                return Ok(());
            }
            State::Open {
                boundary: current,
                bucket,
            } => {
                // timestamps only increase, so the current window is complete
                self.commit(current, &bucket);
            }
            State::Empty | State::Flushed { .. } => {}
        }

        self.state = State::Open {
            boundary,
            bucket: Bucket::new(val),
        };
        Ok(())
    }

    /// Commit the open bucket even though its window may not be complete
    ///
    /// Meant for shutdown. Afterwards points falling into the flushed window are
    /// rejected so that it is never committed twice. Returns whether a bucket was
    /// committed.
    pub fn flush(&mut self) -> bool {
        match self.state {
            State::Open { boundary, bucket } => {
                self.commit(boundary, &bucket);
                self.state = State::Flushed { boundary };
                debug!(
                    "Flushed partial bucket {} of {} ({} points)",
                    boundary,
                    self.key,
                    bucket.count()
                );
                true
            }
            State::Empty | State::Flushed { .. } => false,
        }
    }

    fn commit(&self, boundary: u32, bucket: &Bucket) {
        trace!("Committing bucket {} of {}", boundary, self.key);
        for reducer in Reducer::ALL {
            self.sinks[reducer.index()].append(boundary, bucket.value(reducer));
        }
    }

    /// Series key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Bucket width in seconds
    pub fn span(&self) -> u32 {
        self.span
    }

    /// Boundary of the bucket currently accumulating
    pub fn current_boundary(&self) -> Option<u32> {
        match self.state {
            State::Open { boundary, .. } => Some(boundary),
            State::Empty | State::Flushed { .. } => None,
        }
    }

    /// Accumulators of the open bucket
    pub fn open_bucket(&self) -> Option<&Bucket> {
        match &self.state {
            State::Open { bucket, .. } => Some(bucket),
            State::Empty | State::Flushed { .. } => None,
        }
    }

    /// Sink receiving `reducer`'s output
    pub fn sink(&self, reducer: Reducer) -> &S {
        &self.sinks[reducer.index()]
    }
}
