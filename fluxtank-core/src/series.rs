//! Raw series with attached rollups

use crate::cluster::ClusterStatus;
use crate::metric::{AggMetric, MetricConfig};
use crate::pool::BufferPool;
use crate::rollup::{Aggregator, RollupConfig};
use crate::Result;
use std::sync::Arc;
use tracing::debug;

/// One ingested series: its raw chunks plus one aggregator per rollup span
pub struct RawSeries {
    key: String,
    raw: Arc<AggMetric>,
    rollups: Vec<Aggregator>,
}

impl RawSeries {
    pub fn new(
        key: impl Into<String>,
        raw: MetricConfig,
        rollups: &[RollupConfig],
        cluster: Arc<ClusterStatus>,
        pool: Option<Arc<dyn BufferPool>>,
    ) -> Result<Self> {
        let key = key.into();
        let metric = AggMetric::new(key.clone(), raw, cluster.clone(), pool.clone())?;

        let aggregators = rollups
            .iter()
            .map(|config| Aggregator::new(key.clone(), config, cluster.clone(), pool.clone()))
            .collect::<Result<Vec<_>>>()?;

        debug!("Created series {} with {} rollups", key, aggregators.len());
        Ok(Self {
            key,
            raw: Arc::new(metric),
            rollups: aggregators,
        })
    }

    /// Ingest a point
    ///
    /// The point is checked against every rollup before anything is written,
    /// so a rejected point leaves the raw metric and all rollups unchanged.
    pub fn add(&mut self, ts: u32, val: f64) -> Result<()> {
        for agg in &self.rollups {
            agg.check(ts)?;
        }
        self.raw.try_add(ts, val)?;

        for agg in &mut self.rollups {
            agg.add(ts, val)?;
        }
        Ok(())
    }

    /// Flush the open bucket of every rollup; returns how many were committed
    pub fn flush(&mut self) -> usize {
        self.rollups
            .iter_mut()
            .map(|agg| agg.flush())
            .filter(|&committed| committed)
            .count()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Raw chunked metric
    pub fn raw(&self) -> &Arc<AggMetric> {
        &self.raw
    }

    pub fn rollups(&self) -> &[Aggregator] {
        &self.rollups
    }

    /// Aggregator for bucket width `span`, if configured
    pub fn rollup(&self, span: u32) -> Option<&Aggregator> {
        self.rollups.iter().find(|agg| agg.span() == span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollup::Reducer;
    use crate::{FluxError, Point};

    fn series(primary: bool) -> RawSeries {
        let cluster = Arc::new(ClusterStatus::new("default", primary));
        RawSeries::new(
            "cpu.user",
            MetricConfig::new(600, 5),
            &[RollupConfig::new(60, 3600, 2), RollupConfig::new(300, 3600, 2)],
            cluster,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_add_feeds_raw_and_rollups() {
        let mut s = series(true);
        for ts in (10..=610).step_by(10) {
            s.add(ts, 1.0).unwrap();
        }

        assert_eq!(s.raw().get(0, 1000).len(), 61);

        let minute = s.rollup(60).unwrap();
        let counts = minute.sink(Reducer::Count).get(0, 1000);
        assert_eq!(counts.len(), 10);
        assert_eq!(counts[0], Point::new(60, 6.0));
        assert_eq!(minute.current_boundary(), Some(660));

        let five = s.rollup(300).unwrap();
        assert_eq!(
            five.sink(Reducer::Sum).get(0, 1000),
            vec![Point::new(300, 30.0), Point::new(600, 30.0)]
        );
        assert!(s.rollup(3600).is_none());
    }

    #[test]
    fn test_rejected_point_skips_rollups() {
        let mut s = series(true);
        s.add(100, 1.0).unwrap();
        assert!(s.add(100, 2.0).is_err());
        assert!(s.add(50, 2.0).is_err());

        let minute = s.rollup(60).unwrap();
        assert_eq!(minute.open_bucket().map(|b| b.count()), Some(1));
    }

    #[test]
    fn test_flush() {
        let mut s = series(true);
        assert_eq!(s.flush(), 0);

        s.add(100, 7.0).unwrap();
        assert_eq!(s.flush(), 2);
        assert_eq!(s.flush(), 0);

        let minute = s.rollup(60).unwrap();
        assert_eq!(
            minute.sink(Reducer::Last).get(0, 1000),
            vec![Point::new(120, 7.0)]
        );

        // the flushed window is closed and the raw metric is left untouched
        assert!(matches!(
            s.add(110, 8.0),
            Err(FluxError::OrderingViolation { .. })
        ));
        assert_eq!(s.raw().get(0, 1000), vec![Point::new(100, 7.0)]);

        s.add(310, 9.0).unwrap();
        assert_eq!(s.raw().get(0, 1000).len(), 2);
    }

    #[test]
    fn test_invalid_rollup_config() {
        let cluster = Arc::new(ClusterStatus::new("default", true));
        let result = RawSeries::new(
            "cpu.user",
            MetricConfig::default(),
            &[RollupConfig::new(0, 3600, 2)],
            cluster,
            None,
        );
        assert!(matches!(result, Err(FluxError::Config(_))));
    }
}
