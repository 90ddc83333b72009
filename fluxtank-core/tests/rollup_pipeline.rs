use fluxtank_core::rollup::Reducer;
use fluxtank_core::{
    BufferPool, Chunk, ClusterStatus, FluxError, MetricConfig, Point, RawSeries, RollupConfig,
    VecPool,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn ingest(series: &mut RawSeries, points: &[Point]) {
    for p in points {
        series.add(p.ts, p.val).unwrap();
    }
}

fn random_points(rng: &mut StdRng, start: u32, count: usize) -> Vec<Point> {
    let mut ts = start;
    (0..count)
        .map(|_| {
            ts += rng.gen_range(1..30);
            Point::new(ts, rng.gen_range(-1000.0..1000.0))
        })
        .collect()
}

#[test]
fn test_rollups_match_raw_data() {
    let mut rng = StdRng::seed_from_u64(42);
    let cluster = Arc::new(ClusterStatus::new("default", true));
    let pool: Arc<dyn BufferPool> = Arc::new(VecPool::default());

    let mut series = RawSeries::new(
        "host.cpu",
        MetricConfig::new(3600, 24),
        &[RollupConfig::new(300, 21600, 4)],
        cluster,
        Some(pool),
    )
    .unwrap();

    let points = random_points(&mut rng, 1_000_000, 2000);
    ingest(&mut series, &points);
    series.flush();

    let from = points[0].ts;
    let to = points[points.len() - 1].ts + 1;
    let raw = series.raw().get(from, to);
    assert_eq!(raw.len(), points.len());
    assert!(raw.iter().zip(&points).all(|(a, b)| a.bit_eq(b)));

    let rollup = series.rollup(300).unwrap();
    let counts = rollup.sink(Reducer::Count).get(0, u32::MAX);
    let sums = rollup.sink(Reducer::Sum).get(0, u32::MAX);
    let maxes = rollup.sink(Reducer::Max).get(0, u32::MAX);
    assert_eq!(counts.len(), sums.len());

    let total: f64 = counts.iter().map(|p| p.val).sum();
    assert_eq!(total as usize, points.len());

    for ((count, sum), max) in counts.iter().zip(&sums).zip(&maxes) {
        assert_eq!(count.ts % 300, 0);
        let bucket: Vec<f64> = points
            .iter()
            .filter(|p| p.ts > count.ts - 300 && p.ts <= count.ts)
            .map(|p| p.val)
            .collect();
        assert_eq!(count.val as usize, bucket.len());
        assert_eq!(sum.val, bucket.iter().sum::<f64>());
        assert_eq!(max.val, bucket.iter().cloned().fold(f64::MIN, f64::max));
    }
}

#[test]
fn test_secondary_only_sees_finished_chunks() {
    let cluster = Arc::new(ClusterStatus::new("default", false));
    let mut series = RawSeries::new(
        "host.mem",
        MetricConfig::new(600, 4),
        &[RollupConfig::new(60, 600, 4)],
        cluster.clone(),
        None,
    )
    .unwrap();

    for ts in (0..900).step_by(15) {
        series.add(ts, ts as f64).unwrap();
    }

    // raw chunk [600, 1200) and rollup chunk [600, 1200) are still open
    let raw = series.raw().get(0, 2000);
    assert_eq!(raw.last().map(|p| p.ts), Some(585));

    let lasts = series.rollup(60).unwrap().sink(Reducer::Last).get(0, 2000);
    assert_eq!(lasts.last().map(|p| p.ts), Some(540));

    cluster.set_primary(true);
    let raw = series.raw().get(0, 2000);
    assert_eq!(raw.last().map(|p| p.ts), Some(885));

    let lasts = series.rollup(60).unwrap().sink(Reducer::Last).get(0, 2000);
    assert_eq!(lasts.last(), Some(&Point::new(840, 840.0)));
}

#[test]
fn test_snapshot_survives_marshal() {
    let mut rng = StdRng::seed_from_u64(7);
    let cluster = Arc::new(ClusterStatus::new("default", true));
    let mut series = RawSeries::new(
        "host.disk",
        MetricConfig::new(86400, 2),
        &[],
        cluster,
        None,
    )
    .unwrap();

    let points = random_points(&mut rng, 86400 * 3, 500);
    ingest(&mut series, &points);

    let mut restored = Vec::new();
    for data in series.raw().snapshot() {
        let chunk = Chunk::unmarshal_binary(&data).unwrap();
        restored.extend(chunk.iter().collect_points().unwrap());
    }
    assert_eq!(restored.len(), points.len());
    assert!(restored.iter().zip(&points).all(|(a, b)| a.bit_eq(b)));

    let mut corrupted = series.raw().snapshot()[0].to_vec();
    let mid = corrupted.len() / 2;
    corrupted[mid] ^= 0x10;
    assert!(matches!(
        Chunk::unmarshal_binary(&corrupted),
        Err(FluxError::ChecksumMismatch { .. })
    ));
}
