//! Realtime + historical store surfaces consumed by the core.
//!
//! These are read/write contracts, not implementations — `r2e-data-sqlx`
//! provides a SQL-backed `RealtimeStore`/`HistoricalStore` pair, and
//! [`NoopHistoricalStore`] lets historical persistence be switched off
//! globally without touching call sites.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use r2e_core::{DataPoint, HierarchicalPath};

use crate::error::DataError;

/// Aggregation applied to a historical range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Avg,
    Min,
    Max,
    First,
    Last,
}

/// Latest-value store: one row per topic, overwritten on every write.
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    async fn store(&self, point: &DataPoint) -> Result<(), DataError>;
    async fn get_latest(&self, topic: &str) -> Result<Option<DataPoint>, DataError>;
    /// All latest values whose `namespace_path` falls under `path` (
    /// `DataPoint.path.fullPath` is a prefix-equal or descendant of the
    /// owning topic's path).
    async fn get_latest_by_path(&self, path: &HierarchicalPath) -> Result<Vec<DataPoint>, DataError>;
    async fn delete(&self, topic: &str) -> Result<bool, DataError>;
}

/// Time-ranged series store. Full historical persistence is
/// explicitly out of the core crate's scope — this trait is the
/// delegation boundary.
#[async_trait]
pub trait HistoricalStore: Send + Sync {
    async fn store(&self, point: &DataPoint) -> Result<(), DataError>;
    async fn get_history(
        &self,
        topic: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<DataPoint>, DataError>;
    async fn get_history_by_path(
        &self,
        path: &HierarchicalPath,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<DataPoint>, DataError>;
    /// Drop (or move to cold storage) everything older than `before_ms`.
    /// Returns the number of points archived.
    async fn archive(&self, before_ms: i64) -> Result<u64, DataError>;
}

/// No-op historical store.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHistoricalStore;

#[async_trait]
impl HistoricalStore for NoopHistoricalStore {
    async fn store(&self, _point: &DataPoint) -> Result<(), DataError> {
        Ok(())
    }

    async fn get_history(&self, _topic: &str, _from_ms: i64, _to_ms: i64) -> Result<Vec<DataPoint>, DataError> {
        Ok(Vec::new())
    }

    async fn get_history_by_path(
        &self,
        _path: &HierarchicalPath,
        _from_ms: i64,
        _to_ms: i64,
    ) -> Result<Vec<DataPoint>, DataError> {
        Ok(Vec::new())
    }

    async fn archive(&self, _before_ms: i64) -> Result<u64, DataError> {
        Ok(0)
    }
}

/// In-process `RealtimeStore` keyed by wire topic, with no persistence
/// beyond the running process.
#[derive(Default)]
pub struct InMemoryRealtimeStore {
    by_topic: RwLock<HashMap<String, DataPoint>>,
}

#[async_trait]
impl RealtimeStore for InMemoryRealtimeStore {
    async fn store(&self, point: &DataPoint) -> Result<(), DataError> {
        self.by_topic
            .write()
            .unwrap()
            .insert(point.source_topic.clone(), point.clone());
        Ok(())
    }

    async fn get_latest(&self, topic: &str) -> Result<Option<DataPoint>, DataError> {
        Ok(self.by_topic.read().unwrap().get(topic).cloned())
    }

    async fn get_latest_by_path(&self, path: &HierarchicalPath) -> Result<Vec<DataPoint>, DataError> {
        let prefix = path.full_path();
        Ok(self
            .by_topic
            .read()
            .unwrap()
            .values()
            .filter(|p| match &p.namespace_path {
                Some(ns) => ns == &prefix || ns.starts_with(&format!("{prefix}/")),
                None => false,
            })
            .cloned()
            .collect())
    }

    async fn delete(&self, topic: &str) -> Result<bool, DataError> {
        Ok(self.by_topic.write().unwrap().remove(topic).is_some())
    }
}

/// Apply an aggregation function to a historical series, one output point
/// per caller-supplied bucket boundary. `maxPoints` downsampling is
/// expressed as evenly-sized time buckets across `[from, to]`.
pub fn aggregate(points: &[DataPoint], aggregation: Aggregation, max_points: usize) -> Vec<DataPoint> {
    if points.is_empty() || max_points == 0 || points.len() <= max_points {
        return points.to_vec();
    }
    let from = points.first().map(|p| p.timestamp).unwrap_or(0);
    let to = points.last().map(|p| p.timestamp).unwrap_or(0);
    let span = (to - from).max(1);
    let bucket_width = (span / max_points as i64).max(1);

    let mut buckets: Vec<Vec<&DataPoint>> = vec![Vec::new(); max_points];
    for point in points {
        let idx = (((point.timestamp - from) / bucket_width) as usize).min(max_points - 1);
        buckets[idx].push(point);
    }

    buckets
        .into_iter()
        .filter(|bucket| !bucket.is_empty())
        .filter_map(|bucket| aggregate_bucket(&bucket, aggregation))
        .collect()
}

fn aggregate_bucket(bucket: &[&DataPoint], aggregation: Aggregation) -> Option<DataPoint> {
    match aggregation {
        Aggregation::First => bucket.first().map(|p| (*p).clone()),
        Aggregation::Last => bucket.last().map(|p| (*p).clone()),
        Aggregation::Min | Aggregation::Max | Aggregation::Avg => {
            let numeric: Vec<(usize, f64)> = bucket
                .iter()
                .enumerate()
                .filter_map(|(i, p)| p.value.as_f64().map(|v| (i, v)))
                .collect();
            if numeric.is_empty() {
                return bucket.last().map(|p| (*p).clone());
            }
            let representative = bucket.last().expect("bucket is non-empty");
            let value = match aggregation {
                Aggregation::Min => numeric.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min),
                Aggregation::Max => numeric.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max),
                Aggregation::Avg => numeric.iter().map(|(_, v)| *v).sum::<f64>() / numeric.len() as f64,
                Aggregation::First | Aggregation::Last => unreachable!(),
            };
            let mut out = (*representative).clone();
            out.value = serde_json::json!(value);
            Some(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(topic: &str, value: f64, ts: i64) -> DataPoint {
        DataPoint::new(topic, serde_json::json!(value), "conn-1", "test", ts)
    }

    #[test]
    fn aggregate_passthrough_when_under_budget() {
        let points = vec![point("t", 1.0, 0), point("t", 2.0, 1000)];
        let out = aggregate(&points, Aggregation::Avg, 10);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn aggregate_avg_downsamples() {
        let points: Vec<DataPoint> = (0..100).map(|i| point("t", i as f64, i * 100)).collect();
        let out = aggregate(&points, Aggregation::Avg, 10);
        assert!(out.len() <= 10);
        assert!(!out.is_empty());
    }

    #[tokio::test]
    async fn noop_historical_store_always_returns_empty() {
        let store = NoopHistoricalStore;
        let dp = point("t", 1.0, 0);
        store.store(&dp).await.unwrap();
        let history = store.get_history("t", 0, 1000).await.unwrap();
        assert!(history.is_empty());
        assert_eq!(store.archive(0).await.unwrap(), 0);
    }
}
