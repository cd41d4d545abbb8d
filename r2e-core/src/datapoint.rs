//! The unit of data flowing through the hub.

use serde::{Deserialize, Serialize};

/// Quality taxonomy for a [`DataPoint`]'s value, carried over from the
/// source system where available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Quality {
    #[default]
    Good,
    Uncertain,
    Bad,
    Stale,
}

/// A single timestamped value, already or not-yet mapped into the
/// namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    /// The wire-level topic/tag the source reported this under.
    pub source_topic: String,
    /// The resolved namespace path, set once the auto-mapper accepts the
    /// point. `None` before mapping.
    pub namespace_path: Option<String>,
    pub value: serde_json::Value,
    pub quality: Quality,
    /// Milliseconds since the Unix epoch, as reported by the source or
    /// stamped at ingestion if the source has none.
    pub timestamp: i64,
    /// Identity of the transport connection that produced this point.
    pub connection_id: String,
    /// Logical system of record, distinct from `connection_id`.
    pub source_system: String,
}

impl DataPoint {
    pub fn new(
        source_topic: impl Into<String>,
        value: serde_json::Value,
        connection_id: impl Into<String>,
        source_system: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            source_topic: source_topic.into(),
            namespace_path: None,
            value,
            quality: Quality::Good,
            timestamp,
            connection_id: connection_id.into(),
            source_system: source_system.into(),
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn mapped_to(mut self, namespace_path: impl Into<String>) -> Self {
        self.namespace_path = Some(namespace_path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_defaults_to_good() {
        let dp = DataPoint::new("plc/tag1", serde_json::json!(42), "conn-1", "plc-line3", 0);
        assert_eq!(dp.quality, Quality::Good);
        assert!(dp.namespace_path.is_none());
    }

    #[test]
    fn mapping_sets_namespace_path() {
        let dp = DataPoint::new("plc/tag1", serde_json::json!(42), "conn-1", "plc-line3", 0)
            .mapped_to("Acme/Plant1/Line3/Tag1");
        assert_eq!(dp.namespace_path.as_deref(), Some("Acme/Plant1/Line3/Tag1"));
    }
}
