//! Read surface for query layers.
//!
//! The wire format is deliberately left to the caller (GraphQL /
//! REST / MCP) rather than fixed here. What lives here are the read-only
//! operations those surfaces consume, as inherent methods on [`crate::Hub`]
//! so a thin HTTP/GraphQL layer can sit directly on top without re-deriving
//! any of this logic.

use std::collections::HashMap;

use r2e_core::hierarchy::HierarchicalPath;
use r2e_core::namespace::NSTreeNode;
use r2e_core::topic::TopicConfiguration;
use r2e_core::DataPoint;
use r2e_data::{aggregate, Aggregation};
use r2e_utils::topic_matches;

use crate::Hub;

/// Aggregate counters returned by [`Hub::system_status`].
#[derive(Debug, Clone, Default)]
pub struct SystemStatus {
    pub total_topics: usize,
    pub active_topics: usize,
    pub assigned_topics: usize,
    pub total_namespaces: usize,
    /// Topic count per `sourceType` — tracked by source type rather than by
    /// live connection instance, since a connection may be shared by many
    /// subscribers.
    pub topics_per_source_type: HashMap<String, usize>,
    pub live_transports: usize,
    pub queue: r2e_executor::Statistics,
}

impl Hub {
    /// `listTopics()`.
    pub fn list_topics(&self) -> Vec<TopicConfiguration> {
        self.topics.all()
    }

    /// `getTopic(name)` — case-insensitive lookup by wire topic.
    pub fn get_topic(&self, name: &str) -> Option<TopicConfiguration> {
        self.topics.by_topic(name)
    }

    /// `topicsByNamespace(prefix)`.
    pub fn topics_by_namespace(&self, prefix: &str) -> Vec<TopicConfiguration> {
        self.topics.by_namespace(prefix)
    }

    /// `searchTopics(pattern)`: MQTT-style glob
    /// matching against the registered wire topic, shared with connection
    /// input/output filters via `r2e_utils::topic_filter`.
    pub fn search_topics(&self, pattern: &str) -> Vec<TopicConfiguration> {
        self.topics
            .all()
            .into_iter()
            .filter(|t| topic_matches(pattern, &t.topic, false))
            .collect()
    }

    /// `topicsBySourceType(type)`.
    pub fn topics_by_source_type(&self, source_type: &str) -> Vec<TopicConfiguration> {
        self.topics.by_source(source_type)
    }

    /// `activeTopics()`: verified topics currently in routine
    /// use, as opposed to `unverifiedOnly()` surfaced for triage.
    pub fn active_topics(&self) -> Vec<TopicConfiguration> {
        self.topics.all().into_iter().filter(|t| t.is_verified).collect()
    }

    pub fn unverified_topics(&self) -> Vec<TopicConfiguration> {
        self.topics.unverified_only()
    }

    /// `getNamespaceStructure()` including empty `NamespaceNode`s.
    pub fn namespace_structure(&self) -> Vec<NSTreeNode> {
        self.namespace.namespace_structure(&self.hierarchy)
    }

    /// `getSystemStatus()`: totals plus per-source-type counts.
    pub fn system_status(&self) -> SystemStatus {
        let topics = self.topics.all();
        let mut topics_per_source_type: HashMap<String, usize> = HashMap::new();
        for t in &topics {
            *topics_per_source_type.entry(t.source_type.clone()).or_insert(0) += 1;
        }
        let assigned_topics = topics.iter().filter(|t| !t.ns_path.is_empty()).count();
        let active_topics = topics.iter().filter(|t| t.is_verified).count();

        SystemStatus {
            total_topics: topics.len(),
            active_topics,
            assigned_topics,
            total_namespaces: self.namespace.all().len(),
            topics_per_source_type,
            live_transports: 0,
            queue: self.queue_statistics(),
        }
    }

    /// Async variant of [`Self::system_status`] that also fills in
    /// `live_transports`, which requires awaiting the connection manager's
    /// lock.
    pub async fn system_status_async(&self) -> SystemStatus {
        let mut status = self.system_status();
        status.live_transports = self.connections.live_transport_count().await;
        status
    }

    /// `getLatestValue(topic)`.
    pub async fn latest_value(&self, topic: &str) -> Option<DataPoint> {
        if let Some(cached) = self.cache_latest.get(topic).await {
            return Some(cached);
        }
        self.realtime.get_latest(topic).await.ok().flatten()
    }

    /// All latest values under a hierarchical path.
    pub async fn latest_values_by_path(&self, path: &HierarchicalPath) -> Vec<DataPoint> {
        self.realtime.get_latest_by_path(path).await.unwrap_or_default()
    }

    /// `getHistory(topic, from, to, [maxPoints, aggregation])`. `max_points` of `0` disables downsampling.
    pub async fn history(
        &self,
        topic: &str,
        from_ms: i64,
        to_ms: i64,
        max_points: usize,
        aggregation: Option<Aggregation>,
    ) -> Vec<DataPoint> {
        let points = self
            .historical
            .get_history(topic, from_ms, to_ms)
            .await
            .unwrap_or_default();
        match aggregation {
            Some(agg) if max_points > 0 => aggregate(&points, agg, max_points),
            _ => points,
        }
    }

    pub async fn history_by_path(
        &self,
        path: &HierarchicalPath,
        from_ms: i64,
        to_ms: i64,
    ) -> Vec<DataPoint> {
        self.historical
            .get_history_by_path(path, from_ms, to_ms)
            .await
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{in_memory, HubConfig};
    use r2e_core::hierarchy::{HierarchyConfiguration, HierarchyNode};
    use r2e_core::HierarchyRegistry;

    fn default_hierarchy() -> HierarchyRegistry {
        let registry = HierarchyRegistry::new();
        registry.register(
            HierarchyConfiguration::new(
                "cfg-1",
                "default",
                vec![HierarchyNode {
                    id: "enterprise".into(),
                    name: "Enterprise".into(),
                    order: 0,
                    required: true,
                    parent_id: None,
                    allowed_child_ids: vec![],
                    allow_topics: true,
                    description: None,
                }],
                true,
            )
            .unwrap(),
        );
        registry
    }

    #[tokio::test]
    async fn system_status_counts_topics_by_source_type() {
        let hub = in_memory(HubConfig::default(), default_hierarchy());
        hub.start().await;
        hub.ingest("mqtt-1", "mqtt", "line1", br#"{"tagA": 1}"#).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let status = hub.system_status();
        assert_eq!(status.total_topics, 1);
        assert_eq!(status.topics_per_source_type.get("mqtt"), Some(&1));
        hub.stop().await;
    }

    #[tokio::test]
    async fn search_topics_matches_glob() {
        let hub = in_memory(HubConfig::default(), default_hierarchy());
        hub.start().await;
        hub.ingest("mqtt-1", "mqtt", "line1", br#"{"tagA": 1}"#).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(hub.search_topics("line1/#").len(), 1);
        assert_eq!(hub.search_topics("other/#").len(), 0);
        hub.stop().await;
    }

    #[tokio::test]
    async fn latest_value_falls_back_to_store_on_cache_miss() {
        let hub = in_memory(HubConfig::default(), default_hierarchy());
        hub.start().await;
        hub.ingest("mqtt-1", "mqtt", "line1", br#"{"tagA": 7}"#).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let latest = hub.latest_value("line1/tagA").await;
        assert!(latest.is_some());
        assert_eq!(latest.unwrap().value, serde_json::json!(7));
        hub.stop().await;
    }
}
