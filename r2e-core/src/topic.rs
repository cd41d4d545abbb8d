//! Registered topic bindings and their repository.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use r2e_events::EventBus;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::events::{TopicAddedEvent, TopicConfigurationUpdatedEvent, TopicRemovedEvent};
use crate::hierarchy::HierarchicalPath;

/// A registered topic binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfiguration {
    pub id: String,
    /// The wire-level name the source reported.
    pub topic: String,
    /// The leaf name under `ns_path` (e.g. the final segment).
    pub uns_name: String,
    pub path: HierarchicalPath,
    /// `/`-joined navigation path through hierarchy nodes + namespaces.
    pub ns_path: String,
    pub source_type: String,
    pub is_verified: bool,
    pub created_at: i64,
    pub modified_at: i64,
    pub metadata: HashMap<String, Value>,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl TopicConfiguration {
    pub fn new(
        id: impl Into<String>,
        topic: impl Into<String>,
        uns_name: impl Into<String>,
        path: HierarchicalPath,
        ns_path: impl Into<String>,
        source_type: impl Into<String>,
        is_verified: bool,
    ) -> Self {
        let ts = now_millis();
        Self {
            id: id.into(),
            topic: topic.into(),
            uns_name: uns_name.into(),
            path,
            ns_path: ns_path.into(),
            source_type: source_type.into(),
            is_verified,
            created_at: ts,
            modified_at: ts,
            metadata: HashMap::new(),
        }
    }
}

/// Registry of known topics, bound to a hierarchical path and an NS-path
///. One active `TopicConfiguration` per `(topic, source_type)`.
pub struct TopicConfigurationRepository {
    by_id: RwLock<HashMap<String, TopicConfiguration>>,
    bus: EventBus,
}

impl TopicConfigurationRepository {
    pub fn new(bus: EventBus) -> Self {
        Self {
            by_id: RwLock::new(HashMap::new()),
            bus,
        }
    }

    fn key(topic: &str, source_type: &str) -> String {
        format!("{}\u{0}{}", topic.to_lowercase(), source_type)
    }

    /// Insert or replace the binding for `(topic, source_type)`, emitting
    /// `TopicAddedEvent` for a new topic or `TopicConfigurationUpdatedEvent`
    /// for a replaced one.
    pub async fn upsert(&self, config: TopicConfiguration) -> Result<TopicConfiguration, AppError> {
        let key = Self::key(&config.topic, &config.source_type);
        let existing_id = {
            let map = self.by_id.read().unwrap();
            map.values()
                .find(|c| Self::key(&c.topic, &c.source_type) == key)
                .map(|c| c.id.clone())
        };

        let mut config = config;
        config.modified_at = now_millis();
        let is_update = existing_id.is_some();
        if let Some(id) = &existing_id {
            config.id = id.clone();
        }

        self.by_id
            .write()
            .unwrap()
            .insert(config.id.clone(), config.clone());

        if is_update {
            self.bus
                .emit(TopicConfigurationUpdatedEvent {
                    topic: config.clone(),
                })
                .await;
        } else {
            self.bus
                .emit(TopicAddedEvent {
                    topic: config.clone(),
                })
                .await;
        }
        Ok(config)
    }

    pub fn by_id(&self, id: &str) -> Option<TopicConfiguration> {
        self.by_id.read().unwrap().get(id).cloned()
    }

    /// Case-insensitive lookup by wire topic, across all source types;
    /// callers that care about a specific source type should filter the
    /// result or use [`Self::by_topic_and_source`].
    pub fn by_topic(&self, topic: &str) -> Option<TopicConfiguration> {
        let topic_lower = topic.to_lowercase();
        self.by_id
            .read()
            .unwrap()
            .values()
            .find(|c| c.topic.to_lowercase() == topic_lower)
            .cloned()
    }

    pub fn by_topic_and_source(&self, topic: &str, source_type: &str) -> Option<TopicConfiguration> {
        let key = Self::key(topic, source_type);
        self.by_id
            .read()
            .unwrap()
            .values()
            .find(|c| Self::key(&c.topic, &c.source_type) == key)
            .cloned()
    }

    pub fn by_namespace(&self, prefix: &str) -> Vec<TopicConfiguration> {
        self.by_id
            .read()
            .unwrap()
            .values()
            .filter(|c| c.ns_path == prefix || c.ns_path.starts_with(&format!("{prefix}/")))
            .cloned()
            .collect()
    }

    pub fn by_source(&self, source_type: &str) -> Vec<TopicConfiguration> {
        self.by_id
            .read()
            .unwrap()
            .values()
            .filter(|c| c.source_type == source_type)
            .cloned()
            .collect()
    }

    pub fn unverified_only(&self) -> Vec<TopicConfiguration> {
        self.by_id
            .read()
            .unwrap()
            .values()
            .filter(|c| !c.is_verified)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<TopicConfiguration> {
        self.by_id.read().unwrap().values().cloned().collect()
    }

    /// Every registered path, for hierarchy-activation re-validation.
    pub fn all_paths(&self) -> Vec<HierarchicalPath> {
        self.by_id
            .read()
            .unwrap()
            .values()
            .map(|c| c.path.clone())
            .collect()
    }

    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.by_id.write().unwrap().remove(id);
        if let Some(config) = removed {
            self.bus
                .emit(TopicRemovedEvent {
                    topic: config.topic.clone(),
                })
                .await;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::HierarchicalPath;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn path() -> HierarchicalPath {
        HierarchicalPath::new(vec![("Enterprise".into(), "Acme".into())])
    }

    #[tokio::test]
    async fn upsert_new_topic_emits_added() {
        let bus = EventBus::new();
        let added = Arc::new(AtomicUsize::new(0));
        let a = added.clone();
        bus.subscribe("test-topic-added", move |_: Arc<TopicAddedEvent>| {
            let a = a.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;
        let repo = TopicConfigurationRepository::new(bus);
        repo.upsert(TopicConfiguration::new(
            "t1", "plc/tag1", "Tag1", path(), "Acme/Tag1", "mqtt", false,
        ))
        .await
        .unwrap();
        tokio::task::yield_now().await;
        // emit() spawns, give it a beat to run.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(added.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn upsert_existing_topic_emits_updated_not_added() {
        let bus = EventBus::new();
        let repo = TopicConfigurationRepository::new(bus);
        repo.upsert(TopicConfiguration::new(
            "t1", "plc/tag1", "Tag1", path(), "Acme/Tag1", "mqtt", false,
        ))
        .await
        .unwrap();
        let updated = repo
            .upsert(TopicConfiguration::new(
                "t2", "PLC/Tag1", "Tag1", path(), "Acme/Tag1", "mqtt", true,
            ))
            .await
            .unwrap();
        // Same (topic, source_type) case-insensitively -> same id, verified flips.
        assert_eq!(repo.all().len(), 1);
        assert!(updated.is_verified);
    }

    #[test]
    fn by_namespace_matches_prefix() {
        let bus = EventBus::new();
        let repo = TopicConfigurationRepository::new(bus);
        let cfg = TopicConfiguration::new(
            "t1", "plc/tag1", "Tag1", path(), "Acme/Plant1/Tag1", "mqtt", false,
        );
        repo.by_id.write().unwrap().insert(cfg.id.clone(), cfg);
        assert_eq!(repo.by_namespace("Acme/Plant1").len(), 1);
        assert_eq!(repo.by_namespace("Acme/Plant2").len(), 0);
    }

    #[test]
    fn unverified_only_filters() {
        let bus = EventBus::new();
        let repo = TopicConfigurationRepository::new(bus);
        let mut verified = TopicConfiguration::new(
            "t1", "a", "a", path(), "Acme/a", "mqtt", true,
        );
        verified.id = "t1".into();
        let unverified = TopicConfiguration::new("t2", "b", "b", path(), "Acme/b", "mqtt", false);
        repo.by_id.write().unwrap().insert(verified.id.clone(), verified);
        repo.by_id.write().unwrap().insert(unverified.id.clone(), unverified);
        assert_eq!(repo.unverified_only().len(), 1);
    }
}
