//! Topic discovery and auto-mapping.
//!
//! Turns a raw incoming `(topic, sourceType)` into a registered
//! [`TopicConfiguration`] by first trying ordered custom rules, then
//! falling back to scoring candidates drawn from the namespace tree.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use r2e_events::EventBus;

use crate::error::AppError;
use crate::events::AutoMappingFailedEvent;
use crate::hierarchy::{HierarchicalPath, HierarchyRegistry};
use crate::namespace::{NamespaceNode, NamespaceRegistry};
use crate::topic::{TopicConfiguration, TopicConfigurationRepository};

/// One ordered pattern rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRule {
    pub pattern: String,
    pub ns_path_template: String,
    pub confidence: f64,
    pub active: bool,
    pub description: Option<String>,
}

/// Auto-mapper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoMapConfig {
    pub enabled: bool,
    pub minimum_confidence: f64,
    pub max_search_depth: usize,
    pub strip_prefixes: Vec<String>,
    pub create_missing_nodes: bool,
    pub case_sensitive: bool,
    pub custom_rules: Vec<CustomRule>,
}

impl Default for AutoMapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            minimum_confidence: 0.5,
            max_search_depth: 10,
            strip_prefixes: Vec::new(),
            create_missing_nodes: true,
            case_sensitive: true,
            custom_rules: Vec::new(),
        }
    }
}

/// Binds a raw topic to a UNS path via ordered rules or tree-walk scoring.
pub struct AutoMapper {
    hierarchy: Arc<HierarchyRegistry>,
    namespace: Arc<NamespaceRegistry>,
    topics: Arc<TopicConfigurationRepository>,
    bus: EventBus,
    config: AutoMapConfig,
}

impl AutoMapper {
    pub fn new(
        hierarchy: Arc<HierarchyRegistry>,
        namespace: Arc<NamespaceRegistry>,
        topics: Arc<TopicConfigurationRepository>,
        bus: EventBus,
        config: AutoMapConfig,
    ) -> Self {
        Self {
            hierarchy,
            namespace,
            topics,
            bus,
            config,
        }
    }

    /// Run the algorithm for one raw topic. Returns `None` when disabled,
    /// below confidence, or the namespace doesn't exist and
    /// `create_missing_nodes=false`; emits `AutoMappingFailedEvent` and
    /// returns `None` when the resolved path disallows topics.
    pub async fn map(&self, topic: &str, source_type: &str) -> Option<TopicConfiguration> {
        if !self.config.enabled {
            return None;
        }

        let normalized = self.normalize(topic);
        let topic_segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();

        let (ns_path, confidence, matched_by_rule) = match self.match_rule(&normalized) {
            Some((ns_path, confidence)) => (ns_path, confidence, true),
            None => {
                let (ns_path, confidence) = self.best_tree_candidate(&topic_segments)?;
                (ns_path, confidence, false)
            }
        };

        if confidence < self.config.minimum_confidence {
            return None;
        }

        let path = self.resolve_hierarchy_path(&ns_path)?;

        if let Err(e) = self.hierarchy.validate_topic_mapping(&path) {
            self.bus
                .emit(AutoMappingFailedEvent {
                    source_topic: topic.to_string(),
                    reason: format!("topic not allowed at '{ns_path}': {e}"),
                    suggestions: vec![ns_path.clone()],
                })
                .await;
            return None;
        }

        if self.namespace.find_by_full_ns_path(&ns_path).is_none() {
            if !self.config.create_missing_nodes {
                self.bus
                    .emit(AutoMappingFailedEvent {
                        source_topic: topic.to_string(),
                        reason: format!("namespace '{ns_path}' does not exist"),
                        suggestions: vec![ns_path.clone()],
                    })
                    .await;
                return None;
            }
            self.create_missing_namespace(&ns_path, &path);
        }

        let auto_verify = self
            .namespace
            .find_by_full_ns_path(&ns_path)
            .map(|n| n.auto_verify_topics)
            .unwrap_or(false);
        let is_verified = matched_by_rule && auto_verify;

        let uns_name = ns_path
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(ns_path.as_str())
            .to_string();

        let config = TopicConfiguration::new(
            Uuid::new_v4().to_string(),
            topic,
            uns_name,
            path,
            ns_path,
            source_type,
            is_verified,
        );
        self.topics.upsert(config).await.ok()
    }

    /// Simpler fallback the caller may invoke when [`Self::map`] returns
    /// `None`: registers an **unverified** topic with an empty path so
    /// operators can triage it later.
    pub async fn discover_unverified(
        &self,
        topic: &str,
        source_type: &str,
    ) -> Result<TopicConfiguration, AppError> {
        let config = TopicConfiguration::new(
            Uuid::new_v4().to_string(),
            topic,
            topic,
            HierarchicalPath::default(),
            "",
            source_type,
            false,
        );
        self.topics.upsert(config).await
    }

    /// Strip the longest matching prefix, then lowercase if case-insensitive.
    fn normalize(&self, topic: &str) -> String {
        let mut longest: Option<&str> = None;
        for prefix in &self.config.strip_prefixes {
            if topic.starts_with(prefix.as_str())
                && longest.map_or(true, |l| prefix.len() > l.len())
            {
                longest = Some(prefix.as_str());
            }
        }
        let stripped = match longest {
            Some(p) => &topic[p.len()..],
            None => topic,
        };
        if self.config.case_sensitive {
            stripped.to_string()
        } else {
            stripped.to_lowercase()
        }
    }

    /// First active rule (in order) whose regex matches; its capture
    /// groups substitute into `{0}`, `{1}`, ... of `ns_path_template`.
    fn match_rule(&self, normalized: &str) -> Option<(String, f64)> {
        for rule in &self.config.custom_rules {
            if !rule.active {
                continue;
            }
            let re = match Regex::new(&rule.pattern) {
                Ok(re) => re,
                Err(_) => continue,
            };
            if let Some(caps) = re.captures(normalized) {
                let mut out = rule.ns_path_template.clone();
                for i in 1..caps.len() {
                    if let Some(m) = caps.get(i) {
                        out = out.replace(&format!("{{{}}}", i - 1), m.as_str());
                    }
                }
                return Some((out, rule.confidence));
            }
        }
        None
    }

    /// Walk the namespace tree up to `max_search_depth`; score each
    /// candidate by longest common prefix over candidate depth. Ties break
    /// by higher score then lexicographically smaller path.
    fn best_tree_candidate(&self, topic_segments: &[&str]) -> Option<(String, f64)> {
        self.hierarchy.get_active_configuration()?;
        let forest = self.namespace.namespace_structure(&self.hierarchy);
        let mut candidates: Vec<(String, f64)> = Vec::new();
        for root in &forest {
            for node in root.walk() {
                if node.full_path.is_empty() {
                    continue;
                }
                let segments: Vec<&str> = node.full_path.split('/').collect();
                if segments.len() > self.config.max_search_depth {
                    continue;
                }
                let lcp = topic_segments
                    .iter()
                    .zip(segments.iter())
                    .take_while(|(a, b)| {
                        if self.config.case_sensitive {
                            a == b
                        } else {
                            a.eq_ignore_ascii_case(b)
                        }
                    })
                    .count();
                let score = lcp as f64 / segments.len().max(1) as f64;
                candidates.push((node.full_path.clone(), score));
            }
        }
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        candidates.into_iter().next()
    }

    /// Split `ns_path` into the hierarchy-levels prefix (the
    /// `HierarchicalPath`) and whatever remainder belongs to a namespace
    /// branch, using the active configuration's level count.
    fn resolve_hierarchy_path(&self, ns_path: &str) -> Option<HierarchicalPath> {
        let hierarchy_config = self.hierarchy.get_active_configuration()?;
        let levels = hierarchy_config.levels().len();
        let segments: Vec<&str> = ns_path.split('/').filter(|s| !s.is_empty()).collect();
        let take = segments.len().min(levels);
        let hierarchy_str = segments[..take].join("/");
        self.hierarchy.create_path_from_string(&hierarchy_str).ok()
    }

    fn create_missing_namespace(&self, ns_path: &str, path: &HierarchicalPath) {
        let base = path.full_path();
        let pattern = if base.is_empty() {
            ns_path.to_string()
        } else if ns_path == base {
            String::new()
        } else {
            ns_path
                .strip_prefix(&format!("{base}/"))
                .unwrap_or(ns_path)
                .to_string()
        };
        let name = pattern
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .or_else(|| path.deepest_populated_level())
            .unwrap_or("unnamed")
            .to_string();
        let node = NamespaceNode {
            id: Uuid::new_v4().to_string(),
            name,
            node_type: "Namespace".into(),
            hierarchical_path: path.clone(),
            topic_path_pattern: pattern,
            auto_verify_topics: false,
            is_active: true,
        };
        let _ = self.namespace.create(&self.hierarchy, node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{HierarchyConfiguration, HierarchyNode};

    fn isa95_with_oee() -> (Arc<HierarchyRegistry>, Arc<NamespaceRegistry>) {
        let hierarchy = Arc::new(HierarchyRegistry::new());
        let nodes = vec![
            HierarchyNode {
                id: "h-ent".into(),
                name: "Enterprise".into(),
                order: 0,
                required: true,
                parent_id: None,
                allowed_child_ids: vec![],
                allow_topics: true,
                description: None,
            },
        ];
        let config = HierarchyConfiguration::new("cfg-1", "flat", nodes, true).unwrap();
        hierarchy.register(config);

        let namespace = Arc::new(NamespaceRegistry::new());
        let path = hierarchy.create_path_from_string("Enterprise1").unwrap();
        namespace
            .create(
                &hierarchy,
                NamespaceNode {
                    id: "ns-oee".into(),
                    name: "OEE".into(),
                    node_type: "Namespace".into(),
                    hierarchical_path: path,
                    topic_path_pattern: "OEE".into(),
                    auto_verify_topics: true,
                    is_active: true,
                },
            )
            .unwrap();
        (hierarchy, namespace)
    }

    fn mapper(config: AutoMapConfig) -> (AutoMapper, EventBus) {
        let (hierarchy, namespace) = isa95_with_oee();
        let bus = EventBus::new();
        let topics = Arc::new(TopicConfigurationRepository::new(bus.clone()));
        (
            AutoMapper::new(hierarchy, namespace, topics, bus.clone(), config),
            bus,
        )
    }

    #[tokio::test]
    async fn auto_map_by_rule() {
        let config = AutoMapConfig {
            strip_prefixes: vec!["socketio/update/".into()],
            custom_rules: vec![CustomRule {
                pattern: r"([^/]+)/([^/]+)/?.*".into(),
                ns_path_template: "{0}/{1}".into(),
                confidence: 0.9,
                active: true,
                description: None,
            }],
            minimum_confidence: 0.8,
            ..Default::default()
        };
        let (mapper, _bus) = mapper(config);
        let result = mapper
            .map("socketio/update/Enterprise1/OEE/value", "socketio")
            .await
            .expect("rule should match above threshold");
        assert_eq!(result.ns_path, "Enterprise1/OEE");
        assert!(result.is_verified);
    }

    #[tokio::test]
    async fn below_threshold_rule_returns_none() {
        let config = AutoMapConfig {
            custom_rules: vec![CustomRule {
                pattern: r"([^/]+)/([^/]+)".into(),
                ns_path_template: "{0}/{1}".into(),
                confidence: 0.3,
                active: true,
                description: None,
            }],
            minimum_confidence: 0.8,
            ..Default::default()
        };
        let (mapper, _bus) = mapper(config);
        assert!(mapper.map("Enterprise1/OEE/value", "socketio").await.is_none());
    }

    #[tokio::test]
    async fn tree_phase_falls_back_when_no_rule_matches() {
        let config = AutoMapConfig {
            minimum_confidence: 0.3,
            ..Default::default()
        };
        let (mapper, _bus) = mapper(config);
        let result = mapper
            .map("Enterprise1/OEE/value", "mqtt")
            .await
            .expect("tree phase should find the OEE namespace");
        assert_eq!(result.ns_path, "Enterprise1/OEE");
    }

    #[tokio::test]
    async fn disallowed_topic_emits_failure_and_returns_none() {
        let hierarchy = Arc::new(HierarchyRegistry::new());
        let nodes = vec![HierarchyNode {
            id: "h-ent".into(),
            name: "Enterprise".into(),
            order: 0,
            required: true,
            parent_id: None,
            allowed_child_ids: vec![],
            allow_topics: false,
            description: None,
        }];
        hierarchy.register(HierarchyConfiguration::new("cfg-1", "flat", nodes, true).unwrap());
        let namespace = Arc::new(NamespaceRegistry::new());
        let bus = EventBus::new();
        let topics = Arc::new(TopicConfigurationRepository::new(bus.clone()));

        let failed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let f = failed.clone();
        bus.subscribe("test-automap-failed", move |_: Arc<AutoMappingFailedEvent>| {
            let f = f.clone();
            async move {
                f.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        })
        .await;

        let config = AutoMapConfig {
            custom_rules: vec![CustomRule {
                pattern: r"(.+)".into(),
                ns_path_template: "{0}".into(),
                confidence: 0.9,
                active: true,
                description: None,
            }],
            minimum_confidence: 0.5,
            ..Default::default()
        };
        let mapper = AutoMapper::new(hierarchy, namespace, topics, bus, config);
        assert!(mapper.map("Enterprise1", "mqtt").await.is_none());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(failed.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_namespace_without_create_flag_returns_none() {
        let config = AutoMapConfig {
            create_missing_nodes: false,
            minimum_confidence: 0.1,
            custom_rules: vec![CustomRule {
                pattern: r"(.+)".into(),
                ns_path_template: "Enterprise1/NoSuchNamespace".into(),
                confidence: 0.9,
                active: true,
                description: None,
            }],
            ..Default::default()
        };
        let (mapper, _bus) = mapper(config);
        assert!(mapper.map("anything", "mqtt").await.is_none());
    }

    #[tokio::test]
    async fn discover_unverified_registers_empty_path() {
        let (mapper, _bus) = mapper(AutoMapConfig::default());
        let cfg = mapper
            .discover_unverified("unknown/topic", "mqtt")
            .await
            .unwrap();
        assert!(!cfg.is_verified);
        assert_eq!(cfg.ns_path, "");
        assert_eq!(cfg.path.full_path(), "");
    }
}
