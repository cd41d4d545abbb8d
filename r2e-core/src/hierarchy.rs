//! Hierarchy / namespace registry.
//!
//! Owns the active [`HierarchyConfiguration`] template and validates
//! [`HierarchicalPath`]s against it. Namespace nodes and the composed
//! NSTreeNode forest live in [`crate::namespace`], which depends on this
//! module for path validation.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// One level in a hierarchy template (Enterprise, Site, Area, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub id: String,
    pub name: String,
    /// Ascending order defines enumeration order; two nodes sharing an
    /// order is a configuration error (rejected at `HierarchyConfiguration`
    /// construction time).
    pub order: u32,
    pub required: bool,
    pub parent_id: Option<String>,
    pub allowed_child_ids: Vec<String>,
    /// If `false`, this node must not be the deepest segment of any
    /// `TopicConfiguration`'s path.
    pub allow_topics: bool,
    pub description: Option<String>,
}

/// An ordered set of [`HierarchyNode`]s defining the active template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyConfiguration {
    pub id: String,
    pub name: String,
    nodes: Vec<HierarchyNode>,
    pub is_active: bool,
    pub is_system_defined: bool,
}

#[derive(Debug, Clone)]
pub enum HierarchyConfigError {
    DuplicateOrder(u32),
}

impl std::fmt::Display for HierarchyConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HierarchyConfigError::DuplicateOrder(o) => {
                write!(f, "two hierarchy nodes share order {o}")
            }
        }
    }
}

impl HierarchyConfiguration {
    /// Build a configuration, sorting nodes by ascending `order`.
    ///
    /// Rejects configurations where two nodes share an `order` value —
    /// "a configuration error"
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        mut nodes: Vec<HierarchyNode>,
        is_system_defined: bool,
    ) -> Result<Self, HierarchyConfigError> {
        nodes.sort_by_key(|n| n.order);
        for pair in nodes.windows(2) {
            if pair[0].order == pair[1].order {
                return Err(HierarchyConfigError::DuplicateOrder(pair[0].order));
            }
        }
        Ok(Self {
            id: id.into(),
            name: name.into(),
            nodes,
            is_active: false,
            is_system_defined,
        })
    }

    /// Levels strictly ordered by ascending `order`.
    pub fn levels(&self) -> &[HierarchyNode] {
        &self.nodes
    }

    pub fn level_named(&self, name: &str) -> Option<&HierarchyNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn deepest_level(&self) -> Option<&HierarchyNode> {
        self.nodes.last()
    }
}

/// Ordered assignment of values to hierarchy levels.
///
/// Order follows the active `HierarchyConfiguration` at the time the path
/// was created. Empty values are skipped when rendering `full_path`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HierarchicalPath {
    /// `(level_name, value)` pairs, in config order.
    values: Vec<(String, String)>,
}

impl HierarchicalPath {
    pub fn new(values: Vec<(String, String)>) -> Self {
        Self { values }
    }

    pub fn get(&self, level: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _)| name == level)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.values
    }

    /// The `/`-join of non-empty values in order.
    pub fn full_path(&self) -> String {
        self.values
            .iter()
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// The deepest level name with a non-empty value, if any.
    pub fn deepest_populated_level(&self) -> Option<&str> {
        self.values
            .iter()
            .rev()
            .find(|(_, v)| !v.is_empty())
            .map(|(name, _)| name.as_str())
    }

    pub fn is_descendant_of_or_equal(&self, other: &HierarchicalPath) -> bool {
        let a = self.full_path();
        let b = other.full_path();
        a == b || a.starts_with(&format!("{b}/"))
    }
}

/// Authoritative structure of allowed paths and named sub-namespaces.
pub struct HierarchyRegistry {
    configs: RwLock<HashMap<String, HierarchyConfiguration>>,
    active_id: RwLock<Option<String>>,
}

impl Default for HierarchyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HierarchyRegistry {
    pub fn new() -> Self {
        Self {
            configs: RwLock::new(HashMap::new()),
            active_id: RwLock::new(None),
        }
    }

    /// Register a configuration. The first one registered becomes active
    /// automatically; callers otherwise drive activation via [`Self::activate`].
    pub fn register(&self, mut config: HierarchyConfiguration) {
        let mut active = self.active_id.write().unwrap();
        if active.is_none() {
            config.is_active = true;
            *active = Some(config.id.clone());
        }
        self.configs.write().unwrap().insert(config.id.clone(), config);
    }

    pub fn get_active_configuration(&self) -> Option<HierarchyConfiguration> {
        let active = self.active_id.read().unwrap();
        let id = active.as_ref()?;
        self.configs.read().unwrap().get(id).cloned()
    }

    /// Split `s` by `/` and assign values to the active config's ordered
    /// levels. Extra segments fail with `Validation`.
    pub fn create_path_from_string(&self, s: &str) -> Result<HierarchicalPath, AppError> {
        let config = self
            .get_active_configuration()
            .ok_or_else(|| AppError::validation("no active hierarchy configuration"))?;
        let segments: Vec<&str> = if s.is_empty() {
            Vec::new()
        } else {
            s.split('/').collect()
        };
        if segments.len() > config.levels().len() {
            return Err(AppError::validation(format!(
                "path '{s}' has {} segments but the active configuration has {} levels",
                segments.len(),
                config.levels().len()
            )));
        }
        let values = config
            .levels()
            .iter()
            .enumerate()
            .map(|(i, level)| {
                let value = segments.get(i).copied().unwrap_or("").to_string();
                (level.name.clone(), value)
            })
            .collect();
        Ok(HierarchicalPath::new(values))
    }

    /// Required levels present, unknown levels absent, all present values
    /// non-empty strings.
    pub fn validate_path(&self, path: &HierarchicalPath) -> Result<(), AppError> {
        let config = self
            .get_active_configuration()
            .ok_or_else(|| AppError::validation("no active hierarchy configuration"))?;
        for (name, _) in path.entries() {
            if config.level_named(name).is_none() {
                return Err(AppError::validation(format!(
                    "unknown hierarchy level '{name}'"
                )));
            }
        }
        for level in config.levels() {
            let value = path.get(&level.name);
            match value {
                Some(v) if v.is_empty() && level.required => {
                    return Err(AppError::validation(format!(
                        "required level '{}' is empty",
                        level.name
                    )));
                }
                None if level.required => {
                    return Err(AppError::validation(format!(
                        "required level '{}' is missing",
                        level.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// The deepest populated level's `HierarchyNode` must have `allow_topics
    /// = true`.
    pub fn validate_topic_mapping(&self, path: &HierarchicalPath) -> Result<(), AppError> {
        let config = self
            .get_active_configuration()
            .ok_or_else(|| AppError::validation("no active hierarchy configuration"))?;
        let Some(deepest_name) = path.deepest_populated_level() else {
            return Err(AppError::mapping("path has no populated levels", vec![]));
        };
        let node = config
            .level_named(deepest_name)
            .ok_or_else(|| AppError::validation(format!("unknown level '{deepest_name}'")))?;
        if !node.allow_topics {
            return Err(AppError::mapping(
                format!("level '{deepest_name}' does not allow topics"),
                vec![],
            ));
        }
        Ok(())
    }

    /// Run pre-swap validation against every path in `existing_paths`,
    /// then commit atomically or reject with the offending paths.
    pub fn activate(
        &self,
        config_id: &str,
        existing_paths: &[HierarchicalPath],
    ) -> Result<(), Vec<String>> {
        let proposed = {
            let configs = self.configs.read().unwrap();
            match configs.get(config_id) {
                Some(c) => c.clone(),
                None => return Err(vec![format!("no such configuration '{config_id}'")]),
            }
        };

        let mut offenders = Vec::new();
        for path in existing_paths {
            let deepest = path.deepest_populated_level();
            let ok = deepest
                .and_then(|name| proposed.level_named(name))
                .map(|node| node.allow_topics)
                .unwrap_or(false);
            if !ok {
                offenders.push(path.full_path());
            }
        }
        if !offenders.is_empty() {
            return Err(offenders);
        }

        let mut configs = self.configs.write().unwrap();
        for c in configs.values_mut() {
            c.is_active = c.id == config_id;
        }
        *self.active_id.write().unwrap() = Some(config_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isa95() -> HierarchyRegistry {
        let reg = HierarchyRegistry::new();
        let nodes = vec![
            HierarchyNode {
                id: "h-ent".into(),
                name: "Enterprise".into(),
                order: 0,
                required: true,
                parent_id: None,
                allowed_child_ids: vec!["h-site".into()],
                allow_topics: false,
                description: None,
            },
            HierarchyNode {
                id: "h-site".into(),
                name: "Site".into(),
                order: 1,
                required: false,
                parent_id: Some("h-ent".into()),
                allowed_child_ids: vec!["h-area".into()],
                allow_topics: false,
                description: None,
            },
            HierarchyNode {
                id: "h-area".into(),
                name: "Area".into(),
                order: 2,
                required: false,
                parent_id: Some("h-site".into()),
                allowed_child_ids: vec![],
                allow_topics: true,
                description: None,
            },
        ];
        let config = HierarchyConfiguration::new("cfg-1", "ISA-95", nodes, true).unwrap();
        reg.register(config);
        reg
    }

    #[test]
    fn hierarchy_round_trip() {
        let reg = isa95();
        let path = reg.create_path_from_string("Acme/Plant1/Line3").unwrap();
        assert_eq!(path.get("Enterprise"), Some("Acme"));
        assert_eq!(path.get("Site"), Some("Plant1"));
        assert_eq!(path.get("Area"), Some("Line3"));
        assert_eq!(path.full_path(), "Acme/Plant1/Line3");

        let skipped = HierarchicalPath::new(vec![
            ("Enterprise".into(), "Acme".into()),
            ("Site".into(), "".into()),
            ("Area".into(), "Line3".into()),
        ]);
        assert_eq!(skipped.full_path(), "Acme/Line3");
    }

    #[test]
    fn create_path_from_string_round_trips() {
        let reg = isa95();
        let path = reg.create_path_from_string("Acme/Plant1/Line3").unwrap();
        let round_tripped = reg.create_path_from_string(&path.full_path()).unwrap();
        assert_eq!(path, round_tripped);
    }

    #[test]
    fn extra_segments_fail() {
        let reg = isa95();
        assert!(reg
            .create_path_from_string("Acme/Plant1/Line3/Extra")
            .is_err());
    }

    #[test]
    fn duplicate_order_is_a_config_error() {
        let nodes = vec![
            HierarchyNode {
                id: "a".into(),
                name: "A".into(),
                order: 0,
                required: false,
                parent_id: None,
                allowed_child_ids: vec![],
                allow_topics: true,
                description: None,
            },
            HierarchyNode {
                id: "b".into(),
                name: "B".into(),
                order: 0,
                required: false,
                parent_id: None,
                allowed_child_ids: vec![],
                allow_topics: true,
                description: None,
            },
        ];
        assert!(HierarchyConfiguration::new("c", "c", nodes, false).is_err());
    }

    #[test]
    fn enterprise_level_does_not_allow_topics() {
        let reg = isa95();
        let path = reg.create_path_from_string("Acme").unwrap();
        assert!(reg.validate_topic_mapping(&path).is_err());
    }

    #[test]
    fn area_level_allows_topics() {
        let reg = isa95();
        let path = reg.create_path_from_string("Acme/Plant1/Line3").unwrap();
        assert!(reg.validate_topic_mapping(&path).is_ok());
    }

    #[test]
    fn activation_rejects_orphaning_topics() {
        let reg = isa95();
        // A flatter config where Area doesn't allow topics.
        let flat_nodes = vec![HierarchyNode {
            id: "h-ent2".into(),
            name: "Enterprise".into(),
            order: 0,
            required: true,
            parent_id: None,
            allowed_child_ids: vec![],
            allow_topics: false,
            description: None,
        }];
        let flat = HierarchyConfiguration::new("cfg-2", "Flat", flat_nodes, false).unwrap();
        reg.register(flat);

        let existing = vec![reg.create_path_from_string("Acme/Plant1/Line3").unwrap()];
        let result = reg.activate("cfg-2", &existing);
        assert!(result.is_err());
        assert_eq!(reg.get_active_configuration().unwrap().id, "cfg-1");
    }

    #[test]
    fn activation_commits_when_clean() {
        let reg = isa95();
        let other_nodes = vec![HierarchyNode {
            id: "h-ent3".into(),
            name: "Enterprise".into(),
            order: 0,
            required: true,
            parent_id: None,
            allowed_child_ids: vec![],
            allow_topics: true,
            description: None,
        }];
        let other = HierarchyConfiguration::new("cfg-3", "Other", other_nodes, false).unwrap();
        reg.register(other);
        assert!(reg.activate("cfg-3", &[]).is_ok());
        assert_eq!(reg.get_active_configuration().unwrap().id, "cfg-3");
    }
}
