//! User-created sub-namespaces and the composed NSTreeNode forest.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::AppError;
use crate::hierarchy::{HierarchicalPath, HierarchyRegistry};

/// A user-created sub-namespace attached under a specific [`HierarchicalPath`]
/// (e.g. "Production/Sensors" under Enterprise=Acme/Site=Plant1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceNode {
    pub id: String,
    pub name: String,
    pub node_type: String,
    pub hierarchical_path: HierarchicalPath,
    /// Sub-path under `hierarchical_path`, e.g. "Production/Sensors".
    pub topic_path_pattern: String,
    pub auto_verify_topics: bool,
    pub is_active: bool,
}

impl NamespaceNode {
    /// The fully-qualified NS path: `hierarchical_path.full_path()` joined
    /// with `topic_path_pattern`.
    pub fn full_ns_path(&self) -> String {
        let base = self.hierarchical_path.full_path();
        if self.topic_path_pattern.is_empty() {
            base
        } else if base.is_empty() {
            self.topic_path_pattern.clone()
        } else {
            format!("{base}/{}", self.topic_path_pattern)
        }
    }
}

/// A composed view node used by the auto-mapper to walk candidate paths
///. Either a [`crate::hierarchy::HierarchyNode`] instance or a
/// [`NamespaceNode`], plus children. Rebuilt from the registry on demand.
#[derive(Debug, Clone)]
pub struct NSTreeNode {
    pub name: String,
    pub full_path: String,
    pub node_type: NSNodeType,
    pub children: Vec<NSTreeNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NSNodeType {
    HierarchyNode,
    Namespace,
}

impl NSTreeNode {
    /// Depth-first iterator over every node in the forest, including self.
    pub fn walk(&self) -> Vec<&NSTreeNode> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }
}

/// Owns [`NamespaceNode`]s and derives the NSTreeNode forest on demand.
pub struct NamespaceRegistry {
    nodes: RwLock<HashMap<String, NamespaceNode>>,
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
        }
    }

    /// Create a namespace node. Fails if its `hierarchical_path` does not
    /// validate against the active hierarchy configuration.
    pub fn create(
        &self,
        hierarchy: &HierarchyRegistry,
        node: NamespaceNode,
    ) -> Result<(), AppError> {
        hierarchy.validate_path(&node.hierarchical_path)?;
        self.nodes.write().unwrap().insert(node.id.clone(), node);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<NamespaceNode> {
        self.nodes.read().unwrap().get(id).cloned()
    }

    pub fn find_by_full_ns_path(&self, ns_path: &str) -> Option<NamespaceNode> {
        self.nodes
            .read()
            .unwrap()
            .values()
            .find(|n| n.full_ns_path() == ns_path)
            .cloned()
    }

    pub fn all(&self) -> Vec<NamespaceNode> {
        self.nodes.read().unwrap().values().cloned().collect()
    }

    /// Delete a namespace node. Callers (the topic repository consumer)
    /// must have already verified no topic references it — this registry
    /// has no visibility into `TopicConfigurationRepository`.
    pub fn delete(&self, id: &str) -> bool {
        self.nodes.write().unwrap().remove(id).is_some()
    }

    /// Build the NSTreeNode forest: one root per distinct top-level
    /// hierarchy value that has at least one namespace node beneath it,
    /// mixing hierarchy-level nodes with namespace leaves/branches.
    pub fn namespace_structure(&self, hierarchy: &HierarchyRegistry) -> Vec<NSTreeNode> {
        let Some(config) = hierarchy.get_active_configuration() else {
            return Vec::new();
        };
        let nodes = self.nodes.read().unwrap();

        // Group namespace nodes by their hierarchical_path's full_path, so
        // siblings under the same path become children of the same branch.
        let mut by_path: HashMap<String, Vec<&NamespaceNode>> = HashMap::new();
        for n in nodes.values() {
            by_path
                .entry(n.hierarchical_path.full_path())
                .or_default()
                .push(n);
        }

        let mut roots: Vec<NSTreeNode> = Vec::new();
        for (path_str, ns_nodes) in by_path {
            // Walk the hierarchy levels to build the HierarchyNode chain
            // down to this path, then attach namespace branches.
            let segments: Vec<&str> = if path_str.is_empty() {
                Vec::new()
            } else {
                path_str.split('/').collect()
            };
            let levels = config.levels();
            let mut chain: Vec<NSTreeNode> = Vec::new();
            let mut acc = String::new();
            for (level, seg) in levels.iter().zip(segments.iter()) {
                if !acc.is_empty() {
                    acc.push('/');
                }
                acc.push_str(seg);
                chain.push(NSTreeNode {
                    name: level.name.clone(),
                    full_path: acc.clone(),
                    node_type: NSNodeType::HierarchyNode,
                    children: Vec::new(),
                });
            }

            let mut namespace_children: Vec<NSTreeNode> = ns_nodes
                .into_iter()
                .map(|n| NSTreeNode {
                    name: n.name.clone(),
                    full_path: n.full_ns_path(),
                    node_type: NSNodeType::Namespace,
                    children: Vec::new(),
                })
                .collect();
            namespace_children.sort_by(|a, b| a.name.cmp(&b.name));

            // Attach namespace_children under the deepest chain link (or
            // as roots if the hierarchical_path is empty).
            let tree = if let Some(mut deepest) = chain.pop() {
                deepest.children = namespace_children;
                let mut node = deepest;
                for mut parent in chain.into_iter().rev() {
                    parent.children = vec![node];
                    node = parent;
                }
                node
            } else if namespace_children.len() == 1 {
                namespace_children.remove(0)
            } else {
                NSTreeNode {
                    name: String::new(),
                    full_path: String::new(),
                    node_type: NSNodeType::Namespace,
                    children: namespace_children,
                }
            };
            roots.push(tree);
        }
        roots.sort_by(|a, b| a.name.cmp(&b.name));
        roots
    }
}
