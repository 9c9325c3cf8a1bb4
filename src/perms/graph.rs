use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::nodes;

/// A permission registered with the authorization backend together with
/// its immediate children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredPermission {
    pub name: String,
    #[serde(default)]
    pub children: Vec<String>,
}

impl RegisteredPermission {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), children: Vec::new() }
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.children = children.into_iter().map(Into::into).collect();
        self
    }
}

/// One-level parent → children adjacency over the backend catalog.
///
/// Lookups are case-insensitive; identifiers keep the casing they were
/// registered with.
#[derive(Debug, Clone, Default)]
pub struct RegisteredPermissionGraph {
    order: Vec<String>,
    children: HashMap<String, Vec<String>>,
}

impl RegisteredPermissionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_catalog(catalog: impl IntoIterator<Item = RegisteredPermission>) -> Self {
        let mut graph = Self::new();
        for permission in catalog {
            let key = permission.name.to_lowercase();
            if !graph.children.contains_key(&key) {
                graph.order.push(permission.name.clone());
            }
            graph.children.insert(key, permission.children);
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Immediate children of a registered node; empty when unknown.
    pub fn children(&self, node: &str) -> &[String] {
        self.children
            .get(&node.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every node reachable below `node`, excluding `node` itself.
    ///
    /// Traversal does not expand a node whose negation (`-node`) is present
    /// in `working_set`; the negated node is still reported, its subtree is
    /// not. Returned identifiers are lowercased.
    pub fn all_descendants(&self, node: &str, working_set: &HashSet<String>) -> HashSet<String> {
        let root = node.to_lowercase();
        let mut visited: HashSet<String> = HashSet::from([root.clone()]);
        let mut queue = VecDeque::from([root.clone()]);

        while let Some(current) = queue.pop_front() {
            let negated = format!("{}{}", nodes::NEGATION, current);
            if current != root && working_set.iter().any(|entry| entry.to_lowercase() == negated) {
                continue;
            }
            for child in self.children(&current) {
                let child = child.to_lowercase();
                if visited.insert(child.clone()) {
                    queue.push_back(child);
                }
            }
        }

        visited.remove(&root);
        visited
    }

    /// Every registered identifier in catalog order, optionally followed by
    /// descendants that are not registered themselves.
    pub fn all_registered(&self, include_children: bool) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();

        for name in &self.order {
            if seen.insert(name.to_lowercase()) {
                result.push(name.clone());
            }
        }

        if include_children {
            for name in &self.order {
                let mut descendants: Vec<String> = self.all_descendants(name, &HashSet::new()).into_iter().collect();
                descendants.sort();
                for descendant in descendants {
                    if seen.insert(descendant.clone()) {
                        result.push(descendant);
                    }
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> RegisteredPermissionGraph {
        RegisteredPermissionGraph::from_catalog([
            RegisteredPermission::new("x.*").with_children(["x.y", "x.z"]),
            RegisteredPermission::new("x.y").with_children(["x.y.a", "x.y.b"]),
            RegisteredPermission::new("x.y.a").with_children(["x.*"]),
            RegisteredPermission::new("Plot.*").with_children(["plot.claim"]),
        ])
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn children_lookup_is_case_insensitive() {
        let graph = graph();
        assert_eq!(graph.children("plot.*"), ["plot.claim"]);
        assert_eq!(graph.children("X.Y"), ["x.y.a", "x.y.b"]);
        assert!(graph.children("unknown").is_empty());
    }

    #[test]
    fn descendants_walk_multiple_levels_and_survive_cycles() {
        let graph = graph();
        let descendants = graph.all_descendants("x.*", &HashSet::new());
        assert_eq!(descendants, set(&["x.y", "x.z", "x.y.a", "x.y.b"]));
    }

    #[test]
    fn negated_child_is_reported_but_not_expanded() {
        let graph = graph();
        let descendants = graph.all_descendants("x.*", &set(&["-x.y"]));
        assert_eq!(descendants, set(&["x.y", "x.z"]));
    }

    #[test]
    fn negation_matches_non_ascii_nodes_in_any_case() {
        let graph = RegisteredPermissionGraph::from_catalog([
            RegisteredPermission::new("Ärzte.*").with_children(["Ärzte.heal"]),
            RegisteredPermission::new("Ärzte.heal").with_children(["Ärzte.heal.self"]),
        ]);
        let descendants = graph.all_descendants("ärzte.*", &set(&["-ÄRZTE.HEAL"]));
        assert_eq!(descendants, set(&["ärzte.heal"]));
    }

    #[test]
    fn leaf_has_no_descendants() {
        assert!(graph().all_descendants("x.z", &HashSet::new()).is_empty());
    }

    #[test]
    fn all_registered_can_include_children() {
        let graph = graph();
        assert_eq!(graph.all_registered(false), vec!["x.*", "x.y", "x.y.a", "Plot.*"]);

        let all = graph.all_registered(true);
        assert!(all.contains(&"x.z".to_string()));
        assert!(all.contains(&"plot.claim".to_string()));
        assert_eq!(all.len(), 7);
    }
}
