use std::collections::HashSet;

use super::graph::RegisteredPermissionGraph;
use super::nodes;

/// Order raw nodes so that every ancestor precedes its descendants.
///
/// Nodes are taken in input order. A node whose descendant set contains an
/// entry already placed (compared on the bare, lowercased form) is inserted
/// right before the first such entry; otherwise it is appended. Unrelated
/// nodes keep their first-seen order. Duplicate inputs keep their first
/// position.
pub fn collation_sort(raw_nodes: &[String], graph: &RegisteredPermissionGraph) -> Vec<String> {
    let mut result: Vec<String> = Vec::with_capacity(raw_nodes.len());
    let no_negations = HashSet::new();

    for node in raw_nodes {
        if result.contains(node) {
            continue;
        }

        let descendants = graph.all_descendants(nodes::bare(node), &no_negations);
        let position = if descendants.is_empty() {
            None
        } else {
            result
                .iter()
                .position(|placed| descendants.contains(&nodes::bare(placed).to_lowercase()))
        };

        match position {
            Some(idx) => result.insert(idx, node.clone()),
            None => result.push(node.clone()),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perms::graph::RegisteredPermission;

    fn graph() -> RegisteredPermissionGraph {
        RegisteredPermissionGraph::from_catalog([
            RegisteredPermission::new("x.*").with_children(["x.y", "x.z"]),
            RegisteredPermission::new("x.y").with_children(["x.y.a"]),
            RegisteredPermission::new("towny.command.plot.*").with_children(["towny.command.plot.set.*"]),
            RegisteredPermission::new("towny.command.plot.set.*").with_children(["towny.command.plot.set.jail"]),
        ])
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ancestor_moves_before_existing_negated_descendant() {
        let sorted = collation_sort(&strings(&["-x.y", "chat.use", "x.*"]), &graph());
        assert_eq!(sorted, strings(&["x.*", "-x.y", "chat.use"]));
    }

    #[test]
    fn multi_level_descendants_are_recognised() {
        let sorted = collation_sort(
            &strings(&["-towny.command.plot.set.jail", "towny.command.plot.*"]),
            &graph(),
        );
        assert_eq!(sorted, strings(&["towny.command.plot.*", "-towny.command.plot.set.jail"]));
    }

    #[test]
    fn unrelated_nodes_keep_first_seen_order() {
        let input = strings(&["c.one", "a.two", "b.three", "x.z"]);
        assert_eq!(collation_sort(&input, &graph()), input);
    }

    #[test]
    fn negated_ancestor_still_precedes_descendant_grant() {
        let sorted = collation_sort(&strings(&["x.y.a", "-x.y"]), &graph());
        assert_eq!(sorted, strings(&["-x.y", "x.y.a"]));
    }

    #[test]
    fn catalog_matching_ignores_case() {
        let sorted = collation_sort(&strings(&["-X.Y", "X.*"]), &graph());
        assert_eq!(sorted, strings(&["X.*", "-X.Y"]));
    }

    #[test]
    fn empty_graph_preserves_input() {
        let input = strings(&["-x.y", "x.*"]);
        assert_eq!(collation_sort(&input, &RegisteredPermissionGraph::new()), input);
    }
}
