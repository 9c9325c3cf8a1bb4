use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use super::attachment::AttachmentCache;
use super::collate::collation_sort;
use super::document::PolicyDocument;
use super::graph::RegisteredPermissionGraph;
use super::principal::{EffectivePermissionSet, Principal};
use super::ranks::RankRegistry;
use super::store::PermissionStore;
use super::{groups, nodes, RankScope};
use crate::errors::BackendError;

/// Composes a resident's groups and ranks into a final grant/deny map.
///
/// Resolution order:
/// 1. `nomad`
/// 2. no town -> `towny.townless`
/// 3. town -> `towns.default` + `towny.town.<town>`, mayor, town ranks
/// 4. nation -> `nations.default`, king, nation ranks
/// 5. dedupe, collate ancestors first, resolve placeholders and negations
pub struct ResolutionEngine {
    store: Arc<PermissionStore>,
    cache: Arc<AttachmentCache>,
    graph: RwLock<Arc<RegisteredPermissionGraph>>,
}

impl ResolutionEngine {
    pub fn new(store: Arc<PermissionStore>, cache: Arc<AttachmentCache>) -> Self {
        Self {
            store,
            cache,
            graph: RwLock::new(Arc::new(RegisteredPermissionGraph::new())),
        }
    }

    pub fn graph(&self) -> Arc<RegisteredPermissionGraph> {
        self.graph.read().clone()
    }

    /// Swap in a new catalog snapshot
    pub fn set_graph(&self, graph: RegisteredPermissionGraph) {
        *self.graph.write() = Arc::new(graph);
    }

    pub fn compute_effective_permissions(&self, principal: &Principal) -> EffectivePermissionSet {
        let document = self.store.document();
        let raw = raw_nodes(&document, principal);
        let sorted = collation_sort(&raw, &self.graph());
        let permissions = resolve(&sorted, principal);

        tracing::debug!(
            principal_id = %principal.id,
            raw = raw.len(),
            resolved = permissions.len(),
            "computed effective permissions"
        );
        permissions
    }

    /// Compute and, for a live session, replace the attachment.
    ///
    /// Returns whether an attachment was applied. Offline residents get
    /// nothing materialised; a stale record is evicted instead.
    pub fn assign(&self, principal: &Principal) -> Result<bool, BackendError> {
        if !principal.is_online() {
            self.cache.evict(principal.id);
            return Ok(false);
        }
        let permissions = self.compute_effective_permissions(principal);
        self.cache.apply(principal, permissions)
    }
}

/// Steps 1-5: gather the applicable raw nodes, first encounter wins.
fn raw_nodes(document: &PolicyDocument, principal: &Principal) -> Vec<String> {
    let mut collector = NodeCollector::default();
    collector.extend(document.group_nodes(groups::NOMAD));

    let Some(town) = principal.town_name() else {
        collector.push(nodes::TOWNLESS);
        return collector.nodes;
    };

    collector.extend(document.group_nodes(groups::TOWN_DEFAULT));
    collector.push(&nodes::town(town));
    if principal.is_mayor() {
        collector.extend(document.group_nodes(groups::TOWN_MAYOR));
    }
    for rank in &principal.town_ranks {
        collector.extend_rank(document, RankScope::Town, rank);
    }

    if principal.has_nation() {
        collector.extend(document.group_nodes(groups::NATION_DEFAULT));
        if principal.is_king() {
            collector.extend(document.group_nodes(groups::NATION_KING));
        }
        for rank in &principal.nation_ranks {
            collector.extend_rank(document, RankScope::Nation, rank);
        }
    }

    collector.nodes
}

#[derive(Default)]
struct NodeCollector {
    nodes: Vec<String>,
    seen: HashSet<String>,
}

impl NodeCollector {
    fn push(&mut self, node: &str) {
        if self.seen.insert(node.to_string()) {
            self.nodes.push(node.to_string());
        }
    }

    fn extend(&mut self, nodes: &[String]) {
        for node in nodes {
            self.push(node);
        }
    }

    fn extend_rank(&mut self, document: &PolicyDocument, scope: RankScope, held: &str) {
        match RankRegistry::match_in(document, scope, held) {
            Some(rank) => self.extend(document.group_nodes(&scope.rank_group(&rank))),
            None => tracing::debug!(scope = %scope, rank = %held, "held rank no longer exists"),
        }
    }
}

/// Steps 6-8: walk the sorted nodes into the final map.
fn resolve(sorted: &[String], principal: &Principal) -> EffectivePermissionSet {
    let mut permissions = EffectivePermissionSet::new();

    for node in sorted {
        if node.contains(nodes::TOWN_NAME_PLACEHOLDER) {
            if let Some(town) = principal.town_name() {
                permissions.insert(node.replace(nodes::TOWN_NAME_PLACEHOLDER, &town.to_lowercase()), true);
            }
        } else if node.contains(nodes::NATION_NAME_PLACEHOLDER) {
            if let Some(nation) = principal.nation_name() {
                permissions.insert(node.replace(nodes::NATION_NAME_PLACEHOLDER, &nation.to_lowercase()), true);
            }
        } else {
            match node.strip_prefix(nodes::NEGATION) {
                Some(bare) => permissions.insert(bare, false),
                None => permissions.insert(node.as_str(), true),
            }
        }
    }

    permissions
}
