use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use super::attachment::AuthorizationBackend;
use super::graph::{RegisteredPermission, RegisteredPermissionGraph};
use super::nodes;
use super::principal::{EffectivePermissionSet, SessionId};
use crate::errors::BackendError;

#[derive(Debug, Default)]
struct SessionState {
    attached: EffectivePermissionSet,
    effective: HashMap<String, bool>,
    recalculations: u64,
}

/// In-process authorization backend.
///
/// Recalculation expands every attached node into its registered
/// descendants in attachment order, so a later, more specific node
/// overrides what an earlier, broader one implied.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    catalog: RwLock<Vec<RegisteredPermission>>,
    sessions: RwLock<HashMap<SessionId, SessionState>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: impl IntoIterator<Item = RegisteredPermission>) -> Self {
        Self {
            catalog: RwLock::new(catalog.into_iter().collect()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Map currently attached to the session, as last replaced
    pub fn session_permissions(&self, session: SessionId) -> Option<EffectivePermissionSet> {
        self.sessions.read().get(&session).map(|state| state.attached.clone())
    }

    pub fn recalculations(&self, session: SessionId) -> u64 {
        self.sessions.read().get(&session).map_or(0, |state| state.recalculations)
    }

    /// Effective value after the last recalculation; `None` when the node is
    /// neither attached nor implied.
    pub fn has_permission(&self, session: SessionId, node: &str) -> Option<bool> {
        self.sessions
            .read()
            .get(&session)
            .and_then(|state| state.effective.get(&node.to_lowercase()).copied())
    }

    /// Drop everything held for the session
    pub fn end_session(&self, session: SessionId) -> bool {
        self.sessions.write().remove(&session).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

impl AuthorizationBackend for InMemoryBackend {
    fn registered_permissions(&self) -> Vec<RegisteredPermission> {
        self.catalog.read().clone()
    }

    fn register_permission(&self, name: &str, parent: Option<&str>) {
        let mut catalog = self.catalog.write();

        if !catalog.iter().any(|perm| nodes::same(&perm.name, name)) {
            catalog.push(RegisteredPermission::new(name));
        }

        if let Some(parent) = parent {
            let idx = match catalog.iter().position(|perm| nodes::same(&perm.name, parent)) {
                Some(idx) => idx,
                None => {
                    catalog.push(RegisteredPermission::new(parent));
                    catalog.len() - 1
                }
            };
            let children = &mut catalog[idx].children;
            if !children.iter().any(|child| nodes::same(child, name)) {
                children.push(name.to_string());
            }
        }
    }

    fn replace_session_permissions(
        &self,
        session: SessionId,
        permissions: &EffectivePermissionSet,
    ) -> Result<(), BackendError> {
        let mut sessions = self.sessions.write();
        let state = sessions.entry(session).or_default();
        state.attached = permissions.clone();
        Ok(())
    }

    fn recalculate_permissions(&self, session: SessionId) -> Result<(), BackendError> {
        let graph = RegisteredPermissionGraph::from_catalog(self.registered_permissions());
        let mut sessions = self.sessions.write();
        let state = sessions
            .get_mut(&session)
            .ok_or_else(|| BackendError::new(format!("unknown session {session}")))?;

        let no_negations = HashSet::new();
        let mut effective = HashMap::new();
        for (node, granted) in state.attached.iter() {
            effective.insert(node.to_lowercase(), granted);
            for descendant in graph.all_descendants(node, &no_negations) {
                effective.insert(descendant, granted);
            }
        }

        state.effective = effective;
        state.recalculations += 1;
        Ok(())
    }
}
