use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use super::attachment::{AttachmentCache, AttachmentRecord, AuthorizationBackend};
use super::graph::RegisteredPermissionGraph;
use super::principal::{EffectivePermissionSet, Principal, PrincipalDirectory};
use super::ranks::RankRegistry;
use super::resolver::ResolutionEngine;
use super::store::PermissionStore;
use super::{nodes, RankScope};
use crate::errors::PermsResult;

/// Entry point tying the policy store, rank registry, resolution engine and
/// attachment cache together.
///
/// Startup runs in two phases: [`PermissionService::new`] serves an already
/// loaded policy, then [`PermissionService::register_rank_permissions`]
/// registers rank grant permissions once the backend catalog is available.
/// `assign` calls for the same resident are serialised.
pub struct PermissionService {
    store: Arc<PermissionStore>,
    ranks: RankRegistry,
    cache: Arc<AttachmentCache>,
    engine: ResolutionEngine,
    directory: Arc<dyn PrincipalDirectory>,
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
    degraded: RwLock<Option<String>>,
}

impl PermissionService {
    pub fn new(
        store: Arc<PermissionStore>,
        backend: Arc<dyn AuthorizationBackend>,
        directory: Arc<dyn PrincipalDirectory>,
    ) -> Self {
        let cache = Arc::new(AttachmentCache::new(backend));
        Self {
            ranks: RankRegistry::new(store.clone()),
            engine: ResolutionEngine::new(store.clone(), cache.clone()),
            store,
            cache,
            directory,
            locks: Mutex::new(HashMap::new()),
            degraded: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &Arc<PermissionStore> {
        &self.store
    }

    pub fn ranks(&self) -> &RankRegistry {
        &self.ranks
    }

    pub fn engine(&self) -> &ResolutionEngine {
        &self.engine
    }

    pub fn cache(&self) -> &Arc<AttachmentCache> {
        &self.cache
    }

    /// Last reload failure, while the previous policy is still being served
    pub fn degraded(&self) -> Option<String> {
        self.degraded.read().clone()
    }

    /// Register `towny.command.<scope>.rank.<rank>` for every rank, then
    /// refresh the catalog snapshot. Returns how many were registered.
    pub fn register_rank_permissions(&self) -> usize {
        let backend = self.cache.backend();
        let mut registered = 0;
        for scope in [RankScope::Town, RankScope::Nation] {
            let parent = scope.rank_permission_parent();
            for rank in self.ranks.ranks(scope) {
                backend.register_permission(&nodes::rank_grant(parent, &rank), Some(parent));
                registered += 1;
            }
        }
        self.refresh_catalog();
        tracing::info!(registered, "rank permissions registered");
        registered
    }

    /// Rebuild the parent/child graph from the backend catalog
    pub fn refresh_catalog(&self) {
        let graph = RegisteredPermissionGraph::from_catalog(self.cache.backend().registered_permissions());
        tracing::debug!(permissions = graph.len(), "permission catalog refreshed");
        self.engine.set_graph(graph);
    }

    fn principal_lock(&self, id: Uuid) -> Arc<AsyncMutex<()>> {
        self.locks.lock().entry(id).or_default().clone()
    }

    async fn lock_principal(&self, id: Uuid) -> OwnedMutexGuard<()> {
        self.principal_lock(id).lock_owned().await
    }

    /// Drop lock entries nobody holds or waits on. Clones are only taken
    /// under the map lock, so a count of one means the map owns the last one.
    fn release(&self, ids: &[Uuid]) {
        let mut locks = self.locks.lock();
        for id in ids {
            if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(id);
            }
        }
    }

    /// Recompute and apply for a resident the caller already holds.
    pub async fn assign(&self, principal: &Principal) -> PermsResult<bool> {
        let applied = {
            let _guard = self.lock_principal(principal.id).await;
            self.engine.assign(principal)
        };
        self.release(&[principal.id]);
        Ok(applied?)
    }

    /// Look the resident up and recompute. Unknown residents lose any cached
    /// attachment.
    pub async fn assign_by_id(&self, id: Uuid) -> PermsResult<bool> {
        Ok(self.reassign(id).await?.is_some_and(|(_, attached)| attached))
    }

    /// Like [`Self::assign_by_id`], returning the resident as read under the
    /// lock along with whether an attachment was applied.
    pub async fn reassign(&self, id: Uuid) -> PermsResult<Option<(Principal, bool)>> {
        let result = {
            let _guard = self.lock_principal(id).await;
            self.reassign_locked(id).await
        };
        self.release(&[id]);
        result
    }

    async fn reassign_locked(&self, id: Uuid) -> PermsResult<Option<(Principal, bool)>> {
        match self.directory.principal(id).await? {
            Some(principal) => {
                let attached = self.engine.assign(&principal)?;
                Ok(Some((principal, attached)))
            }
            None => {
                self.cache.evict(id);
                Ok(None)
            }
        }
    }

    pub async fn session_started(&self, id: Uuid) -> PermsResult<bool> {
        tracing::debug!(principal_id = %id, "session started");
        self.assign_by_id(id).await
    }

    pub async fn session_ended(&self, id: Uuid) -> Option<AttachmentRecord> {
        let removed = {
            let _guard = self.lock_principal(id).await;
            self.cache.evict(id)
        };
        self.release(&[id]);
        removed
    }

    /// Compute without materialising anything; `None` for unknown residents.
    pub async fn effective_permissions(&self, id: Uuid) -> PermsResult<Option<EffectivePermissionSet>> {
        let principal = self.directory.principal(id).await?;
        Ok(principal.map(|principal| self.engine.compute_effective_permissions(&principal)))
    }

    pub async fn update_online(&self) -> PermsResult<usize> {
        let principals = self.directory.online_principals().await?;
        self.refresh(principals.iter().map(|p| p.id).collect()).await
    }

    pub async fn update_town(&self, town: &str) -> PermsResult<usize> {
        let principals = self.directory.town_residents(town).await?;
        self.refresh(principals.iter().map(|p| p.id).collect()).await
    }

    pub async fn update_nation(&self, nation: &str) -> PermsResult<usize> {
        let principals = self.directory.nation_residents(nation).await?;
        self.refresh(principals.iter().map(|p| p.id).collect()).await
    }

    /// Re-apply for a set of residents. Locks are taken in id order and the
    /// residents are re-read under them, so a concurrent single assign never
    /// interleaves with the bulk one.
    async fn refresh(&self, mut ids: Vec<Uuid>) -> PermsResult<usize> {
        ids.sort();
        ids.dedup();

        let applied = {
            let mut guards = Vec::with_capacity(ids.len());
            for id in &ids {
                guards.push(self.lock_principal(*id).await);
            }
            self.refresh_locked(&ids).await
        };
        self.release(&ids);

        let applied = applied?;
        tracing::debug!(requested = ids.len(), applied, "attachments refreshed");
        Ok(applied)
    }

    async fn refresh_locked(&self, ids: &[Uuid]) -> PermsResult<usize> {
        let mut principals = Vec::with_capacity(ids.len());
        for id in ids {
            match self.directory.principal(*id).await? {
                Some(principal) => principals.push(principal),
                None => {
                    self.cache.evict(*id);
                }
            }
        }

        let batch: Vec<_> = principals
            .iter()
            .map(|principal| (principal, self.engine.compute_effective_permissions(principal)))
            .collect();
        Ok(self.cache.bulk_apply(batch))
    }

    /// Re-read the policy document. On failure the previous document keeps
    /// being served and the service reports itself degraded.
    pub async fn reload(&self) -> PermsResult<usize> {
        match self.store.reload() {
            Ok(_) => {
                *self.degraded.write() = None;
                self.register_rank_permissions();
                self.update_online().await
            }
            Err(err) => {
                tracing::error!(error = %err, "policy reload failed, keeping previous document");
                *self.degraded.write() = Some(err.to_string());
                Err(err)
            }
        }
    }

    pub async fn add_node(&self, group: &str, node: &str) -> PermsResult<usize> {
        self.store.add_node(group, node)?;
        tracing::info!(group, node, "node added to group");
        self.update_online().await
    }

    pub async fn remove_node(&self, group: &str, node: &str) -> PermsResult<usize> {
        self.store.remove_node(group, node)?;
        tracing::info!(group, node, "node removed from group");
        self.update_online().await
    }

    pub async fn create_rank(&self, scope: RankScope, name: &str) -> PermsResult<String> {
        let rank = self.ranks.create_rank(scope, name)?;
        self.register_rank_permissions();
        self.update_online().await?;
        Ok(rank)
    }

    pub async fn delete_rank(&self, scope: RankScope, name: &str) -> PermsResult<String> {
        let rank = self.ranks.delete_rank(scope, name)?;
        self.refresh_catalog();
        self.update_online().await?;
        Ok(rank)
    }
}
