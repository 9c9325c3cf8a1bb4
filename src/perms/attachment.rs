use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use super::graph::RegisteredPermission;
use super::principal::{EffectivePermissionSet, Principal, SessionId};
use crate::errors::BackendError;

/// Host-side authorization backend.
///
/// The backend owns the catalog of registered permissions and one
/// permission map per live session. Replacing a session's map must be
/// atomic; recalculation is requested once after each replacement.
pub trait AuthorizationBackend: Send + Sync {
    /// Every registered permission with its immediate children
    fn registered_permissions(&self) -> Vec<RegisteredPermission>;

    /// Register `name`, optionally as a child of `parent`
    fn register_permission(&self, name: &str, parent: Option<&str>);

    /// Clear the session's map and fill it with `permissions` in one step
    fn replace_session_permissions(
        &self,
        session: SessionId,
        permissions: &EffectivePermissionSet,
    ) -> Result<(), BackendError>;

    /// Recompute the session's effective permissions after a replacement
    fn recalculate_permissions(&self, session: SessionId) -> Result<(), BackendError>;
}

/// Permission map currently applied to one resident's session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachmentRecord {
    pub principal_id: Uuid,
    pub session: SessionId,
    pub permissions: EffectivePermissionSet,
    pub applied_at: DateTime<Utc>,
}

/// Per-resident cache of applied attachments, keyed by stable id.
pub struct AttachmentCache {
    backend: Arc<dyn AuthorizationBackend>,
    records: Mutex<HashMap<Uuid, AttachmentRecord>>,
}

impl AttachmentCache {
    pub fn new(backend: Arc<dyn AuthorizationBackend>) -> Self {
        Self {
            backend,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn AuthorizationBackend> {
        &self.backend
    }

    /// Replace the resident's session map with `permissions`.
    ///
    /// Returns `Ok(false)` without touching the backend when the resident has
    /// no live session; any stale record is dropped. A failing recalculation
    /// is logged and the attachment still counts as applied.
    pub fn apply(&self, principal: &Principal, permissions: EffectivePermissionSet) -> Result<bool, BackendError> {
        let Some(session) = principal.session else {
            self.evict(principal.id);
            return Ok(false);
        };

        self.backend.replace_session_permissions(session, &permissions)?;

        if let Err(err) = self.backend.recalculate_permissions(session) {
            tracing::warn!(
                principal_id = %principal.id,
                session = %session,
                error = %err,
                "permission recalculation failed"
            );
        }

        let record = AttachmentRecord {
            principal_id: principal.id,
            session,
            permissions,
            applied_at: Utc::now(),
        };
        self.records.lock().insert(principal.id, record);

        tracing::debug!(principal_id = %principal.id, session = %session, "attachment applied");
        Ok(true)
    }

    /// Apply each resident's set independently; returns how many were applied.
    pub fn bulk_apply<'a, I>(&self, batch: I) -> usize
    where
        I: IntoIterator<Item = (&'a Principal, EffectivePermissionSet)>,
    {
        let mut applied = 0;
        for (principal, permissions) in batch {
            match self.apply(principal, permissions) {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(err) => tracing::error!(
                    principal_id = %principal.id,
                    error = %err,
                    "failed to apply attachment"
                ),
            }
        }
        applied
    }

    /// Forget the resident's attachment; no-op when absent.
    pub fn evict(&self, principal_id: Uuid) -> Option<AttachmentRecord> {
        let removed = self.records.lock().remove(&principal_id);
        if removed.is_some() {
            tracing::debug!(principal_id = %principal_id, "attachment evicted");
        }
        removed
    }

    pub fn record(&self, principal_id: Uuid) -> Option<AttachmentRecord> {
        self.records.lock().get(&principal_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perms::InMemoryBackend;

    struct FlakyBackend {
        inner: InMemoryBackend,
        fail_replace: bool,
    }

    impl AuthorizationBackend for FlakyBackend {
        fn registered_permissions(&self) -> Vec<RegisteredPermission> {
            self.inner.registered_permissions()
        }

        fn register_permission(&self, name: &str, parent: Option<&str>) {
            self.inner.register_permission(name, parent)
        }

        fn replace_session_permissions(
            &self,
            session: SessionId,
            permissions: &EffectivePermissionSet,
        ) -> Result<(), BackendError> {
            if self.fail_replace {
                return Err(BackendError::new("session map locked"));
            }
            self.inner.replace_session_permissions(session, permissions)
        }

        fn recalculate_permissions(&self, _session: SessionId) -> Result<(), BackendError> {
            Err(BackendError::new("recalculation hook exploded"))
        }
    }

    fn set(items: &[(&str, bool)]) -> EffectivePermissionSet {
        items.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn apply_replaces_wholesale() {
        let backend = Arc::new(InMemoryBackend::new());
        let cache = AttachmentCache::new(backend.clone());
        let session = SessionId::new();
        let principal = Principal::new(Uuid::new_v4(), "alice").with_session(session);

        assert!(cache.apply(&principal, set(&[("a", true), ("b", true)])).unwrap());
        assert!(cache.apply(&principal, set(&[("b", false)])).unwrap());

        let record = cache.record(principal.id).unwrap();
        assert_eq!(record.permissions, set(&[("b", false)]));
        assert_eq!(backend.session_permissions(session), Some(set(&[("b", false)])));
        assert_eq!(backend.recalculations(session), 2);
    }

    #[test]
    fn apply_without_session_evicts_and_skips_backend() {
        let backend = Arc::new(InMemoryBackend::new());
        let cache = AttachmentCache::new(backend.clone());
        let session = SessionId::new();
        let online = Principal::new(Uuid::new_v4(), "bob").with_session(session);
        cache.apply(&online, set(&[("a", true)])).unwrap();

        let mut offline = online.clone();
        offline.session = None;
        assert!(!cache.apply(&offline, set(&[("a", true)])).unwrap());
        assert!(cache.record(online.id).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn recalculation_failure_is_not_fatal() {
        let cache = AttachmentCache::new(Arc::new(FlakyBackend { inner: InMemoryBackend::new(), fail_replace: false }));
        let principal = Principal::new(Uuid::new_v4(), "carol").with_session(SessionId::new());

        assert!(cache.apply(&principal, set(&[("a", true)])).unwrap());
        assert!(cache.record(principal.id).is_some());
    }

    #[test]
    fn replace_failure_leaves_cache_untouched() {
        let cache = AttachmentCache::new(Arc::new(FlakyBackend { inner: InMemoryBackend::new(), fail_replace: true }));
        let principal = Principal::new(Uuid::new_v4(), "dave").with_session(SessionId::new());

        assert!(cache.apply(&principal, set(&[("a", true)])).is_err());
        assert!(cache.record(principal.id).is_none());
    }

    #[test]
    fn bulk_apply_counts_live_sessions_only() {
        let cache = AttachmentCache::new(Arc::new(InMemoryBackend::new()));
        let online = Principal::new(Uuid::new_v4(), "erin").with_session(SessionId::new());
        let offline = Principal::new(Uuid::new_v4(), "frank");

        let applied = cache.bulk_apply([(&online, set(&[("a", true)])), (&offline, set(&[("a", true)]))]);
        assert_eq!(applied, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evict_is_a_noop_when_absent() {
        let cache = AttachmentCache::new(Arc::new(InMemoryBackend::new()));
        assert!(cache.evict(Uuid::new_v4()).is_none());
    }
}
