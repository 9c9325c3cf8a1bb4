use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::perms::{EffectivePermissionSet, RankScope};

#[derive(Debug, Serialize)]
pub struct GroupList {
    pub fingerprint: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct GroupNodes {
    pub group: String,
    pub nodes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct NodeRequest {
    pub node: String,
}

#[derive(Debug, Serialize)]
pub struct RankList {
    pub scope: RankScope,
    pub ranks: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RankRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct RankResponse {
    pub scope: RankScope,
    pub name: String,
}

/// Outcome of a policy change: how many live sessions were re-applied and
/// the fingerprint of the document now served.
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub applied: usize,
    pub fingerprint: String,
}

#[derive(Debug, Serialize)]
pub struct EffectivePermissions {
    pub principal_id: Uuid,
    pub permissions: EffectivePermissionSet,
}

/// Audit entry for one change to the served policy
#[derive(Debug, Clone, Serialize)]
pub struct PolicyChange {
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub fingerprint: String,
}

impl PolicyChange {
    pub fn new(target: impl Into<String>, detail: Option<String>, fingerprint: impl Into<String>) -> Self {
        Self { target: target.into(), detail, fingerprint: fingerprint.into() }
    }
}

impl crate::events::Loggable for PolicyChange {
    fn entity_type() -> &'static str {
        "policy"
    }

    fn subject(&self) -> String {
        self.target.clone()
    }

    fn fingerprint(&self) -> String {
        self.fingerprint.clone()
    }
}
