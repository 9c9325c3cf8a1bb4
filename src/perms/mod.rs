//! Permission resolution engine
//!
//! Turns a resident's memberships into an ordered grant/deny map and keeps
//! the authorization backend's per-session maps in sync with it:
//! - policy document loading with vital-group validation and atomic reload
//! - town and nation rank registry
//! - parent/child collation over the backend's permission catalog
//! - placeholder and negation resolution
//! - per-session attachment cache

mod attachment;
mod backend;
mod collate;
mod document;
mod graph;
mod principal;
mod ranks;
mod resolver;
mod service;
mod store;

pub use attachment::{AttachmentCache, AttachmentRecord, AuthorizationBackend};
pub use backend::InMemoryBackend;
pub use collate::collation_sort;
pub use document::{Group, PolicyDocument};
pub use graph::{RegisteredPermission, RegisteredPermissionGraph};
pub use principal::{EffectivePermissionSet, Principal, PrincipalDirectory, SessionId, TownMembership};
pub use ranks::RankRegistry;
pub use resolver::ResolutionEngine;
pub use service::PermissionService;
pub use store::{PermissionStore, PolicySource, DEFAULT_POLICY};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::PermsError;

/// Well-known group paths
pub mod groups {
    pub const NOMAD: &str = "nomad";
    pub const TOWN_DEFAULT: &str = "towns.default";
    pub const TOWN_MAYOR: &str = "towns.mayor";
    pub const TOWN_RANKS: &str = "towns.ranks";
    pub const NATION_DEFAULT: &str = "nations.default";
    pub const NATION_KING: &str = "nations.king";
    pub const NATION_RANKS: &str = "nations.ranks";

    /// Groups the engine cannot start without
    pub const VITAL: [&str; 7] = [
        NOMAD,
        TOWN_DEFAULT,
        TOWN_MAYOR,
        TOWN_RANKS,
        NATION_DEFAULT,
        NATION_KING,
        NATION_RANKS,
    ];
}

/// Nodes synthesized by the engine rather than read from the document
pub mod nodes {
    pub const TOWNLESS: &str = "towny.townless";
    pub const TOWN_PREFIX: &str = "towny.town.";
    pub const TOWN_RANK_PARENT: &str = "towny.command.town.rank.*";
    pub const NATION_RANK_PARENT: &str = "towny.command.nation.rank.*";

    pub const TOWN_NAME_PLACEHOLDER: &str = "{townname}";
    pub const NATION_NAME_PLACEHOLDER: &str = "{nationname}";

    pub const NEGATION: char = '-';

    /// `towny.town.<name>` for the given town, lowercased
    pub fn town(name: &str) -> String {
        format!("{}{}", TOWN_PREFIX, name.to_lowercase())
    }

    /// Permission allowing a resident to hand out the given rank
    pub fn rank_grant(parent: &str, rank: &str) -> String {
        parent.replace('*', rank)
    }

    /// Strip the negation marker, if any
    pub fn bare(node: &str) -> &str {
        node.strip_prefix(NEGATION).unwrap_or(node)
    }

    /// Case-insensitive comparison using full Unicode lowercasing
    pub fn same(a: &str, b: &str) -> bool {
        a == b || a.to_lowercase() == b.to_lowercase()
    }
}

/// Scope a rank lives under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankScope {
    Town,
    Nation,
}

impl RankScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankScope::Town => "town",
            RankScope::Nation => "nation",
        }
    }

    /// Section holding this scope's ranks, e.g. `towns.ranks`
    pub fn ranks_group(&self) -> &'static str {
        match self {
            RankScope::Town => groups::TOWN_RANKS,
            RankScope::Nation => groups::NATION_RANKS,
        }
    }

    /// Full group path of a rank, e.g. `towns.ranks.sheriff`
    pub fn rank_group(&self, rank: &str) -> String {
        format!("{}.{}", self.ranks_group(), rank)
    }

    /// Parent identifier rank grant permissions are registered under
    pub fn rank_permission_parent(&self) -> &'static str {
        match self {
            RankScope::Town => nodes::TOWN_RANK_PARENT,
            RankScope::Nation => nodes::NATION_RANK_PARENT,
        }
    }
}

impl fmt::Display for RankScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RankScope {
    type Err = PermsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "town" | "towns" | "townrank" => Ok(RankScope::Town),
            "nation" | "nations" | "nationrank" => Ok(RankScope::Nation),
            other => Err(PermsError::UnknownScope(other.to_string())),
        }
    }
}
