use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::errors::PermsResult;

/// Handle of a live session in the authorization backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Town a resident belongs to, and the nation that town belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TownMembership {
    pub name: String,
    #[serde(default)]
    pub nation: Option<String>,
}

/// A resident whose effective permissions are computed.
///
/// Nation membership is only reachable through the town. Leadership flags
/// that contradict membership are ignored rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub town: Option<TownMembership>,
    #[serde(default)]
    pub mayor: bool,
    #[serde(default)]
    pub king: bool,
    #[serde(default)]
    pub town_ranks: Vec<String>,
    #[serde(default)]
    pub nation_ranks: Vec<String>,
    #[serde(default)]
    pub session: Option<SessionId>,
}

impl Principal {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            town: None,
            mayor: false,
            king: false,
            town_ranks: Vec::new(),
            nation_ranks: Vec::new(),
            session: None,
        }
    }

    pub fn with_town(mut self, town: impl Into<String>) -> Self {
        self.town = Some(TownMembership { name: town.into(), nation: None });
        self
    }

    /// Attach the current town to a nation. No-op without a town.
    pub fn with_nation(mut self, nation: impl Into<String>) -> Self {
        if let Some(town) = self.town.as_mut() {
            town.nation = Some(nation.into());
        }
        self
    }

    pub fn with_mayor(mut self, mayor: bool) -> Self {
        self.mayor = mayor;
        self
    }

    pub fn with_king(mut self, king: bool) -> Self {
        self.king = king;
        self
    }

    pub fn with_town_ranks(mut self, ranks: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.town_ranks = ranks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_nation_ranks(mut self, ranks: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.nation_ranks = ranks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    pub fn town_name(&self) -> Option<&str> {
        self.town.as_ref().map(|town| town.name.as_str())
    }

    pub fn nation_name(&self) -> Option<&str> {
        self.town.as_ref().and_then(|town| town.nation.as_deref())
    }

    pub fn has_town(&self) -> bool {
        self.town.is_some()
    }

    pub fn has_nation(&self) -> bool {
        self.nation_name().is_some()
    }

    pub fn is_mayor(&self) -> bool {
        self.mayor && self.has_town()
    }

    pub fn is_king(&self) -> bool {
        self.king && self.has_nation()
    }

    pub fn is_online(&self) -> bool {
        self.session.is_some()
    }
}

/// Ordered permission → granted map.
///
/// Inserting an existing key overwrites its value but keeps the position it
/// was first inserted at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectivePermissionSet {
    entries: Vec<(String, bool)>,
    index: HashMap<String, usize>,
}

impl EffectivePermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, permission: impl Into<String>, granted: bool) {
        let permission = permission.into();
        match self.index.get(&permission) {
            Some(&idx) => self.entries[idx].1 = granted,
            None => {
                self.index.insert(permission.clone(), self.entries.len());
                self.entries.push((permission, granted));
            }
        }
    }

    pub fn get(&self, permission: &str) -> Option<bool> {
        self.index.get(permission).map(|&idx| self.entries[idx].1)
    }

    pub fn contains_key(&self, permission: &str) -> bool {
        self.index.contains_key(permission)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.entries.iter().map(|(permission, granted)| (permission.as_str(), *granted))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(permission, _)| permission.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, bool)> for EffectivePermissionSet {
    fn from_iter<I: IntoIterator<Item = (K, bool)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (permission, granted) in iter {
            set.insert(permission, granted);
        }
        set
    }
}

impl Serialize for EffectivePermissionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (permission, granted) in &self.entries {
            map.serialize_entry(permission, granted)?;
        }
        map.end()
    }
}

/// Where resident memberships and live sessions come from
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    async fn principal(&self, id: Uuid) -> PermsResult<Option<Principal>>;

    /// Residents that currently hold a live session
    async fn online_principals(&self) -> PermsResult<Vec<Principal>>;

    /// Members of the given town, matched case-insensitively
    async fn town_residents(&self, town: &str) -> PermsResult<Vec<Principal>>;

    /// Members of every town in the given nation, matched case-insensitively
    async fn nation_residents(&self, nation: &str) -> PermsResult<Vec<Principal>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leadership_flags_degrade_without_membership() {
        let townless_mayor = Principal::new(Uuid::new_v4(), "drifter").with_mayor(true).with_king(true);
        assert!(!townless_mayor.is_mayor());
        assert!(!townless_mayor.is_king());

        let king_without_nation = Principal::new(Uuid::new_v4(), "pretender").with_town("Sparta").with_king(true);
        assert!(!king_without_nation.is_king());
        assert!(!king_without_nation.has_nation());

        let king = king_without_nation.with_nation("Hellas");
        assert!(king.is_king());
        assert_eq!(king.nation_name(), Some("Hellas"));
    }

    #[test]
    fn nation_requires_a_town() {
        let principal = Principal::new(Uuid::new_v4(), "nomad").with_nation("Hellas");
        assert!(!principal.has_nation());
    }

    #[test]
    fn reinsert_overwrites_in_place() {
        let mut set = EffectivePermissionSet::new();
        set.insert("a", true);
        set.insert("b", true);
        set.insert("a", false);

        assert_eq!(set.iter().collect::<Vec<_>>(), vec![("a", false), ("b", true)]);
        assert_eq!(set.get("a"), Some(false));
        assert_eq!(set.get("c"), None);
    }

    #[test]
    fn serializes_as_ordered_object() {
        let set: EffectivePermissionSet = [("z.node", true), ("a.node", false)].into_iter().collect();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"{"z.node":true,"a.node":false}"#);
    }
}
