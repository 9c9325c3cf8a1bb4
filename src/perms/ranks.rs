use std::sync::Arc;

use super::document::{Group, PolicyDocument};
use super::store::PermissionStore;
use super::{nodes, RankScope};
use crate::errors::{PermsError, PermsResult};

/// Named town and nation ranks declared in the policy document.
#[derive(Debug, Clone)]
pub struct RankRegistry {
    store: Arc<PermissionStore>,
}

impl RankRegistry {
    pub fn new(store: Arc<PermissionStore>) -> Self {
        Self { store }
    }

    /// Canonical rank names in declaration order
    pub fn ranks(&self, scope: RankScope) -> Vec<String> {
        self.store
            .document()
            .children(scope.ranks_group())
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn town_ranks(&self) -> Vec<String> {
        self.ranks(RankScope::Town)
    }

    pub fn nation_ranks(&self) -> Vec<String> {
        self.ranks(RankScope::Nation)
    }

    /// Case-insensitive lookup of user input, returning the stored name.
    pub fn match_rank(&self, scope: RankScope, input: &str) -> Option<String> {
        Self::match_in(&self.store.document(), scope, input)
    }

    /// [`Self::match_rank`] against a specific snapshot
    pub fn match_in(document: &PolicyDocument, scope: RankScope, input: &str) -> Option<String> {
        let input = input.trim();
        document
            .children(scope.ranks_group())
            .into_iter()
            .find(|rank| nodes::same(rank, input))
            .map(str::to_string)
    }

    pub fn rank_permissions(&self, scope: RankScope, rank: &str) -> Vec<String> {
        self.store.group_nodes(&scope.rank_group(rank))
    }

    /// Add an empty rank under the scope. Returns the stored name.
    pub fn create_rank(&self, scope: RankScope, name: &str) -> PermsResult<String> {
        let name = name.trim();
        if name.is_empty() || name.contains('.') || name.chars().any(char::is_whitespace) {
            return Err(PermsError::InvalidRankName(name.to_string()));
        }

        self.store.update(|document| {
            if Self::match_in(document, scope, name).is_some() {
                return Err(PermsError::DuplicateRank { scope, name: name.to_string() });
            }
            document.insert_group(&scope.rank_group(name), Group::Nodes(Vec::new()))
        })?;

        tracing::info!(scope = %scope, rank = %name, "rank created");
        Ok(name.to_string())
    }

    /// Remove a rank and its node list. Returns the stored name.
    pub fn delete_rank(&self, scope: RankScope, name: &str) -> PermsResult<String> {
        let mut removed = None;
        self.store.update(|document| {
            let canonical = Self::match_in(document, scope, name)
                .ok_or_else(|| PermsError::UnknownRank { scope, name: name.to_string() })?;
            document.remove_group(&scope.rank_group(&canonical));
            removed = Some(canonical);
            Ok(())
        })?;

        let removed = removed.unwrap_or_else(|| name.to_string());
        tracing::info!(scope = %scope, rank = %removed, "rank deleted");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"
nomad: []
towns:
  default: []
  mayor: []
  ranks:
    assistant: [towny.command.town.rank.vip]
    Sheriff: [jail.use]
nations:
  default: []
  king: []
  ranks:
    diplomat: [nation.ally]
"#;

    fn registry() -> RankRegistry {
        RankRegistry::new(Arc::new(PermissionStore::from_yaml(POLICY).unwrap()))
    }

    #[test]
    fn lists_ranks_in_declaration_order() {
        let registry = registry();
        assert_eq!(registry.town_ranks(), vec!["assistant", "Sheriff"]);
        assert_eq!(registry.nation_ranks(), vec!["diplomat"]);
    }

    #[test]
    fn match_rank_is_case_insensitive_and_returns_stored_name() {
        let registry = registry();
        assert_eq!(registry.match_rank(RankScope::Town, "Assistant").as_deref(), Some("assistant"));
        assert_eq!(registry.match_rank(RankScope::Town, "sheriff").as_deref(), Some("Sheriff"));
        assert_eq!(registry.match_rank(RankScope::Nation, "sheriff"), None);
    }

    #[test]
    fn rank_permissions_read_the_rank_group() {
        let registry = registry();
        assert_eq!(registry.rank_permissions(RankScope::Nation, "diplomat"), ["nation.ally"]);
        assert!(registry.rank_permissions(RankScope::Town, "ghost").is_empty());
    }

    #[test]
    fn create_rank_rejects_case_insensitive_duplicates() {
        let registry = registry();
        let err = registry.create_rank(RankScope::Town, "SHERIFF").unwrap_err();
        assert!(matches!(err, PermsError::DuplicateRank { scope: RankScope::Town, .. }));
        assert_eq!(registry.town_ranks().len(), 2);

        registry.create_rank(RankScope::Town, "Donator").unwrap();
        assert_eq!(registry.town_ranks(), vec!["assistant", "Sheriff", "Donator"]);
        assert!(registry.rank_permissions(RankScope::Town, "Donator").is_empty());
    }

    #[test]
    fn non_ascii_rank_names_match_case_insensitively() {
        let registry = registry();
        registry.create_rank(RankScope::Town, "Ärzte").unwrap();

        assert_eq!(registry.match_rank(RankScope::Town, "ÄRZTE").as_deref(), Some("Ärzte"));
        let err = registry.create_rank(RankScope::Town, "ärzte").unwrap_err();
        assert!(matches!(err, PermsError::DuplicateRank { scope: RankScope::Town, .. }));
        assert_eq!(registry.town_ranks(), vec!["assistant", "Sheriff", "Ärzte"]);

        assert_eq!(registry.delete_rank(RankScope::Town, "ärzte").unwrap(), "Ärzte");
    }

    #[test]
    fn create_rank_rejects_dotted_or_blank_names() {
        let registry = registry();
        assert!(matches!(registry.create_rank(RankScope::Town, "a.b"), Err(PermsError::InvalidRankName(_))));
        assert!(matches!(registry.create_rank(RankScope::Town, "  "), Err(PermsError::InvalidRankName(_))));
    }

    #[test]
    fn delete_rank_matches_case_insensitively() {
        let registry = registry();
        assert_eq!(registry.delete_rank(RankScope::Town, "sheriff").unwrap(), "Sheriff");
        assert_eq!(registry.town_ranks(), vec!["assistant"]);

        let err = registry.delete_rank(RankScope::Town, "sheriff").unwrap_err();
        assert!(matches!(err, PermsError::UnknownRank { .. }));
    }

    #[test]
    fn ranks_section_survives_deleting_its_last_rank() {
        let registry = registry();
        registry.delete_rank(RankScope::Nation, "diplomat").unwrap();
        assert!(registry.nation_ranks().is_empty());
        assert!(registry.store.has_group("nations.ranks"));
    }
}
