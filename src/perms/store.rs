use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::document::{Group, PolicyDocument};
use crate::errors::{PermsError, PermsResult};

/// Policy shipped with the crate, written out when no document exists yet.
pub const DEFAULT_POLICY: &str = include_str!("../../policy/townyperms.yml");

/// Where the policy document is read from and saved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySource {
    File(PathBuf),
    /// In-memory text; mutations are never persisted
    Inline(String),
}

impl std::fmt::Display for PolicySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicySource::File(path) => write!(f, "{}", path.display()),
            PolicySource::Inline(_) => f.write_str("inline"),
        }
    }
}

impl PolicySource {
    fn read(&self) -> PermsResult<String> {
        match self {
            PolicySource::File(path) => std::fs::read_to_string(path)
                .map_err(|err| PermsError::config(format!("could not read {}: {err}", path.display()))),
            PolicySource::Inline(text) => Ok(text.clone()),
        }
    }

    fn persist(&self, document: &PolicyDocument) -> PermsResult<()> {
        match self {
            PolicySource::File(path) => {
                let text = document.to_yaml()?;
                let tmp = path.with_extension("yml.tmp");
                std::fs::write(&tmp, text)
                    .and_then(|_| std::fs::rename(&tmp, path))
                    .map_err(|err| PermsError::config(format!("could not save {}: {err}", path.display())))
            }
            PolicySource::Inline(_) => Ok(()),
        }
    }
}

/// Holds the served policy document and swaps it atomically.
///
/// Readers get an `Arc` snapshot and never observe a half-built document.
/// Writers build a new document, validate it, persist it, then swap.
#[derive(Debug)]
pub struct PermissionStore {
    source: PolicySource,
    current: RwLock<Served>,
    writer: Mutex<()>,
}

/// A document together with the fingerprint computed before it was swapped in
#[derive(Debug, Clone)]
struct Served {
    document: Arc<PolicyDocument>,
    fingerprint: String,
}

impl Served {
    fn new(document: PolicyDocument) -> PermsResult<Self> {
        let fingerprint = document.fingerprint()?;
        Ok(Self { document: Arc::new(document), fingerprint })
    }
}

impl PermissionStore {
    /// Parse and validate; fails on unreadable, malformed or incomplete documents.
    pub fn load(source: PolicySource) -> PermsResult<Self> {
        let served = Served::new(Self::read_validated(&source)?)?;
        tracing::info!(
            groups = served.document.len(),
            fingerprint = %served.fingerprint,
            "policy document loaded"
        );
        Ok(Self {
            source,
            current: RwLock::new(served),
            writer: Mutex::new(()),
        })
    }

    /// Load from `path`, writing the bundled default policy there first if
    /// the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> PermsResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|err| PermsError::config(format!("could not create {}: {err}", parent.display())))?;
            }
            std::fs::write(path, DEFAULT_POLICY)
                .map_err(|err| PermsError::config(format!("could not write {}: {err}", path.display())))?;
            tracing::info!(path = %path.display(), "wrote default policy document");
        }
        Self::load(PolicySource::File(path.to_path_buf()))
    }

    pub fn from_yaml(text: impl Into<String>) -> PermsResult<Self> {
        Self::load(PolicySource::Inline(text.into()))
    }

    fn read_validated(source: &PolicySource) -> PermsResult<PolicyDocument> {
        let document = PolicyDocument::parse(&source.read()?)?;
        document.validate()?;
        Ok(document)
    }

    pub fn source(&self) -> &PolicySource {
        &self.source
    }

    /// Current snapshot
    pub fn document(&self) -> Arc<PolicyDocument> {
        self.current.read().document.clone()
    }

    /// Re-read the source into a new document; the served document is only
    /// replaced when the new one is valid.
    pub fn reload(&self) -> PermsResult<Arc<PolicyDocument>> {
        let _guard = self.writer.lock();
        let served = Served::new(Self::read_validated(&self.source)?)?;
        tracing::info!(fingerprint = %served.fingerprint, "policy document reloaded");
        let document = served.document.clone();
        *self.current.write() = served;
        Ok(document)
    }

    /// Declared nodes of a group; empty when the group is absent.
    pub fn group_nodes(&self, path: &str) -> Vec<String> {
        self.document().group_nodes(path).to_vec()
    }

    pub fn has_group(&self, path: &str) -> bool {
        self.document().has_group(path)
    }

    /// Every group path, sorted
    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.document().group_paths().map(str::to_string).collect();
        names.sort();
        names
    }

    /// Fingerprint of the served document
    pub fn fingerprint(&self) -> String {
        self.current.read().fingerprint.clone()
    }

    pub fn add_node(&self, group: &str, node: &str) -> PermsResult<Arc<PolicyDocument>> {
        self.update(|document| {
            let mut nodes = group_nodes_for_edit(document, group)?;
            if nodes.iter().any(|existing| existing == node) {
                return Err(PermsError::NodeAlreadyPresent { group: group.to_string(), node: node.to_string() });
            }
            nodes.push(node.to_string());
            document.insert_group(group, Group::Nodes(nodes))
        })
    }

    pub fn remove_node(&self, group: &str, node: &str) -> PermsResult<Arc<PolicyDocument>> {
        self.update(|document| {
            let mut nodes = group_nodes_for_edit(document, group)?;
            let Some(idx) = nodes.iter().position(|existing| existing == node) else {
                return Err(PermsError::NodeNotPresent { group: group.to_string(), node: node.to_string() });
            };
            nodes.remove(idx);
            document.insert_group(group, Group::Nodes(nodes))
        })
    }

    /// Apply `edit` to a copy of the served document, validate, persist and
    /// swap. Nothing changes when any step fails.
    pub(crate) fn update<F>(&self, edit: F) -> PermsResult<Arc<PolicyDocument>>
    where
        F: FnOnce(&mut PolicyDocument) -> PermsResult<()>,
    {
        let _guard = self.writer.lock();
        let mut document = (*self.document()).clone();
        edit(&mut document)?;
        document.validate()?;
        let served = Served::new(document)?;
        self.source.persist(&served.document)?;

        tracing::debug!(fingerprint = %served.fingerprint, "policy document updated");
        let document = served.document.clone();
        *self.current.write() = served;
        Ok(document)
    }
}

fn group_nodes_for_edit(document: &PolicyDocument, group: &str) -> PermsResult<Vec<String>> {
    match document.group(group) {
        Some(Group::Nodes(nodes)) => Ok(nodes.clone()),
        Some(Group::Section) => Err(PermsError::config(format!("group {group} is a section, not a node list"))),
        None => Err(PermsError::UnknownGroup(group.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const POLICY: &str = r#"
nomad: [chat.use]
towns:
  default: [town.claim]
  mayor: [town.delete]
  ranks:
    sheriff: [jail.use]
nations:
  default: []
  king: []
  ranks: {}
"#;

    #[test]
    fn bundled_default_policy_is_valid() {
        let store = PermissionStore::from_yaml(DEFAULT_POLICY).unwrap();
        assert!(store.has_group("towns.ranks"));
    }

    #[test]
    fn load_rejects_missing_vital_group() {
        let err = PermissionStore::from_yaml("nomad: []\ntowns:\n  default: []\n").unwrap_err();
        assert_eq!(err, PermsError::VitalGroupMissing("towns.mayor".into()));
    }

    #[test]
    fn load_rejects_unreadable_file() {
        let dir = tempdir().unwrap();
        let err = PermissionStore::load(PolicySource::File(dir.path().join("nope.yml"))).unwrap_err();
        assert!(matches!(err, PermsError::Config(_)));
    }

    #[test]
    fn group_names_are_sorted_and_absent_groups_are_empty() {
        let store = PermissionStore::from_yaml(POLICY).unwrap();
        let names = store.group_names();
        assert_eq!(names.first().map(String::as_str), Some("nations"));
        assert!(names.contains(&"towns.ranks.sheriff".to_string()));
        assert!(store.group_nodes("towns.ranks.deputy").is_empty());
    }

    #[test]
    fn add_and_remove_node_validate_presence() {
        let store = PermissionStore::from_yaml(POLICY).unwrap();

        store.add_node("nomad", "chat.shout").unwrap();
        assert_eq!(store.group_nodes("nomad"), ["chat.use", "chat.shout"]);

        assert!(matches!(store.add_node("nomad", "chat.use"), Err(PermsError::NodeAlreadyPresent { .. })));
        assert!(matches!(store.remove_node("nomad", "chat.none"), Err(PermsError::NodeNotPresent { .. })));
        assert!(matches!(store.add_node("nobody", "x"), Err(PermsError::UnknownGroup(_))));
        assert!(matches!(store.add_node("towns.ranks", "x"), Err(PermsError::Config(_))));

        store.remove_node("nomad", "chat.use").unwrap();
        assert_eq!(store.group_nodes("nomad"), ["chat.shout"]);
    }

    #[test]
    fn fingerprint_tracks_the_served_document() {
        let store = PermissionStore::from_yaml(POLICY).unwrap();
        let before = store.fingerprint();
        assert_eq!(before, store.document().fingerprint().unwrap());

        store.add_node("nomad", "chat.shout").unwrap();
        assert_ne!(store.fingerprint(), before);
        assert_eq!(store.fingerprint(), store.document().fingerprint().unwrap());

        assert!(store.add_node("nomad", "chat.shout").is_err());
        assert_eq!(store.fingerprint(), store.document().fingerprint().unwrap());
    }

    #[test]
    fn failed_reload_keeps_serving_previous_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("townyperms.yml");
        std::fs::write(&path, POLICY).unwrap();
        let store = PermissionStore::open(&path).unwrap();
        let before = store.fingerprint();

        std::fs::write(&path, "nomad: []\n").unwrap();
        let err = store.reload().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(store.fingerprint(), before);
        assert_eq!(store.group_nodes("nomad"), ["chat.use"]);
    }

    #[test]
    fn mutations_persist_and_reload_identically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("townyperms.yml");
        std::fs::write(&path, POLICY).unwrap();
        let store = PermissionStore::open(&path).unwrap();

        store.add_node("towns.ranks.sheriff", "-jail.unjail").unwrap();
        let saved = store.fingerprint();

        let reopened = PermissionStore::open(&path).unwrap();
        assert_eq!(reopened.fingerprint(), saved);
        assert_eq!(reopened.group_nodes("towns.ranks.sheriff"), ["jail.use", "-jail.unjail"]);

        store.reload().unwrap();
        assert_eq!(store.fingerprint(), saved);
    }

    #[test]
    fn open_writes_default_policy_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("townyperms.yml");
        let store = PermissionStore::open(&path).unwrap();
        assert!(path.exists());
        assert!(!store.group_nodes("nomad").is_empty());
    }

    #[test]
    fn snapshots_are_unaffected_by_later_swaps() {
        let store = PermissionStore::from_yaml(POLICY).unwrap();
        let snapshot = store.document();
        store.add_node("nomad", "chat.shout").unwrap();

        assert_eq!(snapshot.group_nodes("nomad"), ["chat.use"]);
        assert_eq!(store.group_nodes("nomad"), ["chat.use", "chat.shout"]);
    }
}
