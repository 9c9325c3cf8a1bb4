use std::collections::HashMap;

use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};

use super::groups;
use crate::errors::{PermsError, PermsResult};

/// A single entry of the policy document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Group {
    /// Ordered raw permission nodes
    Nodes(Vec<String>),
    /// A mapping holding other groups, e.g. `towns.ranks`
    Section,
}

/// Immutable snapshot of the policy document, keyed by dotted group path.
///
/// Entries keep declaration order. Documents are never edited while served:
/// callers clone, edit the clone, validate, then swap it in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyDocument {
    entries: Vec<(String, Group)>,
    index: HashMap<String, usize>,
}

const HEADER: &str = "\
# Permission sets assigned to residents depending on their town and nation status.
# 'nomad' applies to everyone, towns.* to town members and nations.* to members of
# a town inside a nation. Ranks can be added under towns.ranks and nations.ranks.
# Prefix a node with '-' to negate it, e.g.
#    - towny.command.plot.*
#    - -towny.command.plot.set.jail
# {townname} and {nationname} are replaced with the resident's own town and nation.
# Do not rename: nomad, default, mayor, king, ranks.
";

impl PolicyDocument {
    /// Parse YAML text. Does not check for vital groups, see [`Self::validate`].
    pub fn parse(text: &str) -> PermsResult<Self> {
        let root: Value = serde_yaml::from_str(text)
            .map_err(|err| PermsError::config(format!("malformed policy document: {err}")))?;

        let mapping = match root {
            Value::Mapping(mapping) => mapping,
            Value::Null => Mapping::new(),
            _ => return Err(PermsError::config("policy document must be a mapping of groups")),
        };

        let mut document = Self::default();
        document.collect(None, &mapping)?;
        Ok(document)
    }

    fn collect(&mut self, prefix: Option<&str>, mapping: &Mapping) -> PermsResult<()> {
        for (key, value) in mapping {
            let key = scalar_string(key)
                .ok_or_else(|| PermsError::config(format!("non-string key under {}", prefix.unwrap_or("<root>"))))?;
            let path = match prefix {
                Some(prefix) => format!("{prefix}.{key}"),
                None => key,
            };

            match value {
                Value::Mapping(children) => {
                    self.insert_group(&path, Group::Section)?;
                    self.collect(Some(&path), children)?;
                }
                Value::Sequence(items) => {
                    let nodes = items
                        .iter()
                        .map(|item| {
                            scalar_string(item).ok_or_else(|| {
                                PermsError::config(format!("group {path} contains a non-string entry"))
                            })
                        })
                        .collect::<PermsResult<Vec<_>>>()?;
                    self.insert_group(&path, Group::Nodes(nodes))?;
                }
                Value::Null => self.insert_group(&path, Group::Nodes(Vec::new()))?,
                _ => {
                    return Err(PermsError::config(format!(
                        "group {path} must be a list of permission nodes or a section"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Fails with the first vital group that is missing.
    pub fn validate(&self) -> PermsResult<()> {
        for group in groups::VITAL {
            if !self.has_group(group) {
                return Err(PermsError::VitalGroupMissing(group.to_string()));
            }
        }
        Ok(())
    }

    pub fn has_group(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    pub fn group(&self, path: &str) -> Option<&Group> {
        self.index.get(path).map(|&idx| &self.entries[idx].1)
    }

    /// Declared nodes of a group; empty for sections and absent groups.
    pub fn group_nodes(&self, path: &str) -> &[String] {
        match self.group(path) {
            Some(Group::Nodes(nodes)) => nodes,
            _ => &[],
        }
    }

    /// Every group path, sections included, in declaration order.
    pub fn group_paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(path, _)| path.as_str())
    }

    /// Names of the direct children of a section, in declaration order.
    pub fn children(&self, section: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|(path, _)| child_name(section, path))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a group, creating missing parent sections.
    ///
    /// An existing section is left alone when a section is inserted again; an
    /// existing node list is replaced.
    pub fn insert_group(&mut self, path: &str, group: Group) -> PermsResult<()> {
        if let Some((parent, _)) = path.rsplit_once('.') {
            self.ensure_section(parent)?;
        }

        match self.index.get(path).copied() {
            Some(idx) => match (&self.entries[idx].1, &group) {
                (Group::Section, Group::Section) => {}
                (Group::Section, Group::Nodes(_)) => {
                    return Err(PermsError::config(format!("group {path} is a section, not a node list")))
                }
                _ => self.entries[idx].1 = group,
            },
            None => {
                let at = self.insert_position(path);
                self.entries.insert(at, (path.to_string(), group));
                self.reindex();
            }
        }
        Ok(())
    }

    /// Just past the last entry of the parent section, so entries keep
    /// mirroring the nesting of the rendered document.
    fn insert_position(&self, path: &str) -> usize {
        let Some((parent, _)) = path.rsplit_once('.') else {
            return self.entries.len();
        };
        let nested = format!("{parent}.");
        self.entries
            .iter()
            .rposition(|(entry, _)| entry == parent || entry.starts_with(&nested))
            .map_or(self.entries.len(), |idx| idx + 1)
    }

    fn ensure_section(&mut self, path: &str) -> PermsResult<()> {
        match self.group(path) {
            Some(Group::Section) => Ok(()),
            // `ranks:` with no value parses as an empty list; promote it.
            Some(Group::Nodes(nodes)) if nodes.is_empty() => {
                let idx = self.index[path];
                self.entries[idx].1 = Group::Section;
                Ok(())
            }
            Some(Group::Nodes(_)) => Err(PermsError::config(format!(
                "group {path} is a node list and cannot hold other groups"
            ))),
            None => self.insert_group(path, Group::Section),
        }
    }

    /// Remove a group and everything beneath it. Returns whether it existed.
    pub fn remove_group(&mut self, path: &str) -> bool {
        if !self.has_group(path) {
            return false;
        }
        let nested = format!("{path}.");
        self.entries.retain(|(entry, _)| entry != path && !entry.starts_with(&nested));
        self.reindex();
        true
    }

    fn reindex(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, (path, _))| (path.clone(), idx))
            .collect();
    }

    /// Render back to nested YAML with an explanatory header.
    pub fn to_yaml(&self) -> PermsResult<String> {
        Ok(format!("{HEADER}\n{}", self.render()?))
    }

    fn render(&self) -> PermsResult<String> {
        serde_yaml::to_string(&Value::Mapping(self.section_to_yaml(None)))
            .map_err(|err| PermsError::config(format!("failed to serialize policy document: {err}")))
    }

    fn section_to_yaml(&self, section: Option<&str>) -> Mapping {
        let mut mapping = Mapping::new();
        for (path, group) in &self.entries {
            let name = match section {
                Some(section) => child_name(section, path),
                None => (!path.contains('.')).then_some(path.as_str()),
            };
            let Some(name) = name else { continue };

            let value = match group {
                Group::Nodes(nodes) => Value::Sequence(nodes.iter().cloned().map(Value::String).collect()),
                Group::Section => Value::Mapping(self.section_to_yaml(Some(path))),
            };
            mapping.insert(Value::String(name.to_string()), value);
        }
        mapping
    }

    /// SHA-256 over the canonical rendering; stable across reloads of the same policy.
    pub fn fingerprint(&self) -> PermsResult<String> {
        Ok(hex::encode(Sha256::digest(self.render()?.as_bytes())))
    }
}

fn child_name<'a>(section: &str, path: &'a str) -> Option<&'a str> {
    path.strip_prefix(section)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|rest| !rest.is_empty() && !rest.contains('.'))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
