//! Structural diff between two configuration trees

use std::fmt;

use serde_json::Value;

use keelson_common::display_value;

use crate::path;

/// What happened to a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Field absent before, present now
    Create,
    /// Field present in both with a different value
    Update,
    /// Field present before, absent now
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        })
    }
}

/// A single field-level change
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Create, update or delete
    pub kind: ChangeKind,
    /// Field names and list indices from the root
    pub path: Vec<String>,
    /// Previous value, absent for creates
    pub from: Option<Value>,
    /// New value, absent for deletes
    pub to: Option<Value>,
}

impl Change {
    /// Path with list indices replaced by `*`
    pub fn normalized_path(&self) -> String {
        path::normalize(&self.path)
    }

    /// Path as written, e.g. `.spec.nodePools.2.size`
    pub fn dotted_path(&self) -> String {
        let mut out = String::new();
        for segment in &self.path {
            out.push('.');
            out.push_str(segment);
        }
        out
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {}",
            self.dotted_path(),
            display_value(self.from.as_ref()),
            display_value(self.to.as_ref())
        )
    }
}

/// Ordered list of changes between two configurations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changelog(Vec<Change>);

impl Changelog {
    /// Wrap a list of changes
    pub fn new(changes: Vec<Change>) -> Self {
        Self(changes)
    }

    /// Number of changes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the configurations were identical
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate changes in order
    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.0.iter()
    }

    /// Human-readable `path: from -> to` lines
    pub fn render(&self) -> String {
        self.0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Changes whose dotted path starts with `prefix` (leading dot optional)
    pub fn filter_by_prefix(&self, prefix: &str) -> Changelog {
        let prefix = if prefix.starts_with('.') {
            prefix.to_string()
        } else {
            format!(".{}", prefix)
        };
        Changelog(
            self.0
                .iter()
                .filter(|c| c.dotted_path().starts_with(&prefix))
                .cloned()
                .collect(),
        )
    }

    /// Normalized paths of every change
    pub fn paths(&self) -> Vec<String> {
        self.0.iter().map(Change::normalized_path).collect()
    }
}

impl From<Vec<Change>> for Changelog {
    fn from(changes: Vec<Change>) -> Self {
        Self(changes)
    }
}

impl IntoIterator for Changelog {
    type Item = Change;
    type IntoIter = std::vec::IntoIter<Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Changelog {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Compare two configuration trees.
///
/// `None` on either side means the whole tree is absent: every leaf of the
/// other side becomes a create (or delete). Maps are compared key by key and
/// lists index by index; a type mismatch is a single update at that path.
/// Empty maps and lists count as leaves.
pub fn diff(old: Option<&Value>, new: Option<&Value>) -> Changelog {
    let mut changes = Vec::new();
    let mut path = Vec::new();
    walk(&mut path, old, new, &mut changes);
    Changelog(changes)
}

fn walk(path: &mut Vec<String>, old: Option<&Value>, new: Option<&Value>, out: &mut Vec<Change>) {
    match (old, new) {
        (None, None) => {}
        (Some(o), Some(n)) if o == n => {}
        (Some(Value::Object(o)), Some(Value::Object(n))) => {
            for (key, old_value) in o {
                path.push(key.clone());
                walk(path, Some(old_value), n.get(key), out);
                path.pop();
            }
            for (key, new_value) in n.iter().filter(|(k, _)| !o.contains_key(*k)) {
                path.push(key.clone());
                walk(path, None, Some(new_value), out);
                path.pop();
            }
        }
        (Some(Value::Array(o)), Some(Value::Array(n))) => {
            for i in 0..o.len().max(n.len()) {
                path.push(i.to_string());
                walk(path, o.get(i), n.get(i), out);
                path.pop();
            }
        }
        (Some(o), Some(n)) => out.push(Change {
            kind: ChangeKind::Update,
            path: path.clone(),
            from: Some(o.clone()),
            to: Some(n.clone()),
        }),
        (None, Some(n)) => leaves(path, n, ChangeKind::Create, out),
        (Some(o), None) => leaves(path, o, ChangeKind::Delete, out),
    }
}

fn leaves(path: &mut Vec<String>, value: &Value, kind: ChangeKind, out: &mut Vec<Change>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                path.push(key.clone());
                leaves(path, child, kind, out);
                path.pop();
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, child) in items.iter().enumerate() {
                path.push(i.to_string());
                leaves(path, child, kind, out);
                path.pop();
            }
        }
        leaf => {
            let (from, to) = match kind {
                ChangeKind::Delete => (Some(leaf.clone()), None),
                _ => (None, Some(leaf.clone())),
            };
            out.push(Change {
                kind,
                path: path.clone(),
                from,
                to,
            });
        }
    }
}
