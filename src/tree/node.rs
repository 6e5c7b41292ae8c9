//! Tree node model and display ordering.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::watcher::FileStats;

/// Directories sort before files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Directory,
    File,
}

/// Displayed attributes of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeData {
    /// `/`-separated path below the tree root
    pub key: String,
    pub name: String,
    pub kind: NodeKind,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    pub extension: Option<String>,
}

impl NodeData {
    pub fn new(key: impl Into<String>, kind: NodeKind) -> Self {
        let key = key.into();
        let name = key_name(&key).to_string();
        let extension = match kind {
            NodeKind::File => extension_of(&name),
            NodeKind::Directory => None,
        };
        Self {
            key,
            name,
            kind,
            size: None,
            modified: None,
            extension,
        }
    }

    pub fn directory(key: impl Into<String>) -> Self {
        Self::new(key, NodeKind::Directory)
    }

    pub fn file(key: impl Into<String>) -> Self {
        Self::new(key, NodeKind::File)
    }

    pub fn from_stats(key: impl Into<String>, stats: &FileStats) -> Self {
        let kind = if stats.is_directory {
            NodeKind::Directory
        } else {
            NodeKind::File
        };
        Self {
            size: stats.size,
            modified: stats.modified,
            ..Self::new(key, kind)
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Change the key, keeping name and extension in step.
    pub(crate) fn rekey(&mut self, key: String) {
        self.name = key_name(&key).to_string();
        if self.kind == NodeKind::File {
            self.extension = extension_of(&self.name);
        }
        self.key = key;
    }
}

/// `children` is `None` until the node is loaded; files never load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub data: NodeData,
    pub children: Option<Vec<TreeNode>>,
}

impl TreeNode {
    pub fn new(data: NodeData) -> Self {
        Self {
            data,
            children: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.data.key
    }

    pub fn is_loaded(&self) -> bool {
        self.children.is_some()
    }

    pub fn child(&self, key: &str) -> Option<&TreeNode> {
        self.children.as_ref()?.iter().find(|c| c.key() == key)
    }

    /// Keys of the direct children, in display order.
    pub fn child_keys(&self) -> Vec<&str> {
        self.children
            .iter()
            .flatten()
            .map(TreeNode::key)
            .collect()
    }

    /// Replace this node's key and every descendant's `old` prefix.
    pub(crate) fn rekey(&mut self, key: String) {
        let old = std::mem::take(&mut self.data.key);
        self.data.rekey(key.clone());
        if let Some(children) = self.children.as_mut() {
            for child in children {
                let suffix = child.data.key.strip_prefix(old.as_str()).unwrap_or("");
                let suffix = suffix.trim_start_matches('/');
                let child_key = if suffix.is_empty() {
                    join_key(&key, &child.data.name)
                } else {
                    join_key(&key, suffix)
                };
                child.rekey(child_key);
            }
        }
    }
}

/// Directories first, then case-insensitive by name; ties broken
/// case-sensitively and finally by key so the order is total.
pub fn display_order(a: &NodeData, b: &NodeData) -> Ordering {
    a.kind
        .cmp(&b.kind)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.key.cmp(&b.key))
}

pub fn sort_children(children: &mut [TreeNode]) {
    children.sort_by(|a, b| display_order(&a.data, &b.data));
}

/// Parent of `key`; top-level entries have the root key `""`.
pub fn parent_key(key: &str) -> &str {
    key.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

pub fn join_key(parent: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

fn key_name(key: &str) -> &str {
    key.rsplit_once('/').map(|(_, name)| name).unwrap_or(key)
}

/// Lowercased extension; dotfiles like `.gitignore` have none.
fn extension_of(name: &str) -> Option<String> {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext.to_lowercase()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_and_extension() {
        let data = NodeData::file("src/Main.RS");
        assert_eq!(data.name, "Main.RS");
        assert_eq!(data.extension.as_deref(), Some("rs"));

        assert_eq!(NodeData::file(".gitignore").extension, None);
        assert_eq!(NodeData::directory("a/b.d").extension, None);
    }

    #[test]
    fn test_keys() {
        assert_eq!(parent_key("src/lib.rs"), "src");
        assert_eq!(parent_key("lib.rs"), "");
        assert_eq!(join_key("", "src"), "src");
        assert_eq!(join_key("src", "lib.rs"), "src/lib.rs");
    }

    #[test]
    fn test_directories_sort_first() {
        let mut nodes = vec![
            TreeNode::new(NodeData::file("b.txt")),
            TreeNode::new(NodeData::directory("zeta")),
            TreeNode::new(NodeData::file("A.txt")),
            TreeNode::new(NodeData::directory("Alpha")),
        ];
        sort_children(&mut nodes);
        let keys: Vec<_> = nodes.iter().map(TreeNode::key).collect();
        assert_eq!(keys, vec!["Alpha", "zeta", "A.txt", "b.txt"]);
    }

    #[test]
    fn test_rekey_subtree() {
        let mut dir = TreeNode::new(NodeData::directory("old"));
        let mut inner = TreeNode::new(NodeData::directory("old/inner"));
        inner.children = Some(vec![TreeNode::new(NodeData::file("old/inner/x.rs"))]);
        dir.children = Some(vec![inner]);

        dir.rekey("lib/new".to_string());

        assert_eq!(dir.data.name, "new");
        let inner = dir.child("lib/new/inner").unwrap();
        assert!(inner.child("lib/new/inner/x.rs").is_some());
    }
}
