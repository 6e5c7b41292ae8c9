//! Incremental updates to a lazily loaded directory tree.
//!
//! Every operation is idempotent under repeated delivery and keeps two
//! properties for every loaded directory: child keys are unique, and
//! children are in [`display_order`].

use std::collections::{HashMap, HashSet};

use super::node::{NodeData, NodeKind, TreeNode, display_order, sort_children};

/// Key of the tree root.
pub const ROOT_KEY: &str = "";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTree {
    root: TreeNode,
}

impl Default for FileTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTree {
    /// An empty tree whose root counts as loaded.
    pub fn new() -> Self {
        Self {
            root: TreeNode {
                data: NodeData::directory(ROOT_KEY),
                children: Some(Vec::new()),
            },
        }
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    pub fn find(&self, key: &str) -> Option<&TreeNode> {
        if key == ROOT_KEY {
            return Some(&self.root);
        }
        find_in(self.root.children.as_deref()?, key)
    }

    fn find_mut(&mut self, key: &str) -> Option<&mut TreeNode> {
        if key == ROOT_KEY {
            return Some(&mut self.root);
        }
        find_in_mut(self.root.children.as_mut()?, key)
    }

    /// Insert `data` under `parent_key`. An existing sibling with the same
    /// key is updated in place instead. Parents that are missing, not
    /// loaded, or files are left alone; they pick the entry up when listed.
    ///
    /// Returns true if the tree changed.
    pub fn add(&mut self, parent_key: &str, data: NodeData) -> bool {
        let Some(parent) = self.find_mut(parent_key) else {
            return false;
        };
        if parent.data.kind != NodeKind::Directory {
            return false;
        }
        let Some(children) = parent.children.as_mut() else {
            return false;
        };

        if let Some(existing) = children.iter_mut().find(|c| c.data.key == data.key) {
            if existing.data == data {
                return false;
            }
            apply_attributes(existing, data);
        } else {
            children.push(TreeNode::new(data));
        }
        sort_children(children);
        true
    }

    /// Prune the first node with `key` and its subtree. The root cannot be
    /// removed; use [`FileTree::clear`].
    pub fn remove(&mut self, key: &str) -> Option<TreeNode> {
        if key == ROOT_KEY {
            return None;
        }
        remove_in(self.root.children.as_mut()?, key)
    }

    /// Replace the displayed attributes of `key`, keeping its children.
    pub fn update(&mut self, key: &str, data: NodeData) -> bool {
        match self.root.children.as_mut() {
            Some(children) => update_in(children, key, data),
            None => false,
        }
    }

    /// Re-parent `key` from `old_parent_key` to `new_parent_key`, renaming it
    /// to `new_key` when given.
    ///
    /// When the node is not where the caller thinks it is, any copy found
    /// elsewhere is pruned and the best known data (that copy, else
    /// `fallback`) is added under the new parent. Returns true if the tree
    /// changed.
    pub fn move_node(
        &mut self,
        key: &str,
        old_parent_key: &str,
        new_parent_key: &str,
        new_key: Option<&str>,
        fallback: Option<NodeData>,
    ) -> bool {
        let taken = self
            .find_mut(old_parent_key)
            .and_then(|parent| parent.children.as_mut())
            .and_then(|children| {
                let index = children.iter().position(|c| c.data.key == key)?;
                Some(children.remove(index))
            });

        let mut node = match taken {
            Some(node) => node,
            None => {
                crate::debug_event!("tree", "stale move", "{key} not under {old_parent_key:?}");
                match self.remove(key).or(fallback.map(TreeNode::new)) {
                    Some(node) => node,
                    None => return false,
                }
            }
        };

        let target_key = new_key.unwrap_or(key).to_string();
        if node.data.key != target_key {
            node.rekey(target_key.clone());
        }

        let Some(children) = self
            .find_mut(new_parent_key)
            .filter(|parent| parent.data.kind == NodeKind::Directory)
            .and_then(|parent| parent.children.as_mut())
        else {
            // Destination not visible; it is listed fresh on expansion
            return true;
        };

        children.retain(|c| c.data.key != target_key);
        children.push(node);
        sort_children(children);
        true
    }

    /// Materialise the children of directory `key` from a listing and mark
    /// it loaded. Subtrees of directories that are still present survive a
    /// reload.
    pub fn load(&mut self, key: &str, listing: Vec<NodeData>) -> bool {
        let Some(node) = self.find_mut(key) else {
            return false;
        };
        if node.data.kind != NodeKind::Directory {
            return false;
        }

        let mut previous: HashMap<String, Option<Vec<TreeNode>>> = node
            .children
            .take()
            .unwrap_or_default()
            .into_iter()
            .filter(|c| c.data.kind == NodeKind::Directory)
            .map(|c| (c.data.key, c.children))
            .collect();

        let mut seen = HashSet::new();
        let mut children: Vec<TreeNode> = listing
            .into_iter()
            .rev()
            .filter(|data| seen.insert(data.key.clone()))
            .map(|data| {
                let grandchildren = match data.kind {
                    NodeKind::Directory => previous.remove(&data.key).flatten(),
                    NodeKind::File => None,
                };
                TreeNode {
                    data,
                    children: grandchildren,
                }
            })
            .collect();
        sort_children(&mut children);

        node.children = Some(children);
        true
    }

    pub fn load_root(&mut self, listing: Vec<NodeData>) -> bool {
        self.load(ROOT_KEY, listing)
    }

    /// Back to an empty, loaded root.
    pub fn clear(&mut self) {
        self.root.children = Some(Vec::new());
    }

    /// Number of nodes below the root.
    pub fn len(&self) -> usize {
        fn count(nodes: &[TreeNode]) -> usize {
            nodes
                .iter()
                .map(|n| 1 + n.children.as_deref().map_or(0, count))
                .sum()
        }
        self.root.children.as_deref().map_or(0, count)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in depth-first display order.
    pub fn keys(&self) -> Vec<String> {
        fn walk(nodes: &[TreeNode], out: &mut Vec<String>) {
            for node in nodes {
                out.push(node.data.key.clone());
                if let Some(children) = node.children.as_deref() {
                    walk(children, out);
                }
            }
        }
        let mut out = Vec::new();
        if let Some(children) = self.root.children.as_deref() {
            walk(children, &mut out);
        }
        out
    }

    /// Unique sibling keys, sorted siblings, files never loaded.
    pub fn is_consistent(&self) -> bool {
        fn check(node: &TreeNode) -> bool {
            let Some(children) = node.children.as_deref() else {
                return true;
            };
            if node.data.kind == NodeKind::File {
                return false;
            }
            let mut keys = HashSet::new();
            if !children.iter().all(|c| keys.insert(c.data.key.as_str())) {
                return false;
            }
            let sorted = children
                .windows(2)
                .all(|pair| display_order(&pair[0].data, &pair[1].data).is_lt());
            sorted && children.iter().all(check)
        }
        check(&self.root)
    }
}

fn find_in<'a>(nodes: &'a [TreeNode], key: &str) -> Option<&'a TreeNode> {
    for node in nodes {
        if node.data.key == key {
            return Some(node);
        }
        if let Some(found) = node.children.as_deref().and_then(|c| find_in(c, key)) {
            return Some(found);
        }
    }
    None
}

fn find_in_mut<'a>(nodes: &'a mut [TreeNode], key: &str) -> Option<&'a mut TreeNode> {
    for node in nodes {
        if node.data.key == key {
            return Some(node);
        }
        if let Some(found) = node.children.as_mut().and_then(|c| find_in_mut(c, key)) {
            return Some(found);
        }
    }
    None
}

fn remove_in(nodes: &mut Vec<TreeNode>, key: &str) -> Option<TreeNode> {
    if let Some(index) = nodes.iter().position(|n| n.data.key == key) {
        return Some(nodes.remove(index));
    }
    nodes
        .iter_mut()
        .filter_map(|n| n.children.as_mut())
        .find_map(|children| remove_in(children, key))
}

fn update_in(nodes: &mut Vec<TreeNode>, key: &str, data: NodeData) -> bool {
    if let Some(node) = nodes.iter_mut().find(|n| n.data.key == key) {
        if node.data.name == data.name
            && node.data.kind == data.kind
            && node.data.size == data.size
            && node.data.modified == data.modified
            && node.data.extension == data.extension
        {
            return false;
        }
        let data = NodeData {
            key: key.to_string(),
            ..data
        };
        apply_attributes(node, data);
        sort_children(nodes);
        return true;
    }
    nodes
        .iter_mut()
        .filter_map(|n| n.children.as_mut())
        .any(|children| update_in(children, key, data.clone()))
}

fn apply_attributes(node: &mut TreeNode, data: NodeData) {
    if node.data.kind != data.kind {
        // A file replaced by a directory (or back) starts unloaded
        node.children = None;
    }
    node.data = data;
}
