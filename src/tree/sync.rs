//! Applies directory wire events to a [`FileTree`].

use std::sync::Arc;

use super::node::{NodeData, NodeKind, join_key, parent_key};
use super::reconcile::FileTree;
use crate::cache::{CacheInvalidator, invalidate_path};
use crate::watcher::{EventType, WatchEvent};

/// Keeps a tree (and optionally a listing cache) in step with a directory
/// watch.
///
/// Event keys are relative to the watched directory; `watch_root` is that
/// directory's key in the tree, so a watch on `base/src` feeds a tree
/// rooted at `base`.
pub struct TreeSync {
    tree: FileTree,
    watch_root: String,
    namespace: String,
    cache: Option<Arc<dyn CacheInvalidator>>,
}

impl TreeSync {
    pub fn new(tree: FileTree) -> Self {
        Self {
            tree,
            watch_root: String::new(),
            namespace: String::new(),
            cache: None,
        }
    }

    pub fn with_watch_root(mut self, key: impl Into<String>) -> Self {
        self.watch_root = key.into().trim_matches('/').to_string();
        self
    }

    /// Invalidate `cache` on every structural change. Cache keys are tree
    /// keys prefixed with `namespace`.
    pub fn with_cache(mut self, cache: Arc<dyn CacheInvalidator>, namespace: impl Into<String>) -> Self {
        self.cache = Some(cache);
        self.namespace = namespace.into();
        self
    }

    pub fn tree(&self) -> &FileTree {
        &self.tree
    }

    /// Apply one event. Returns true if the tree changed.
    pub fn apply(&mut self, event: &WatchEvent) -> bool {
        if !event.kind.is_mutation() {
            return false;
        }
        let Some(relative) = event.relative_path.as_deref() else {
            return false;
        };
        let key = self.tree_key(relative);

        if let Some(cache) = self.cache.as_deref() {
            invalidate_path(cache, &self.namespace, &key);
        }

        let changed = match event.kind {
            EventType::Add | EventType::AddDir => {
                let data = node_data(&key, event);
                self.tree.add(parent_key(&key), data)
            }
            EventType::Change => {
                let data = node_data(&key, event);
                self.tree.update(&key, data)
            }
            EventType::Unlink | EventType::UnlinkDir if key == self.watch_root => {
                self.drop_watch_root()
            }
            EventType::Unlink | EventType::UnlinkDir => self.tree.remove(&key).is_some(),
            _ => false,
        };

        if changed {
            crate::debug_event!("tree", event.kind.as_str(), "{key:?}");
        }
        changed
    }

    fn tree_key(&self, relative: &str) -> String {
        if relative.is_empty() {
            self.watch_root.clone()
        } else {
            join_key(&self.watch_root, relative)
        }
    }

    /// The watched directory itself went away.
    fn drop_watch_root(&mut self) -> bool {
        if self.watch_root.is_empty() {
            let had_children = !self.tree.is_empty();
            self.tree.clear();
            had_children
        } else {
            self.tree.remove(&self.watch_root).is_some()
        }
    }
}

fn node_data(key: &str, event: &WatchEvent) -> NodeData {
    match &event.stats {
        Some(stats) => NodeData::from_stats(key, stats),
        None => {
            let kind = match event.kind {
                EventType::AddDir | EventType::UnlinkDir => NodeKind::Directory,
                _ => NodeKind::File,
            };
            NodeData::new(key, kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ListingCache;
    use crate::watcher::FileStats;
    use std::path::Path;
    use std::time::Duration;

    fn event(kind: EventType, path: &str) -> WatchEvent {
        WatchEvent::change(kind, Path::new(path), Path::new("/proj"), None)
    }

    #[test]
    fn test_add_dir_at_root_sorts_first() {
        let mut tree = FileTree::new();
        tree.load_root(vec![NodeData::file("a.txt"), NodeData::file("Z.md")]);
        let mut sync = TreeSync::new(tree);

        let mut add = event(EventType::AddDir, "/proj/src");
        add.stats = Some(FileStats::directory());
        assert!(sync.apply(&add));

        let root = sync.tree().root();
        assert_eq!(root.child_keys(), vec!["src", "a.txt", "Z.md"]);
        assert_eq!(root.child("src").unwrap().data.kind, NodeKind::Directory);
    }

    #[test]
    fn test_unlink_and_change() {
        let mut tree = FileTree::new();
        tree.load_root(vec![NodeData::file("a.txt")]);
        let mut sync = TreeSync::new(tree);

        let mut change = event(EventType::Change, "/proj/a.txt");
        change.stats = Some(FileStats {
            is_file: true,
            is_directory: false,
            size: Some(42),
            modified: None,
        });
        assert!(sync.apply(&change));
        assert_eq!(sync.tree().find("a.txt").unwrap().data.size, Some(42));

        assert!(sync.apply(&event(EventType::Unlink, "/proj/a.txt")));
        assert!(!sync.apply(&event(EventType::Unlink, "/proj/a.txt")));
        assert!(sync.tree().is_empty());
    }

    #[test]
    fn test_non_mutations_are_ignored() {
        let mut sync = TreeSync::new(FileTree::new());
        assert!(!sync.apply(&WatchEvent::heartbeat()));
        assert!(!sync.apply(&WatchEvent::error("boom")));
        assert!(!sync.apply(&WatchEvent::connected(Path::new("/proj"))));
    }

    #[test]
    fn test_sub_watch_maps_into_base_tree() {
        let mut tree = FileTree::new();
        tree.load_root(vec![NodeData::directory("src")]);
        tree.load("src", vec![]);
        let mut sync = TreeSync::new(tree).with_watch_root("src");

        let add = WatchEvent::change(
            EventType::Add,
            Path::new("/proj/src/lib.rs"),
            Path::new("/proj/src"),
            None,
        );
        assert!(sync.apply(&add));
        assert!(sync.tree().find("src/lib.rs").is_some());

        let gone = WatchEvent::change(
            EventType::UnlinkDir,
            Path::new("/proj/src"),
            Path::new("/proj/src"),
            None,
        );
        assert!(sync.apply(&gone));
        assert!(sync.tree().find("src").is_none());
    }

    #[test]
    fn test_changes_invalidate_cache() {
        let cache = Arc::new(ListingCache::new(Duration::from_secs(60)));
        cache.insert("/proj:", ());
        cache.insert("/proj:src", ());
        cache.insert("/proj:docs", ());

        let mut sync = TreeSync::new(FileTree::new()).with_cache(cache.clone(), "/proj:");
        sync.apply(&event(EventType::Add, "/proj/src/new.rs"));

        assert!(cache.get("/proj:src").is_none());
        assert!(cache.get("/proj:").is_some());
        assert!(cache.get("/proj:docs").is_some());
    }
}
