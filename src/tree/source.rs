//! On-demand population of tree nodes.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::node::{NodeData, join_key};
use super::reconcile::FileTree;
use crate::cache::ListingCache;
use crate::watcher::FileStats;

#[derive(Error, Debug)]
pub enum ListError {
    #[error("Key escapes the tree root: {0}")]
    InvalidKey(String),

    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Failed to list {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Pull-based listing of a directory's direct children.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    async fn list_children(&self, key: &str) -> Result<Vec<NodeData>, ListError>;
}

/// Lists straight from disk below `root`.
#[derive(Debug, Clone)]
pub struct FsDirectorySource {
    root: PathBuf,
    ignore: Vec<String>,
}

impl FsDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ignore: vec![".git".to_string()],
        }
    }

    /// Names skipped in every listing.
    pub fn with_ignore(mut self, ignore: Vec<String>) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, ListError> {
        let mut path = self.root.clone();
        for component in Path::new(key).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => return Err(ListError::InvalidKey(key.to_string())),
            }
        }
        Ok(path)
    }
}

#[async_trait]
impl DirectorySource for FsDirectorySource {
    async fn list_children(&self, key: &str) -> Result<Vec<NodeData>, ListError> {
        let dir = self.resolve(key)?;
        let io_error = |source: std::io::Error| ListError::Io {
            path: dir.clone(),
            source,
        };

        let metadata = tokio::fs::metadata(&dir).await.map_err(io_error)?;
        if !metadata.is_dir() {
            return Err(ListError::NotADirectory(dir.clone()));
        }

        let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_error)?;
        let mut listing = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.ignore.iter().any(|ignored| *ignored == name) {
                continue;
            }
            // Follow symlinks; dangling ones are skipped
            let Ok(metadata) = tokio::fs::metadata(entry.path()).await else {
                continue;
            };
            let stats = FileStats::from_metadata(&metadata);
            listing.push(NodeData::from_stats(join_key(key, &name), &stats));
        }

        crate::debug_event!("tree", "listed", "{key:?} ({} entries)", listing.len());
        Ok(listing)
    }
}

/// Serves listings from a [`ListingCache`] before asking `inner`.
pub struct CachedDirectorySource<S> {
    inner: S,
    cache: Arc<ListingCache<Vec<NodeData>>>,
    namespace: String,
}

impl<S: DirectorySource> CachedDirectorySource<S> {
    pub fn new(inner: S, cache: Arc<ListingCache<Vec<NodeData>>>, namespace: impl Into<String>) -> Self {
        Self {
            inner,
            cache,
            namespace: namespace.into(),
        }
    }

    pub fn cache(&self) -> &Arc<ListingCache<Vec<NodeData>>> {
        &self.cache
    }
}

#[async_trait]
impl<S: DirectorySource> DirectorySource for CachedDirectorySource<S> {
    async fn list_children(&self, key: &str) -> Result<Vec<NodeData>, ListError> {
        let cache_key = format!("{}{key}", self.namespace);
        if let Some(listing) = self.cache.get(&cache_key) {
            return Ok(listing);
        }
        let listing = self.inner.list_children(key).await?;
        self.cache.insert(cache_key, listing.clone());
        Ok(listing)
    }
}

/// List `key` through `source` and load the result into `tree`.
pub async fn expand(
    tree: &mut FileTree,
    source: &dyn DirectorySource,
    key: &str,
) -> Result<bool, ListError> {
    let listing = source.list_children(key).await?;
    Ok(tree.load(key, listing))
}
