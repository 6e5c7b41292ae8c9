//! Client-side directory tree kept live by watch events.
//!
//! [`FileTree`] holds the lazily populated hierarchy, [`TreeSync`] maps
//! directory wire events onto it and [`DirectorySource`] lists nodes when
//! they are expanded.

mod node;
mod reconcile;
mod source;
mod sync;

pub use node::{NodeData, NodeKind, TreeNode, display_order, join_key, parent_key, sort_children};
pub use reconcile::{FileTree, ROOT_KEY};
pub use source::{CachedDirectorySource, DirectorySource, FsDirectorySource, ListError, expand};
pub use sync::TreeSync;
