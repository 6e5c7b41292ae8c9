//! Tree command - list a directory through the lazy tree.

use std::fmt::Write as _;
use std::path::Path;

use crate::tree::{DirectorySource, FileTree, FsDirectorySource, NodeKind, ROOT_KEY, TreeNode, expand};

/// Expand `depth` levels below `key`.
pub async fn expand_depth(
    tree: &mut FileTree,
    source: &dyn DirectorySource,
    key: &str,
    depth: usize,
) -> anyhow::Result<()> {
    let mut frontier = vec![key.to_string()];
    for _ in 0..depth {
        let mut next = Vec::new();
        for key in frontier {
            expand(tree, source, &key).await?;
            if let Some(node) = tree.find(&key) {
                next.extend(
                    node.children
                        .iter()
                        .flatten()
                        .filter(|child| child.data.kind == NodeKind::Directory)
                        .map(|child| child.data.key.clone()),
                );
            }
        }
        frontier = next;
    }
    Ok(())
}

/// Indented listing, directories suffixed with `/`, unloaded ones with `...`.
pub fn render(tree: &FileTree) -> String {
    fn walk(nodes: &[TreeNode], depth: usize, out: &mut String) {
        for node in nodes {
            let indent = "  ".repeat(depth);
            let _ = match (&node.data.kind, node.data.size) {
                (NodeKind::Directory, _) if !node.is_loaded() => {
                    writeln!(out, "{indent}{}/ ...", node.data.name)
                }
                (NodeKind::Directory, _) => writeln!(out, "{indent}{}/", node.data.name),
                (NodeKind::File, Some(size)) => {
                    writeln!(out, "{indent}{} ({size} bytes)", node.data.name)
                }
                (NodeKind::File, None) => writeln!(out, "{indent}{}", node.data.name),
            };
            if let Some(children) = node.children.as_deref() {
                walk(children, depth + 1, out);
            }
        }
    }

    let mut out = String::new();
    if let Some(children) = tree.root().children.as_deref() {
        walk(children, 0, &mut out);
    }
    out
}

/// Run the tree command.
pub async fn run(path: &Path, depth: usize) -> anyhow::Result<()> {
    let root = path.canonicalize()?;
    let source = FsDirectorySource::new(&root);
    let mut tree = FileTree::new();

    expand_depth(&mut tree, &source, ROOT_KEY, depth.max(1)).await?;

    println!("{}", root.display());
    print!("{}", render(&tree));
    Ok(())
}
