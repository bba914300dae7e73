//! Tree construction from flat metadata
//!
//! Nodes live in an arena indexed by normalized path. Ancestors missing from
//! the input are created as directories, and each node links to its parent by
//! looking up the path prefix. The output depends only on the set of input
//! paths, never on their order.

use crate::path::{file_name, normalize, parent};
use crate::tree::node::{icon_for, sibling_order, TreeNode};
use crate::types::FileMetadata;
use std::collections::{BTreeMap, HashMap};

struct ArenaNode {
    path: String,
    is_dir: bool,
    children: Vec<usize>,
}

#[derive(Default)]
struct Arena {
    nodes: Vec<ArenaNode>,
    index: HashMap<String, usize>,
    roots: Vec<usize>,
}

impl Arena {
    /// Insert `path` (and implicitly its ancestors), returning its index.
    fn insert(&mut self, path: &str, is_dir: bool) -> usize {
        if let Some(&idx) = self.index.get(path) {
            self.nodes[idx].is_dir |= is_dir;
            return idx;
        }

        let parent_path = parent(path);
        let parent_idx = if parent_path.is_empty() {
            None
        } else {
            Some(self.insert(parent_path, true))
        };

        let idx = self.nodes.len();
        self.nodes.push(ArenaNode {
            path: path.to_string(),
            is_dir,
            children: Vec::new(),
        });
        self.index.insert(path.to_string(), idx);
        match parent_idx {
            Some(p) => self.nodes[p].children.push(idx),
            None => self.roots.push(idx),
        }
        idx
    }

    fn materialize(&self, idx: usize) -> TreeNode {
        let node = &self.nodes[idx];
        let name = file_name(&node.path).to_string();
        // A node with children is a directory even if the input said otherwise.
        let is_dir = node.is_dir || !node.children.is_empty();
        let mut children: Vec<TreeNode> = node
            .children
            .iter()
            .map(|&child| self.materialize(child))
            .collect();
        children.sort_by(sibling_order);

        TreeNode {
            icon: icon_for(&name, is_dir).to_string(),
            name,
            path: node.path.clone(),
            is_dir,
            children,
        }
    }
}

/// Build the sorted top-level nodes for a flat metadata listing.
pub fn build_tree(entries: &[FileMetadata]) -> Vec<TreeNode> {
    let mut arena = Arena::default();
    for entry in entries {
        let path = normalize(&entry.path);
        if path.is_empty() {
            continue;
        }
        arena.insert(&path, entry.is_dir);
    }

    let mut roots: Vec<TreeNode> = arena
        .roots
        .iter()
        .map(|&idx| arena.materialize(idx))
        .collect();
    roots.sort_by(sibling_order);
    roots
}

/// Flat listing grouped by parent directory (`""` for the namespace root).
/// Entries within a group are ordered by path.
pub fn group_by_directory(entries: &[FileMetadata]) -> BTreeMap<String, Vec<FileMetadata>> {
    let mut groups: BTreeMap<String, Vec<FileMetadata>> = BTreeMap::new();
    for entry in entries {
        let path = normalize(&entry.path);
        groups
            .entry(parent(&path).to_string())
            .or_default()
            .push(entry.clone());
    }
    for group in groups.values_mut() {
        group.sort_by(|a, b| a.path.cmp(&b.path));
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn meta(path: &str, is_dir: bool) -> FileMetadata {
        FileMetadata {
            name: file_name(path).to_string(),
            path: path.to_string(),
            size: 0,
            is_dir,
            mod_time: Utc::now(),
            hash: if is_dir { None } else { Some("00".into()) },
        }
    }

    fn names(nodes: &[TreeNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.name.as_str()).collect()
    }

    #[test]
    fn directories_first_case_insensitive() {
        let tree = build_tree(&[meta("b.txt", false), meta("A", true), meta("a.txt", false)]);
        assert_eq!(names(&tree), vec!["A", "a.txt", "b.txt"]);
    }

    #[test]
    fn ancestors_are_created_implicitly() {
        let tree = build_tree(&[meta("x/y/z.txt", false)]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].path, "x");
        assert!(tree[0].is_dir);
        assert_eq!(tree[0].icon, "📁");
        let y = &tree[0].children[0];
        assert_eq!(y.path, "x/y");
        assert_eq!(y.children[0].path, "x/y/z.txt");
        assert_eq!(y.children[0].icon, "📄");
    }

    #[test]
    fn duplicates_collapse_and_order_is_input_independent() {
        let a = vec![
            meta("docs", true),
            meta("docs/b.md", false),
            meta("docs/A.md", false),
            meta("docs/b.md", false),
            meta("z.txt", false),
        ];
        let mut b = a.clone();
        b.reverse();

        let tree_a = build_tree(&a);
        let tree_b = build_tree(&b);
        assert_eq!(tree_a, tree_b);
        assert_eq!(tree_a.iter().map(TreeNode::count).sum::<usize>(), 4);
        assert_eq!(names(&tree_a[0].children), vec!["A.md", "b.md"]);
    }

    #[test]
    fn groups_by_parent_directory() {
        let groups = group_by_directory(&[
            meta("docs/b.md", false),
            meta("top.txt", false),
            meta("docs", true),
            meta("docs/a.md", false),
        ]);
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["", "docs"]);
        let docs: Vec<_> = groups["docs"].iter().map(|m| m.path.as_str()).collect();
        assert_eq!(docs, vec!["docs/a.md", "docs/b.md"]);
        assert_eq!(groups[""].len(), 2);
    }
}
