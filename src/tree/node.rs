//! Tree node type and presentation icons

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One node of the nested namespace view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub name: String,
    pub path: String,
    #[serde(rename = "isDir")]
    pub is_dir: bool,
    pub icon: String,
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Total node count including this one.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(TreeNode::count).sum::<usize>()
    }
}

/// Sibling order: directories first, then case-insensitive name, then exact
/// name, then path.
pub fn sibling_order(a: &TreeNode, b: &TreeNode) -> Ordering {
    b.is_dir
        .cmp(&a.is_dir)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.path.cmp(&b.path))
}

/// Icon hint chosen from the entry kind and extension.
pub fn icon_for(name: &str, is_dir: bool) -> &'static str {
    if is_dir {
        return "📁";
    }
    let ext = match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx + 1..].to_ascii_lowercase(),
        _ => String::new(),
    };
    match ext.as_str() {
        "txt" | "md" => "📄",
        "pdf" => "📕",
        "jpg" | "jpeg" | "png" | "gif" => "🖼️",
        "mp3" | "wav" | "ogg" => "🎵",
        "mp4" | "mov" | "avi" => "🎬",
        _ => "📄",
    }
}
