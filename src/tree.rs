//! Metadata and tree construction
//!
//! Turns a user namespace on disk into flat [`FileMetadata`] listings and the
//! nested [`TreeNode`] view clients render.
//!
//! [`FileMetadata`]: crate::types::FileMetadata

pub mod builder;
pub mod metadata;
pub mod node;
pub mod walker;

pub use builder::{build_tree, group_by_directory};
pub use metadata::describe_entry;
pub use node::{icon_for, TreeNode};
pub use walker::{is_excluded, walk};
