//! Structural index of captured WebSocket traffic.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`StructuralTree`] | Arena of nodes with index-path bookkeeping |
//! | [`StructuralNode`] | Folder, handshake or message entry |
//! | [`StructureObserver`] | Channel observer filing traffic into a tree |
//!
//! Nodes reference each other by [`NodeId`](crate::identifiers::NodeId);
//! the tree owns all of them. A [`SharedTree`] is locked for every
//! mutation, so listener tasks of different channels can file traffic
//! concurrently.

// ============================================================================
// Submodules
// ============================================================================

/// Node model.
pub mod node;

/// Observer feeding a shared tree.
pub mod observer;

/// Arena tree.
pub mod tree;

// ============================================================================
// Re-exports
// ============================================================================

pub use node::{FolderKind, NodeContent, NodeType, StructuralNode};
pub use observer::StructureObserver;
pub use tree::{SharedTree, StructuralTree};
