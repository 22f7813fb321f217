//! Arena-backed structural tree.
//!
//! The tree owns every node in a map keyed by [`NodeId`]; parent and child
//! links are plain ids.
//!
//! # Layout
//!
//! ```text
//! Sites                         [0]
//! └── example.com:443           [0, 0]
//!     ├── Handshakes            [0, 0, 0]
//!     │   └── GET wss://…       [0, 0, 0, 0]
//!     ├── Messages              [0, 0, 1]
//!     ├── Heartbeats            [0, 0, 2]
//!     └── Close                 [0, 0, 3]
//! ```
//!
//! # Index paths
//!
//! For every attached node `N` with parent `P` at position `k`,
//! `N.index_path == P.index_path ++ [k]`. Insertion, moves and removals
//! all keep this true; removing a child renumbers its later siblings and
//! their subtrees.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::trace;

use crate::channel::{ChannelState, HandshakeRef, MessageRecord};
use crate::error::{Error, Result};
use crate::identifiers::{ChannelId, NodeId};

use super::node::{FolderKind, NodeContent, NodeType, StructuralNode};

// ============================================================================
// Types
// ============================================================================

/// Tree shared between listener tasks. All mutation goes through the
/// write lock.
pub type SharedTree = Arc<RwLock<StructuralTree>>;

// ============================================================================
// StructuralTree
// ============================================================================

/// Hierarchical index of captured traffic.
#[derive(Debug, Clone)]
pub struct StructuralTree {
    nodes: FxHashMap<NodeId, StructuralNode>,
    root: NodeId,
    next_id: u64,
}

impl Default for StructuralTree {
    fn default() -> Self {
        Self::new()
    }
}

impl StructuralTree {
    /// Creates a tree with an empty root folder named `Sites`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_root_name(FolderKind::Root.default_name())
    }

    /// Creates a tree with an empty root folder named `name`.
    #[must_use]
    pub fn with_root_name(name: impl Into<String>) -> Self {
        let root = NodeId::new(0);
        let mut node = StructuralNode::folder(root, FolderKind::Root, name);
        node.index_path = vec![0];

        let mut nodes = FxHashMap::default();
        nodes.insert(root, node);
        Self {
            nodes,
            root,
            next_id: 1,
        }
    }

    /// Wraps the tree for sharing.
    #[must_use]
    pub fn into_shared(self) -> SharedTree {
        Arc::new(RwLock::new(self))
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[inline]
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&StructuralNode> {
        self.nodes.get(&id)
    }

    /// Number of nodes in the arena, detached ones included.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the root has no children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.child_count(self.root) == 0
    }

    #[must_use]
    pub fn child_count(&self, id: NodeId) -> usize {
        self.node(id).map_or(0, StructuralNode::child_count)
    }

    /// Child of `parent` at `index`.
    #[must_use]
    pub fn child_at(&self, parent: NodeId, index: usize) -> Option<NodeId> {
        self.node(parent)?.children.get(index).copied()
    }

    /// Node addressed by an index path starting at the root (`[0, ...]`).
    #[must_use]
    pub fn node_at_path(&self, path: &[usize]) -> Option<NodeId> {
        let (&first, rest) = path.split_first()?;
        if first != 0 {
            return None;
        }
        rest.iter()
            .try_fold(self.root, |current, &index| self.child_at(current, index))
    }

    /// First child of `parent` of type `node_type` named `name`.
    #[must_use]
    pub fn find_child(&self, parent: NodeId, node_type: NodeType, name: &str) -> Option<NodeId> {
        self.node(parent)?.children.iter().copied().find(|child| {
            self.node(*child)
                .is_some_and(|node| node.node_type() == node_type && node.name == name)
        })
    }

    /// First child of `parent` structurally equal to `candidate`.
    #[must_use]
    pub fn find_child_equal(&self, parent: NodeId, candidate: NodeId) -> Option<NodeId> {
        let candidate = self.node(candidate)?;
        self.node(parent)?
            .children
            .iter()
            .copied()
            .find(|child| self.node(*child).is_some_and(|node| node == candidate))
    }

    /// Structural equality of two nodes. Unknown ids are never equal.
    #[must_use]
    pub fn nodes_equal(&self, a: NodeId, b: NodeId) -> bool {
        match (self.node(a), self.node(b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Returns `true` if `id` is a folder owning an open channel.
    #[must_use]
    pub fn is_connected(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(StructuralNode::is_connected)
    }

    /// Handshake reference of a handshake node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidNode`] for unknown ids and non-handshake nodes.
    pub fn handshake_ref(&self, id: NodeId) -> Result<&HandshakeRef> {
        match self.node(id).map(StructuralNode::content) {
            Some(NodeContent::Handshake(handshake)) => Ok(handshake),
            Some(_) => Err(Error::invalid_node(format!("{id} is not a handshake node"))),
            None => Err(Error::invalid_node(format!("{id} does not exist"))),
        }
    }

    /// Message of a message node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidNode`] for unknown ids and non-message nodes.
    pub fn message(&self, id: NodeId) -> Result<&MessageRecord> {
        match self.node(id).map(StructuralNode::content) {
            Some(NodeContent::Message(message)) => Ok(message),
            Some(_) => Err(Error::invalid_node(format!("{id} is not a message node"))),
            None => Err(Error::invalid_node(format!("{id} does not exist"))),
        }
    }

    // ========================================================================
    // Typed Search
    // ========================================================================

    /// First node of `node_type` in pre-order, starting with `from` itself.
    #[must_use]
    pub fn first_type_top_down(&self, from: NodeId, node_type: NodeType) -> Option<NodeId> {
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            if node.node_type() == node_type {
                return Some(id);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        None
    }

    /// Nearest ancestor of `node_type`, root included. Never looks at
    /// siblings or descendants.
    #[must_use]
    pub fn first_type_bottom_up(&self, from: NodeId, node_type: NodeType) -> Option<NodeId> {
        let mut current = self.node(from)?.parent;
        while let Some(id) = current {
            let node = self.node(id)?;
            if node.node_type() == node_type {
                return Some(id);
            }
            current = node.parent;
        }
        None
    }

    /// First sibling of `from` (same parent, `from` excluded) of `node_type`.
    #[must_use]
    pub fn first_type_sibling(&self, from: NodeId, node_type: NodeType) -> Option<NodeId> {
        let parent = self.node(from)?.parent?;
        self.node(parent)?.children.iter().copied().find(|&id| {
            id != from && self.node(id).is_some_and(|node| node.node_type() == node_type)
        })
    }

    // ========================================================================
    // Creation
    // ========================================================================

    fn allocate(&mut self) -> NodeId {
        let id = NodeId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Creates a detached folder.
    pub fn create_folder(&mut self, kind: FolderKind, name: impl Into<String>) -> NodeId {
        let id = self.allocate();
        self.nodes.insert(id, StructuralNode::folder(id, kind, name));
        id
    }

    /// Creates a detached handshake node.
    pub fn create_handshake(&mut self, handshake: HandshakeRef) -> NodeId {
        let id = self.allocate();
        self.nodes.insert(id, StructuralNode::handshake(id, handshake));
        id
    }

    /// Creates a detached message node.
    pub fn create_message(&mut self, message: MessageRecord) -> NodeId {
        let id = self.allocate();
        self.nodes.insert(id, StructuralNode::message(id, message));
        id
    }

    /// Returns the child folder of `parent` with this kind and name,
    /// creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidNode`] if `parent` does not exist.
    pub fn find_or_create_folder(
        &mut self,
        parent: NodeId,
        kind: FolderKind,
        name: &str,
    ) -> Result<NodeId> {
        if let Some(existing) = self.find_child(parent, NodeType::Folder(kind), name) {
            return Ok(existing);
        }
        let folder = self.create_folder(kind, name);
        self.add_child(parent, folder)?;
        Ok(folder)
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Appends `child` to `parent`.
    ///
    /// Returns `Ok(false)` if `child` already is a child of `parent`. A
    /// child attached elsewhere is moved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidNode`] for unknown ids, for the root as child
    /// and for attachments that would create a cycle.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<bool> {
        if !self.nodes.contains_key(&parent) {
            return Err(Error::invalid_node(format!("parent {parent} does not exist")));
        }
        let Some(current_parent) = self.node(child).map(StructuralNode::parent) else {
            return Err(Error::invalid_node(format!("child {child} does not exist")));
        };
        if child == self.root {
            return Err(Error::invalid_node("the root cannot be a child"));
        }
        if current_parent == Some(parent) {
            return Ok(false);
        }
        if child == parent || self.is_ancestor(child, parent) {
            return Err(Error::invalid_node(format!(
                "attaching {child} under {parent} would create a cycle"
            )));
        }

        if let Some(old_parent) = current_parent {
            self.detach(old_parent, child);
        }

        let position = {
            let Some(parent_node) = self.nodes.get_mut(&parent) else {
                return Err(Error::invalid_node(format!("parent {parent} does not exist")));
            };
            parent_node.children.push(child);
            parent_node.children.len() - 1
        };
        if let Some(child_node) = self.nodes.get_mut(&child) {
            child_node.parent = Some(parent);
        }
        self.renumber(parent, position);

        trace!(parent = %parent, child = %child, position, "Node attached");
        Ok(true)
    }

    /// Removes `child` from `parent` and drops its subtree.
    ///
    /// Returns `false` if `child` is not a child of `parent`. Later
    /// siblings and their subtrees are renumbered.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if !self
            .node(parent)
            .is_some_and(|node| node.children.contains(&child))
        {
            return false;
        }
        self.detach(parent, child);
        self.drop_subtree(child);
        trace!(parent = %parent, child = %child, "Node removed");
        true
    }

    /// Removes the child of `parent` at `index` and drops its subtree.
    ///
    /// Returns `false` if there is no child at `index`.
    pub fn remove_child_at(&mut self, parent: NodeId, index: usize) -> bool {
        match self.child_at(parent, index) {
            Some(child) => self.remove_child(parent, child),
            None => false,
        }
    }

    /// Records the state of a channel owned by `folder`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidNode`] if `folder` is not a folder.
    pub fn set_channel_state(
        &mut self,
        folder: NodeId,
        channel_id: ChannelId,
        state: ChannelState,
    ) -> Result<()> {
        match self.nodes.get_mut(&folder).map(|node| &mut node.content) {
            Some(NodeContent::Folder { channels, .. }) => {
                channels.insert(channel_id, state);
                Ok(())
            }
            Some(_) => Err(Error::invalid_node(format!("{folder} is not a folder"))),
            None => Err(Error::invalid_node(format!("{folder} does not exist"))),
        }
    }

    /// Drops everything below the root.
    pub fn reset(&mut self) {
        let root = self.root;
        self.nodes.retain(|id, _| *id == root);
        if let Some(node) = self.nodes.get_mut(&root) {
            node.children.clear();
            if let NodeContent::Folder { channels, .. } = &mut node.content {
                channels.clear();
            }
        }
    }

    // ========================================================================
    // Export
    // ========================================================================

    /// JSON rendering of the attached tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn snapshot(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot_node(self.root))?)
    }

    fn snapshot_node(&self, id: NodeId) -> Option<NodeSnapshot<'_>> {
        let node = self.node(id)?;
        Some(NodeSnapshot {
            name: &node.name,
            node_type: node.node_type(),
            index_path: &node.index_path,
            connected: node.is_connected(),
            content: match &node.content {
                NodeContent::Folder { .. } => None,
                content => Some(content),
            },
            children: node
                .children
                .iter()
                .filter_map(|child| self.snapshot_node(*child))
                .collect(),
        })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Returns `true` if `ancestor` is on the parent chain of `node`.
    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.node(node).and_then(StructuralNode::parent);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.node(id).and_then(StructuralNode::parent);
        }
        false
    }

    /// Unlinks `child` from `parent` and renumbers the later siblings.
    fn detach(&mut self, parent: NodeId, child: NodeId) {
        let Some(position) = self.nodes.get_mut(&parent).and_then(|node| {
            let position = node.children.iter().position(|c| *c == child)?;
            node.children.remove(position);
            Some(position)
        }) else {
            return;
        };

        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = None;
        }
        self.renumber_subtree(child, Vec::new());
        self.renumber(parent, position);
    }

    /// Recomputes paths of `parent`'s children from `from` on.
    fn renumber(&mut self, parent: NodeId, from: usize) {
        let Some(parent_node) = self.node(parent) else {
            return;
        };
        let base = parent_node.index_path.clone();
        let children: Vec<NodeId> = parent_node.children.iter().skip(from).copied().collect();

        for (offset, child) in children.into_iter().enumerate() {
            let mut path = base.clone();
            path.push(from + offset);
            self.renumber_subtree(child, path);
        }
    }

    /// Sets `path` on `id` and recomputes its whole subtree.
    fn renumber_subtree(&mut self, id: NodeId, path: Vec<usize>) {
        let mut pending = vec![(id, path)];
        while let Some((id, path)) = pending.pop() {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            for (position, child) in node.children.iter().enumerate() {
                let mut child_path = path.clone();
                child_path.push(position);
                pending.push((*child, child_path));
            }
            node.index_path = path;
        }
    }

    fn drop_subtree(&mut self, id: NodeId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            if let Some(node) = self.nodes.remove(&id) {
                pending.extend(node.children);
            }
        }
    }
}

/// Serialized view of one node.
#[derive(Serialize)]
struct NodeSnapshot<'a> {
    name: &'a str,
    node_type: NodeType,
    index_path: &'a [usize],
    connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a NodeContent>,
    children: Vec<NodeSnapshot<'a>>,
}

// ============================================================================
// Tests
// ============================================================================
