//! Structural tree nodes.
//!
//! A node is a tagged variant over folders, handshakes and messages. All
//! navigation lives in [`StructuralTree`](super::StructuralTree); nodes only
//! hold their own data plus plain-id links.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::channel::{ChannelState, Direction, HandshakeRef, MessageRecord};
use crate::identifiers::{ChannelId, NodeId};

// ============================================================================
// FolderKind / NodeType
// ============================================================================

/// What a folder groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderKind {
    /// Tree root.
    Root,
    /// One `host:port`.
    Host,
    /// Handshakes of a host.
    Handshakes,
    /// Data frames of a host.
    Messages,
    /// Ping and pong frames of a host.
    Heartbeats,
    /// Close frames of a host.
    Close,
}

impl FolderKind {
    /// Name given to folders of this kind when none is supplied.
    #[must_use]
    pub const fn default_name(self) -> &'static str {
        match self {
            Self::Root => "Sites",
            Self::Host => "Host",
            Self::Handshakes => "Handshakes",
            Self::Messages => "Messages",
            Self::Heartbeats => "Heartbeats",
            Self::Close => "Close",
        }
    }
}

/// Type tag used by the typed searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Folder(FolderKind),
    Handshake,
    Message,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Folder(kind) => write!(f, "folder:{}", kind.default_name().to_ascii_lowercase()),
            Self::Handshake => f.write_str("handshake"),
            Self::Message => f.write_str("message"),
        }
    }
}

// ============================================================================
// NodeContent
// ============================================================================

/// Variant data of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeContent {
    Folder {
        kind: FolderKind,
        /// Channels owned by this folder and their last known state.
        channels: FxHashMap<ChannelId, ChannelState>,
    },
    Handshake(HandshakeRef),
    Message(MessageRecord),
}

// ============================================================================
// StructuralNode
// ============================================================================

/// One entry of the structural index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralNode {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) content: NodeContent,
    pub(crate) index_path: Vec<usize>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl StructuralNode {
    pub(crate) fn folder(id: NodeId, kind: FolderKind, name: impl Into<String>) -> Self {
        Self::detached(
            id,
            name.into(),
            NodeContent::Folder {
                kind,
                channels: FxHashMap::default(),
            },
        )
    }

    pub(crate) fn handshake(id: NodeId, handshake: HandshakeRef) -> Self {
        let name = format!("{} {}", handshake.method, handshake.uri);
        Self::detached(id, name, NodeContent::Handshake(handshake))
    }

    pub(crate) fn message(id: NodeId, message: MessageRecord) -> Self {
        let arrow = match message.direction {
            Direction::Incoming => "<-",
            Direction::Outgoing => "->",
        };
        let name = format!("#{} {arrow} {}", message.message_id, message.opcode);
        Self::detached(id, name, NodeContent::Message(message))
    }

    fn detached(id: NodeId, name: String, content: NodeContent) -> Self {
        Self {
            id,
            name,
            content,
            index_path: Vec::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn content(&self) -> &NodeContent {
        &self.content
    }

    /// Sibling positions from the root down to this node.
    ///
    /// Empty for nodes not attached to anything.
    #[inline]
    #[must_use]
    pub fn index_path(&self) -> &[usize] {
        &self.index_path
    }

    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[inline]
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    #[inline]
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match &self.content {
            NodeContent::Folder { kind, .. } => NodeType::Folder(*kind),
            NodeContent::Handshake(_) => NodeType::Handshake,
            NodeContent::Message(_) => NodeType::Message,
        }
    }

    /// Channels owned by this node. Empty for non-folders.
    #[must_use]
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        match &self.content {
            NodeContent::Folder { channels, .. } => channels.keys().copied().collect(),
            _ => Vec::new(),
        }
    }

    /// Returns `true` if any channel owned by this node is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        match &self.content {
            NodeContent::Folder { channels, .. } => {
                channels.values().any(|state| *state == ChannelState::Open)
            }
            _ => false,
        }
    }
}

/// Structural equality.
///
/// Messages compare by message identity whenever either side is a message;
/// everything else compares by type and name.
impl PartialEq for StructuralNode {
    fn eq(&self, other: &Self) -> bool {
        match (&self.content, &other.content) {
            (NodeContent::Message(a), NodeContent::Message(b)) => a.same_message(b),
            (NodeContent::Message(_), _) | (_, NodeContent::Message(_)) => false,
            _ => self.node_type() == other.node_type() && self.name == other.name,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
