//! Channel observer that files traffic into a [`SharedTree`].
//!
//! ```text
//! Sites
//! └── host:port                 ← one per ChannelInfo::host_key()
//!     ├── Handshakes            ← handshake node added on Open
//!     ├── Messages              ← text, binary, continuation
//!     ├── Heartbeats            ← ping, pong
//!     └── Close                 ← close
//! ```

// ============================================================================
// Imports
// ============================================================================

use tracing::{trace, warn};

use crate::channel::{ChannelInfo, ChannelObserver, ChannelState, MessageRecord, Opcode};
use crate::error::Result;
use crate::identifiers::NodeId;

use super::node::{FolderKind, NodeType};
use super::tree::{SharedTree, StructuralTree};

// ============================================================================
// StructureObserver
// ============================================================================

/// Keeps the structural tree in step with channel events.
#[derive(Debug, Clone)]
pub struct StructureObserver {
    tree: SharedTree,
}

impl StructureObserver {
    /// Runs after observers with the default order.
    pub const OBSERVING_ORDER: i32 = 100;

    #[must_use]
    pub fn new(tree: SharedTree) -> Self {
        Self { tree }
    }

    #[inline]
    #[must_use]
    pub fn tree(&self) -> &SharedTree {
        &self.tree
    }

    fn record_state(&self, state: ChannelState, channel: &ChannelInfo) -> Result<()> {
        let mut tree = self.tree.write();
        let host = if state == ChannelState::Open {
            host_folder(&mut tree, channel)?
        } else {
            // Hosts pruned by a reset stay pruned.
            let root = tree.root();
            match tree.find_child(root, NodeType::Folder(FolderKind::Host), &channel.host_key()) {
                Some(host) => host,
                None => return Ok(()),
            }
        };
        tree.set_channel_state(host, channel.id, state)?;

        if state == ChannelState::Open {
            let folder = tree.find_or_create_folder(
                host,
                FolderKind::Handshakes,
                FolderKind::Handshakes.default_name(),
            )?;
            let handshake = tree.create_handshake(channel.handshake.clone());
            tree.add_child(folder, handshake)?;
        }
        Ok(())
    }

    fn record_message(&self, channel: &ChannelInfo, message: &MessageRecord) -> Result<()> {
        let kind = match message.opcode {
            Opcode::Ping | Opcode::Pong => FolderKind::Heartbeats,
            Opcode::Close => FolderKind::Close,
            Opcode::Text | Opcode::Binary | Opcode::Continuation => FolderKind::Messages,
        };

        let mut tree = self.tree.write();
        let host = host_folder(&mut tree, channel)?;
        let folder = tree.find_or_create_folder(host, kind, kind.default_name())?;
        let node = tree.create_message(message.clone());
        tree.add_child(folder, node)?;
        Ok(())
    }
}

fn host_folder(tree: &mut StructuralTree, channel: &ChannelInfo) -> Result<NodeId> {
    let root = tree.root();
    tree.find_or_create_folder(root, FolderKind::Host, &channel.host_key())
}

impl ChannelObserver for StructureObserver {
    fn observing_order(&self) -> i32 {
        Self::OBSERVING_ORDER
    }

    fn on_message_frame(&self, channel: &ChannelInfo, message: &MessageRecord) -> bool {
        if let Err(e) = self.record_message(channel, message) {
            warn!(channel_id = %channel.id, error = %e, "Failed to index frame");
        } else {
            trace!(channel_id = %channel.id, message_id = %message.message_id, "Frame indexed");
        }
        true
    }

    fn on_state_change(&self, state: ChannelState, channel: &ChannelInfo) {
        if let Err(e) = self.record_state(state, channel) {
            warn!(channel_id = %channel.id, state = %state, error = %e, "Failed to index state change");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
