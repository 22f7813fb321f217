//! Live WebSocket channels.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Channel`] | Handle to an established connection |
//! | [`ChannelInfo`] | Host, port, subprotocol and extensions of a channel |
//! | [`MessageRecord`] | One captured frame |
//! | [`ChannelObserver`] | Sees frames and state changes, may be hidden |
//! | [`SenderListener`] | Sees every frame with its [`Initiator`] |
//!
//! Each channel runs one listener task that owns the read half of its
//! socket. Writes go through the same task, so frames are never
//! interleaved.

// ============================================================================
// Submodules
// ============================================================================

/// Channel handle, state and listener loop.
pub mod core;

/// Observer traits and per-channel dispatch.
pub mod dispatch;

/// Frame model.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use core::{Channel, ChannelInfo, ChannelState, HandshakeRef};
pub use dispatch::{ChannelObserver, EventDispatcher, SenderListener};
pub use message::{Direction, Initiator, MessageRecord, Opcode};
