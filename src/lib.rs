//! WebSocket interception - connection establishment and traffic indexing.
//!
//! This library establishes WebSocket connections on behalf of an
//! intercepting proxy, runs one listener per live channel and files all
//! captured traffic into a structural tree.
//!
//! # Architecture
//!
//! ```text
//! HandshakeConfig ─► WebSocketService ─► ConnectionEstablisher ─► HandshakeTransport
//!                         │                      │                      │
//!                         │                      ▼                      ▼
//!                         │                   Channel ◄──── upgraded stream
//!                         │                      │
//!                         │                      ▼ ChannelObserver / SenderListener
//!                         └────────────► StructuralTree (via StructureObserver)
//! ```
//!
//! Key design principles:
//!
//! - The service owns its listener pool and transport factory; nothing is global
//! - Establishment runs to a terminal outcome on the calling task
//! - Every channel has one listener task that owns its socket
//! - The tree is an arena addressed by [`NodeId`], shared behind a lock
//!
//! # Quick Start
//!
//! ```no_run
//! use ws_intercept::{HandshakeConfig, Initiator, Opcode, Result, WebSocketService};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let service = WebSocketService::builder().build()?;
//!
//!     let config = HandshakeConfig::for_uri("ws://localhost:8080/chat")?;
//!     let channel = service.establish(config).await?;
//!     channel.send(Opcode::Text, "hello", Initiator::ManualRequest).await?;
//!
//!     println!("{}", service.tree().read().snapshot()?);
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`channel`] | [`Channel`], frame model, observers and dispatch |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`establish`] | [`ConnectionEstablisher`], [`OperatingMode`], [`Scope`] |
//! | [`handshake`] | Upgrade request building and parsing, [`HandshakeConfig`] |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`service`] | [`WebSocketService`] and its configuration |
//! | [`structure`] | [`StructuralTree`] and [`StructureObserver`] |
//! | [`transport`] | Transport traits, TCP transport, [`ListenerPool`] |

// ============================================================================
// Modules
// ============================================================================

/// Live channels and their listener loop.
pub mod channel;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Connection establishment, operating mode and scope.
pub mod establish;

/// Handshake request building and response parsing.
pub mod handshake;

/// Type-safe identifiers for channels, messages and tree nodes.
pub mod identifiers;

/// Owning service.
///
/// Use [`WebSocketService::builder()`] to create a configured service.
pub mod service;

/// Structural index of captured traffic.
pub mod structure;

/// Handshake transport and listener pool.
pub mod transport;

#[cfg(test)]
mod test_support;

// ============================================================================
// Re-exports
// ============================================================================

// Channel types
pub use channel::{
    Channel, ChannelInfo, ChannelObserver, ChannelState, Direction, HandshakeRef, Initiator,
    MessageRecord, Opcode, SenderListener,
};

// Error types
pub use error::{Error, Result};

// Establishment types
pub use establish::{ConnectionEstablisher, OperatingMode, Scope, ScopePolicy};

// Handshake types
pub use handshake::{
    HandshakeConfig, HandshakeMessage, HandshakeRequestBuilder, RequestHeader, ResponseHeader,
};

// Identifier types
pub use identifiers::{ChannelId, MessageId, NodeId};

// Service types
pub use service::{ServiceBuilder, ServiceOptions, WebSocketService};

// Structure types
pub use structure::{
    FolderKind, NodeContent, NodeType, SharedTree, StructuralNode, StructuralTree,
    StructureObserver,
};

// Transport types
pub use transport::{
    HandshakeTransport, ListenerPool, RedirectPolicy, RedirectValidator, TcpTransportFactory,
    TransportFactory, TransportOptions, UpgradedStream,
};
