//! HTTP upgrade handshake.
//!
//! This module builds the upgrade request, models the exchanged headers and
//! extracts the negotiated parameters once the server switched protocols.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`HandshakeRequestBuilder`] | Builds the `GET` upgrade request |
//! | [`HandshakeMessage`] | Request plus final response of one exchange |
//! | [`HandshakeConfig`] | Per-attempt options and listener lists |
//!
//! # Example
//!
//! ```
//! use ws_intercept::handshake::{HandshakeConfig, HandshakeMessage, HandshakeRequestBuilder};
//!
//! # fn example() -> ws_intercept::Result<()> {
//! let request = HandshakeRequestBuilder::new("wss://example.com/live")
//!     .subprotocol("graphql-ws")
//!     .build()?;
//!
//! let config = HandshakeConfig::new(HandshakeMessage::new(request))
//!     .with_follow_redirects(false);
//! assert!(!config.follows_redirects());
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Upgrade request construction and key helpers.
pub mod builder;

/// Per-attempt configuration.
pub mod config;

/// Request, response and header types.
pub mod message;

/// Negotiated parameter extraction.
pub mod parse;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{
    CONNECTION_UPGRADE, HandshakeRequestBuilder, KEY_LENGTH, WEBSOCKET_VERSION, accept_key,
    build_upgrade_request, generate_key, header,
};
pub use config::HandshakeConfig;
pub use message::{
    HTTP_VERSION, HandshakeMessage, Headers, RequestHeader, RequestIdentity, ResponseHeader,
    STATUS_SWITCHING_PROTOCOLS,
};
pub use parse::{check_accept, parse_extensions, parse_subprotocol, parse_version};
