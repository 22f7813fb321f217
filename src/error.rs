//! Error types for WebSocket interception.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use ws_intercept::{HandshakeConfig, Result, WebSocketService};
//!
//! async fn example(service: &WebSocketService) -> Result<()> {
//!     let config = HandshakeConfig::for_uri("ws://example.com/chat")?;
//!     let channel = service.establish(config).await?;
//!     channel.close();
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Establishment | [`Error::MalformedHandshake`], [`Error::OutOfScopeRequest`], [`Error::OutOfScopeRedirect`], [`Error::Transport`], [`Error::Tls`], [`Error::ProtocolUpgradeFailed`], [`Error::ChannelConstruction`] |
//! | Channel | [`Error::ConnectionClosed`], [`Error::InvalidFrame`], [`Error::ChannelNotFound`] |
//! | Structure | [`Error::InvalidNode`] |
//! | External | [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::error::Error as StdError;
use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::ChannelId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

/// Boxed root cause carried by [`Error::Tls`].
pub type BoxedCause = Box<dyn StdError + Send + Sync + 'static>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when service options fail validation.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Establishment Errors
    // ========================================================================
    /// The handshake request could not be constructed or is invalid.
    ///
    /// Fatal, never retried.
    #[error("Malformed handshake: {message}")]
    MalformedHandshake {
        /// Description of what is wrong with the request.
        message: String,
    },

    /// The initial target is not allowed by the operating mode.
    #[error("Target not allowed in current mode: {uri}")]
    OutOfScopeRequest {
        /// The rejected target.
        uri: String,
    },

    /// A redirect hop pointed at a target not allowed by the operating mode.
    #[error("Redirect target not allowed in current mode: {uri}")]
    OutOfScopeRedirect {
        /// The offending redirect target.
        uri: String,
    },

    /// DNS or socket failure, or the upgraded stream was not available.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// TLS negotiation with the peer failed.
    #[error("TLS error for {uri}: {message}")]
    Tls {
        /// Peer URI.
        uri: String,
        /// Description of the failure.
        message: String,
        /// Root cause, when one is available.
        #[source]
        source: Option<BoxedCause>,
    },

    /// The exchange completed but the server did not switch protocols.
    #[error("Protocol upgrade failed with status {status}")]
    ProtocolUpgradeFailed {
        /// Observed response status code.
        status: u16,
    },

    /// Building the channel after a valid upgrade failed.
    #[error("Channel construction failed: {message}")]
    ChannelConstruction {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Channel Errors
    // ========================================================================
    /// The channel is closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A frame that cannot be written on its own.
    #[error("Invalid frame: {message}")]
    InvalidFrame {
        /// Why the frame was refused.
        message: String,
    },

    /// No channel registered under this id.
    #[error("Channel not found: {channel_id}")]
    ChannelNotFound {
        /// The missing channel id.
        channel_id: ChannelId,
    },

    // ========================================================================
    // Structure Errors
    // ========================================================================
    /// A structural tree request that makes no sense for the given node.
    ///
    /// For example asking a folder for its handshake reference.
    #[error("Invalid node: {message}")]
    InvalidNode {
        /// Description of the invalid request.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket framing error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Self {
        Self::transport(err.to_string())
    }
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a malformed handshake error.
    #[inline]
    pub fn malformed_handshake(message: impl Into<String>) -> Self {
        Self::MalformedHandshake {
            message: message.into(),
        }
    }

    /// Creates an out-of-scope request error.
    #[inline]
    pub fn out_of_scope_request(uri: impl Into<String>) -> Self {
        Self::OutOfScopeRequest { uri: uri.into() }
    }

    /// Creates an out-of-scope redirect error.
    #[inline]
    pub fn out_of_scope_redirect(uri: impl Into<String>) -> Self {
        Self::OutOfScopeRedirect { uri: uri.into() }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a TLS error.
    #[inline]
    pub fn tls(uri: impl Into<String>, message: impl Into<String>, source: Option<BoxedCause>) -> Self {
        Self::Tls {
            uri: uri.into(),
            message: message.into(),
            source,
        }
    }

    /// Creates a protocol upgrade failure.
    #[inline]
    pub fn protocol_upgrade_failed(status: u16) -> Self {
        Self::ProtocolUpgradeFailed { status }
    }

    /// Creates a channel construction error.
    #[inline]
    pub fn channel_construction(message: impl Into<String>) -> Self {
        Self::ChannelConstruction {
            message: message.into(),
        }
    }

    /// Creates an invalid frame error.
    #[inline]
    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame {
            message: message.into(),
        }
    }

    /// Creates a channel not found error.
    #[inline]
    pub fn channel_not_found(channel_id: ChannelId) -> Self {
        Self::ChannelNotFound { channel_id }
    }

    /// Creates an invalid node error.
    #[inline]
    pub fn invalid_node(message: impl Into<String>) -> Self {
        Self::InvalidNode {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error ends a connection attempt.
    #[inline]
    #[must_use]
    pub fn is_establishment_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedHandshake { .. }
                | Self::OutOfScopeRequest { .. }
                | Self::OutOfScopeRedirect { .. }
                | Self::Transport { .. }
                | Self::Tls { .. }
                | Self::ProtocolUpgradeFailed { .. }
                | Self::ChannelConstruction { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Tls { .. } | Self::ConnectionClosed | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry. Scope and handshake
    /// rejections never do.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::ConnectionClosed)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::out_of_scope_redirect("http://evil.example/");
        assert_eq!(
            err.to_string(),
            "Redirect target not allowed in current mode: http://evil.example/"
        );
    }

    #[test]
    fn test_upgrade_failed_carries_status() {
        let err = Error::protocol_upgrade_failed(200);
        assert!(matches!(err, Error::ProtocolUpgradeFailed { status: 200 }));
        assert_eq!(err.to_string(), "Protocol upgrade failed with status 200");
    }

    #[test]
    fn test_tls_error_exposes_source() {
        let cause = IoError::new(ErrorKind::InvalidData, "bad certificate");
        let err = Error::tls("wss://example.com/", "handshake failed", Some(Box::new(cause)));

        let source = StdError::source(&err).expect("tls error keeps its cause");
        assert_eq!(source.to_string(), "bad certificate");
    }

    #[test]
    fn test_is_establishment_error() {
        assert!(Error::malformed_handshake("no host").is_establishment_error());
        assert!(Error::channel_construction("socket gone").is_establishment_error());
        assert!(!Error::ConnectionClosed.is_establishment_error());
        assert!(!Error::invalid_node("root").is_establishment_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::transport("reset").is_recoverable());
        assert!(!Error::out_of_scope_redirect("x").is_recoverable());
        assert!(!Error::out_of_scope_request("x").is_recoverable());
        assert!(!Error::protocol_upgrade_failed(404).is_recoverable());
    }

    #[test]
    fn test_from_io_error_is_transport() {
        let io_err = IoError::new(ErrorKind::ConnectionRefused, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Transport { .. }));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
