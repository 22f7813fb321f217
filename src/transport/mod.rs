//! Handshake transport layer.
//!
//! The transport is an external collaborator: it performs the HTTP
//! exchange for an upgrade request, follows redirects when asked to, and
//! hands back the raw upgraded connection. The establishment routine only
//! sees the traits defined here.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐  create(reuse)   ┌──────────────────────┐
//! │ ConnectionEstablisher│─────────────────►│  TransportFactory    │
//! │                      │                  └──────────┬───────────┘
//! │  send(msg, policy) ──┼──────────────────►┌─────────▼───────────┐
//! │  take_upgraded()   ◄─┼───────────────────│ HandshakeTransport  │
//! │  shutdown()        ──┼──────────────────►│ (TcpTransport, ...) │
//! └──────────────────────┘                   └─────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `cookies` | Session-state cookie jar |
//! | `pool` | Listener task pool shared by all channels |
//! | `tcp` | Plain HTTP/1.1 transport over `tokio::net::TcpStream` |

// ============================================================================
// Submodules
// ============================================================================

/// Session-state cookie jar.
pub mod cookies;

/// Listener task pool.
pub mod pool;

/// Plain TCP transport.
pub mod tcp;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use url::Url;

use crate::error::Result;
use crate::handshake::HandshakeMessage;

// ============================================================================
// Re-exports
// ============================================================================

pub use cookies::CookieJar;
pub use pool::ListenerPool;
pub use tcp::{TcpTransport, TcpTransportFactory, TransportOptions};

// ============================================================================
// Upgraded Stream
// ============================================================================

/// Byte stream usable as an upgraded WebSocket connection.
pub trait AsyncIo: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> AsyncIo for T {}

/// Boxed [`AsyncIo`].
pub type BoxedIo = Box<dyn AsyncIo>;

/// Raw connection left behind by a successful upgrade.
pub struct UpgradedStream {
    /// The socket.
    pub io: BoxedIo,
    /// Bytes already read past the response head. They may hold the
    /// first WebSocket frames.
    pub buffered: Vec<u8>,
}

impl UpgradedStream {
    /// Wraps a socket with nothing buffered.
    #[must_use]
    pub fn new(io: impl AsyncIo + 'static) -> Self {
        Self {
            io: Box::new(io),
            buffered: Vec::new(),
        }
    }

    /// Wraps a socket together with bytes read ahead.
    #[must_use]
    pub fn with_buffered(io: impl AsyncIo + 'static, buffered: Vec<u8>) -> Self {
        Self {
            io: Box::new(io),
            buffered,
        }
    }
}

impl fmt::Debug for UpgradedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradedStream")
            .field("buffered", &self.buffered.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Redirects
// ============================================================================

/// Decides whether a redirect hop may be followed.
pub trait RedirectValidator: Send + Sync {
    /// Called once per hop with the absolute target.
    fn is_valid(&self, target: &Url) -> bool;
}

/// How the transport treats redirect responses.
#[derive(Clone, Copy)]
pub enum RedirectPolicy<'a> {
    /// Send once; a redirect response is final.
    DoNotFollow,
    /// Follow redirects, asking the validator about every hop. A hop the
    /// validator rejects is not followed and its response is final.
    Follow(&'a dyn RedirectValidator),
}

impl RedirectPolicy<'_> {
    /// Returns `true` if redirects are followed.
    #[inline]
    #[must_use]
    pub fn follows(&self) -> bool {
        matches!(self, Self::Follow(_))
    }
}

impl fmt::Debug for RedirectPolicy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DoNotFollow => f.write_str("DoNotFollow"),
            Self::Follow(_) => f.write_str("Follow(..)"),
        }
    }
}

// ============================================================================
// Transport Traits
// ============================================================================

/// Performs one handshake exchange.
///
/// One instance serves one establishment attempt and is shut down
/// afterwards, whatever the outcome.
#[async_trait]
pub trait HandshakeTransport: Send {
    /// Sends the request and stores the final response in `message`.
    ///
    /// # Errors
    ///
    /// - [`Error::Transport`](crate::Error::Transport) on DNS or socket failure
    /// - [`Error::Tls`](crate::Error::Tls) if a secure connection fails
    async fn send(&mut self, message: &mut HandshakeMessage, redirects: RedirectPolicy<'_>)
    -> Result<()>;

    /// Takes the upgraded connection of the last exchange, if it switched
    /// protocols.
    fn take_upgraded(&mut self) -> Option<UpgradedStream>;

    /// Releases all resources held by this transport.
    async fn shutdown(&mut self);
}

/// Creates a transport per establishment attempt.
pub trait TransportFactory: Send + Sync {
    /// Creates a transport. With `reuse_session_state` the transport shares
    /// the factory-wide session state; otherwise it gets a private one that
    /// dies with it.
    fn create(&self, reuse_session_state: bool) -> Box<dyn HandshakeTransport>;
}
