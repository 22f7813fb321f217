//! Owning service.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`WebSocketService`] | Establishes channels, tracks them and indexes their traffic |
//! | [`ServiceBuilder`] | Fluent configuration builder |
//! | [`ServiceOptions`] | Mode, scope, ignore list and transport limits |
//!
//! The service constructs the listener pool and transport factory once
//! (or takes injected ones) and hands them to its
//! [`ConnectionEstablisher`](crate::establish::ConnectionEstablisher).
//! Nothing is kept in global state; shutting the service down stops its
//! listeners.
//!
//! # Example
//!
//! ```no_run
//! use ws_intercept::{HandshakeConfig, OperatingMode, WebSocketService};
//!
//! # async fn example() -> ws_intercept::Result<()> {
//! let service = WebSocketService::builder()
//!     .mode(OperatingMode::Protect)
//!     .scope_include(r"ws://localhost(:\d+)?/.*")
//!     .build()?;
//!
//! let channel = service
//!     .establish(HandshakeConfig::for_uri("ws://localhost:8080/feed")?)
//!     .await?;
//! println!("{} is {}", channel.id(), channel.state());
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for service configuration.
pub mod builder;

/// Core service implementation.
pub mod core;

/// Service options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ServiceBuilder;
pub use core::WebSocketService;
pub use options::ServiceOptions;
