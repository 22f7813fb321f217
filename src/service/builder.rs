//! Builder pattern for service configuration.
//!
//! # Example
//!
//! ```no_run
//! use ws_intercept::{OperatingMode, WebSocketService};
//!
//! # fn example() -> ws_intercept::Result<()> {
//! let service = WebSocketService::builder()
//!     .mode(OperatingMode::Protect)
//!     .scope_include(r"wss?://example\.com/.*")
//!     .ignore_channel(r".*/telemetry")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::establish::OperatingMode;
use crate::transport::{ListenerPool, TcpTransportFactory, TransportFactory, TransportOptions};

use super::core::WebSocketService;
use super::options::ServiceOptions;

// ============================================================================
// ServiceBuilder
// ============================================================================

/// Builder for a [`WebSocketService`].
///
/// Use [`WebSocketService::builder()`] to create one. Without an explicit
/// transport factory the service uses a [`TcpTransportFactory`]; without an
/// explicit pool it creates its own [`ListenerPool`].
#[derive(Default)]
pub struct ServiceBuilder {
    options: ServiceOptions,
    transports: Option<Arc<dyn TransportFactory>>,
    pool: Option<Arc<ListenerPool>>,
}

impl fmt::Debug for ServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBuilder")
            .field("options", &self.options)
            .field("custom_transport", &self.transports.is_some())
            .field("pool", &self.pool)
            .finish()
    }
}

// ============================================================================
// ServiceBuilder Implementation
// ============================================================================

impl ServiceBuilder {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all options at once.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ServiceOptions) -> Self {
        self.options = options;
        self
    }

    #[inline]
    #[must_use]
    pub fn mode(mut self, mode: OperatingMode) -> Self {
        self.options.mode = mode;
        self
    }

    #[inline]
    #[must_use]
    pub fn scope_include(mut self, pattern: impl Into<String>) -> Self {
        self.options = self.options.with_scope_include(pattern);
        self
    }

    #[inline]
    #[must_use]
    pub fn scope_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.options = self.options.with_scope_exclude(pattern);
        self
    }

    /// Establishes channels to matching URLs forward-only.
    #[inline]
    #[must_use]
    pub fn ignore_channel(mut self, pattern: impl Into<String>) -> Self {
        self.options = self.options.with_ignored_channel(pattern);
        self
    }

    #[inline]
    #[must_use]
    pub fn remove_extensions_header(mut self, remove: bool) -> Self {
        self.options.remove_extensions_header = remove;
        self
    }

    /// Settings of the default TCP transport. Ignored when a custom
    /// factory is set.
    #[inline]
    #[must_use]
    pub fn transport_options(mut self, transport: TransportOptions) -> Self {
        self.options.transport = transport;
        self
    }

    /// Uses a custom transport factory.
    #[inline]
    #[must_use]
    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transports = Some(factory);
        self
    }

    /// Runs listeners on an existing pool.
    #[inline]
    #[must_use]
    pub fn listener_pool(mut self, pool: Arc<ListenerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Builds the service with validation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the options are
    /// invalid.
    pub fn build(self) -> Result<WebSocketService> {
        let scope = self.options.validate()?;

        let transports = self.transports.unwrap_or_else(|| {
            Arc::new(TcpTransportFactory::new(self.options.transport)) as Arc<dyn TransportFactory>
        });
        let pool = self.pool.unwrap_or_else(|| Arc::new(ListenerPool::new()));

        WebSocketService::new(self.options, scope, transports, pool)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::Error;

    #[test]
    fn test_new_builder_uses_defaults() {
        let builder = ServiceBuilder::new();
        assert_eq!(builder.options, ServiceOptions::default());
        assert!(builder.transports.is_none());
        assert!(builder.pool.is_none());
    }

    #[test]
    fn test_setters_reach_options() {
        let builder = ServiceBuilder::new()
            .mode(OperatingMode::Safe)
            .scope_include("a")
            .scope_exclude("b")
            .ignore_channel("c")
            .remove_extensions_header(true)
            .transport_options(TransportOptions::default().with_max_redirects(1));

        assert_eq!(builder.options.mode, OperatingMode::Safe);
        assert_eq!(builder.options.scope_includes, vec!["a".to_string()]);
        assert_eq!(builder.options.scope_excludes, vec!["b".to_string()]);
        assert_eq!(builder.options.ignore_list, vec!["c".to_string()]);
        assert!(builder.options.remove_extensions_header);
        assert_eq!(builder.options.transport.max_redirects, 1);
    }

    #[test]
    fn test_build_rejects_invalid_pattern() {
        let err = ServiceBuilder::new().ignore_channel("(").build().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_build_uses_given_pool() {
        let pool = Arc::new(ListenerPool::new());
        let service = ServiceBuilder::new()
            .listener_pool(Arc::clone(&pool))
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(service.listener_pool(), &pool));
    }
}
