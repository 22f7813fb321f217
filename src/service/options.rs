//! Service configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//!
//! use ws_intercept::{OperatingMode, ServiceOptions};
//!
//! let options = ServiceOptions::new()
//!     .with_mode(OperatingMode::Protect)
//!     .with_scope_include(r"wss?://example\.com/.*")
//!     .with_ignored_channel(r".*/telemetry")
//!     .with_connect_timeout(Duration::from_secs(5));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::establish::{OperatingMode, Scope};
use crate::error::{Error, Result};
use crate::structure::FolderKind;
use crate::transport::TransportOptions;

// ============================================================================
// ServiceOptions
// ============================================================================

/// Settings of a [`WebSocketService`](super::WebSocketService).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Initial operating mode.
    pub mode: OperatingMode,

    /// Scope include patterns.
    pub scope_includes: Vec<String>,

    /// Scope exclude patterns.
    pub scope_excludes: Vec<String>,

    /// Channel URLs matching any of these are established forward-only.
    pub ignore_list: Vec<String>,

    /// Strip `Sec-WebSocket-Extensions` from outgoing handshakes.
    pub remove_extensions_header: bool,

    /// Name of the structural tree's root folder.
    pub root_name: String,

    /// Settings of the default TCP transport.
    pub transport: TransportOptions,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ServiceOptions {
    /// Standard mode, empty scope, nothing ignored.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: OperatingMode::default(),
            scope_includes: Vec::new(),
            scope_excludes: Vec::new(),
            ignore_list: Vec::new(),
            remove_extensions_header: false,
            root_name: FolderKind::Root.default_name().to_string(),
            transport: TransportOptions::default(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ServiceOptions {
    #[inline]
    #[must_use]
    pub fn with_mode(mut self, mode: OperatingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Adds a scope include pattern.
    #[inline]
    #[must_use]
    pub fn with_scope_include(mut self, pattern: impl Into<String>) -> Self {
        self.scope_includes.push(pattern.into());
        self
    }

    /// Adds a scope exclude pattern.
    #[inline]
    #[must_use]
    pub fn with_scope_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.scope_excludes.push(pattern.into());
        self
    }

    /// Adds a channel ignore pattern.
    #[inline]
    #[must_use]
    pub fn with_ignored_channel(mut self, pattern: impl Into<String>) -> Self {
        self.ignore_list.push(pattern.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_remove_extensions_header(mut self, remove: bool) -> Self {
        self.remove_extensions_header = remove;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_root_name(mut self, name: impl Into<String>) -> Self {
        self.root_name = name.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_redirects(mut self, max: usize) -> Self {
        self.transport = self.transport.with_max_redirects(max);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.transport = self.transport.with_connect_timeout(Some(timeout));
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ServiceOptions {
    /// Checks the options and compiles the scope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty root name, a zero connect
    /// timeout or an invalid pattern.
    pub fn validate(&self) -> Result<Scope> {
        if self.root_name.trim().is_empty() {
            return Err(Error::config("root folder name must not be empty"));
        }
        if self.transport.connect_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::config(
                "connect timeout must be positive. Use None to disable it.",
            ));
        }
        crate::establish::mode::compile_patterns(&self.ignore_list)?;
        Scope::new(&self.scope_includes, &self.scope_excludes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ServiceOptions::new();
        assert_eq!(options.mode, OperatingMode::Standard);
        assert_eq!(options.root_name, "Sites");
        assert!(!options.remove_extensions_header);
        assert!(options.ignore_list.is_empty());
        assert_eq!(options, ServiceOptions::default());
    }

    #[test]
    fn test_builder_chain() {
        let options = ServiceOptions::new()
            .with_mode(OperatingMode::Protect)
            .with_scope_include(r"ws://a\.test/.*")
            .with_scope_exclude(r".*/admin")
            .with_ignored_channel(r".*/metrics")
            .with_remove_extensions_header(true)
            .with_max_redirects(3)
            .with_connect_timeout(Duration::from_secs(2));

        assert_eq!(options.mode, OperatingMode::Protect);
        assert_eq!(options.scope_includes.len(), 1);
        assert_eq!(options.scope_excludes.len(), 1);
        assert_eq!(options.ignore_list, vec![r".*/metrics".to_string()]);
        assert!(options.remove_extensions_header);
        assert_eq!(options.transport.max_redirects, 3);
        assert_eq!(options.transport.connect_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let bad_pattern = ServiceOptions::new().with_ignored_channel("(");
        assert!(matches!(bad_pattern.validate(), Err(Error::Config { .. })));

        let bad_scope = ServiceOptions::new().with_scope_include("[");
        assert!(matches!(bad_scope.validate(), Err(Error::Config { .. })));

        let empty_root = ServiceOptions::new().with_root_name("  ");
        assert!(matches!(empty_root.validate(), Err(Error::Config { .. })));

        let zero_timeout = ServiceOptions::new().with_connect_timeout(Duration::ZERO);
        assert!(matches!(zero_timeout.validate(), Err(Error::Config { .. })));

        assert!(ServiceOptions::new().validate().is_ok());
    }
}
