//! Connection establishment.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ConnectionEstablisher`] | Sends the handshake and builds the channel |
//! | [`OperatingMode`] | Which targets may be reached |
//! | [`Scope`] | Include/exclude URL patterns |
//! | [`ScopePolicy`] | Live mode and scope shared with the service |

// ============================================================================
// Submodules
// ============================================================================

/// Establishment routine.
pub mod establisher;

/// Operating mode and scope.
pub mod mode;

// ============================================================================
// Re-exports
// ============================================================================

pub use establisher::ConnectionEstablisher;
pub use mode::{OperatingMode, Scope, ScopePolicy};
