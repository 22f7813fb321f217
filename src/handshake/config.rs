//! Per-attempt establishment configuration.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::channel::{ChannelObserver, SenderListener};
use crate::error::Result;

use super::builder::build_upgrade_request;
use super::message::HandshakeMessage;

// ============================================================================
// HandshakeConfig
// ============================================================================

/// Everything one establishment attempt needs.
///
/// The establisher takes the config by value, so observers registered on it
/// afterwards cannot reach the attempt. Observers and sender listeners are
/// attached to the new channel in the order they were added here, before
/// its listener starts.
#[derive(Clone)]
pub struct HandshakeConfig {
    message: HandshakeMessage,
    follow_redirects: bool,
    reuse_session_state: bool,
    forward_only: bool,
    observers: Vec<Arc<dyn ChannelObserver>>,
    sender_listeners: Vec<Arc<dyn SenderListener>>,
}

impl fmt::Debug for HandshakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeConfig")
            .field("uri", &self.message.request.uri.as_str())
            .field("follow_redirects", &self.follow_redirects)
            .field("reuse_session_state", &self.reuse_session_state)
            .field("forward_only", &self.forward_only)
            .field("observers", &self.observers.len())
            .field("sender_listeners", &self.sender_listeners.len())
            .finish()
    }
}

impl HandshakeConfig {
    /// Wraps `message`, following redirects and reusing session state.
    #[must_use]
    pub fn new(message: HandshakeMessage) -> Self {
        Self {
            message,
            follow_redirects: true,
            reuse_session_state: true,
            forward_only: false,
            observers: Vec::new(),
            sender_listeners: Vec::new(),
        }
    }

    /// Builds a default upgrade request for `target` and wraps it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedHandshake`](crate::Error::MalformedHandshake)
    /// if `target` is not a usable WebSocket URI.
    pub fn for_uri(target: &str) -> Result<Self> {
        Ok(Self::new(HandshakeMessage::new(build_upgrade_request(target)?)))
    }

    // ========================================================================
    // Options
    // ========================================================================

    /// Sets whether redirects are followed.
    #[inline]
    #[must_use]
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Sets whether the transport shares the service-wide session state.
    #[inline]
    #[must_use]
    pub fn with_reuse_session_state(mut self, reuse: bool) -> Self {
        self.reuse_session_state = reuse;
        self
    }

    /// Establishes the channel hidden from observers.
    #[inline]
    #[must_use]
    pub fn with_forward_only(mut self, forward_only: bool) -> Self {
        self.forward_only = forward_only;
        self
    }

    /// Adds an observer. The same instance is only kept once.
    pub fn add_observer(&mut self, observer: Arc<dyn ChannelObserver>) {
        if !self.observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
            self.observers.push(observer);
        }
    }

    /// Adds a sender listener. The same instance is only kept once.
    pub fn add_sender_listener(&mut self, listener: Arc<dyn SenderListener>) {
        if !self.sender_listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            self.sender_listeners.push(listener);
        }
    }

    /// Builder-style [`add_observer`](Self::add_observer).
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn ChannelObserver>) -> Self {
        self.add_observer(observer);
        self
    }

    /// Builder-style [`add_sender_listener`](Self::add_sender_listener).
    #[must_use]
    pub fn sender_listener(mut self, listener: Arc<dyn SenderListener>) -> Self {
        self.add_sender_listener(listener);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// The handshake to send.
    #[inline]
    #[must_use]
    pub fn message(&self) -> &HandshakeMessage {
        &self.message
    }

    /// Mutable access to the handshake, for adjusting headers.
    #[inline]
    pub fn message_mut(&mut self) -> &mut HandshakeMessage {
        &mut self.message
    }

    #[inline]
    #[must_use]
    pub fn follows_redirects(&self) -> bool {
        self.follow_redirects
    }

    #[inline]
    #[must_use]
    pub fn reuses_session_state(&self) -> bool {
        self.reuse_session_state
    }

    #[inline]
    #[must_use]
    pub fn is_forward_only(&self) -> bool {
        self.forward_only
    }

    /// Observers in registration order.
    #[inline]
    #[must_use]
    pub fn observers(&self) -> &[Arc<dyn ChannelObserver>] {
        &self.observers
    }

    /// Sender listeners in registration order.
    #[inline]
    #[must_use]
    pub fn sender_listeners(&self) -> &[Arc<dyn SenderListener>] {
        &self.sender_listeners
    }

    /// Splits the config into the message and the listener lists.
    pub(crate) fn into_parts(
        self,
    ) -> (
        HandshakeMessage,
        Vec<Arc<dyn ChannelObserver>>,
        Vec<Arc<dyn SenderListener>>,
    ) {
        (self.message, self.observers, self.sender_listeners)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::channel::{ChannelInfo, ChannelState, MessageRecord};

    struct Quiet;

    impl ChannelObserver for Quiet {
        fn on_message_frame(&self, _: &ChannelInfo, _: &MessageRecord) -> bool {
            true
        }

        fn on_state_change(&self, _: ChannelState, _: &ChannelInfo) {}
    }

    #[test]
    fn test_defaults() {
        let config = HandshakeConfig::for_uri("ws://example.com/").unwrap();
        assert!(config.follows_redirects());
        assert!(config.reuses_session_state());
        assert!(!config.is_forward_only());
        assert!(config.observers().is_empty());
    }

    #[test]
    fn test_for_uri_rejects_garbage() {
        assert!(HandshakeConfig::for_uri("not a uri").is_err());
    }

    #[test]
    fn test_observers_deduplicated_in_order() {
        let a: Arc<dyn ChannelObserver> = Arc::new(Quiet);
        let b: Arc<dyn ChannelObserver> = Arc::new(Quiet);

        let config = HandshakeConfig::for_uri("ws://example.com/")
            .unwrap()
            .observer(Arc::clone(&a))
            .observer(Arc::clone(&b))
            .observer(Arc::clone(&a));

        assert_eq!(config.observers().len(), 2);
        assert!(Arc::ptr_eq(&config.observers()[0], &a));
        assert!(Arc::ptr_eq(&config.observers()[1], &b));
    }

    #[test]
    fn test_clone_is_independent() {
        let original = HandshakeConfig::for_uri("ws://example.com/").unwrap();
        let mut copy = original.clone().with_follow_redirects(false);
        copy.add_observer(Arc::new(Quiet));

        assert!(original.follows_redirects());
        assert!(original.observers().is_empty());
    }
}
