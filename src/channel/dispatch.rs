//! Observer and sender-listener registration plus per-channel dispatch.
//!
//! Every channel owns one [`EventDispatcher`]. All notifications for that
//! channel go through it, so delivery order is fixed by a single sorted
//! list instead of by whoever registered last.
//!
//! # Delivery rules
//!
//! - Observers run in ascending [`ChannelObserver::observing_order`];
//!   equal orders keep registration order.
//! - An observer returning `false` from `on_message_frame` stops delivery
//!   of that frame to later observers.
//! - Observers are skipped for frames and state changes while the channel
//!   is forward-only. Sender listeners always run.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::trace;

use super::core::{ChannelInfo, ChannelState};
use super::message::{Initiator, MessageRecord};

// ============================================================================
// Traits
// ============================================================================

/// Component interested in frames and state changes of a channel.
pub trait ChannelObserver: Send + Sync {
    /// Lower values are notified first.
    fn observing_order(&self) -> i32 {
        0
    }

    /// Called for every frame. Return `false` to hide it from later observers.
    fn on_message_frame(&self, channel: &ChannelInfo, message: &MessageRecord) -> bool;

    /// Called on every state transition.
    fn on_state_change(&self, state: ChannelState, channel: &ChannelInfo);

    /// Called when the channel becomes forward-only (`true`) or visible again.
    fn on_visibility_change(&self, forward_only: bool, channel: &ChannelInfo) {
        let _ = (forward_only, channel);
    }
}

/// Component that must see every frame, regardless of visibility.
pub trait SenderListener: Send + Sync {
    /// Lower values are notified first.
    fn sending_order(&self) -> i32 {
        0
    }

    /// Called for every frame with the component that caused it.
    fn on_message_frame(&self, channel: &ChannelInfo, message: &MessageRecord, initiator: Initiator);

    /// Called on every state transition.
    fn on_state_change(&self, state: ChannelState, channel: &ChannelInfo);
}

// ============================================================================
// EventDispatcher
// ============================================================================

/// Ordered fan-out of channel events.
pub struct EventDispatcher {
    observers: RwLock<Vec<Arc<dyn ChannelObserver>>>,
    sender_listeners: RwLock<Vec<Arc<dyn SenderListener>>>,
    forward_only: AtomicBool,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("observers", &self.observers.read().len())
            .field("sender_listeners", &self.sender_listeners.read().len())
            .field("forward_only", &self.is_forward_only())
            .finish()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    /// Creates a dispatcher with nothing registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            sender_listeners: RwLock::new(Vec::new()),
            forward_only: AtomicBool::new(false),
        }
    }

    /// Registers an observer.
    ///
    /// Returns `false` if the same instance is already registered.
    pub fn add_observer(&self, observer: Arc<dyn ChannelObserver>) -> bool {
        let mut observers = self.observers.write();
        if observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
            return false;
        }
        observers.push(observer);
        // Stable: equal orders keep registration order.
        observers.sort_by_key(|o| o.observing_order());
        true
    }

    /// Unregisters an observer. Returns `false` if it was not registered.
    pub fn remove_observer(&self, observer: &Arc<dyn ChannelObserver>) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|o| !Arc::ptr_eq(o, observer));
        observers.len() != before
    }

    /// Registers a sender listener.
    ///
    /// Returns `false` if the same instance is already registered.
    pub fn add_sender_listener(&self, listener: Arc<dyn SenderListener>) -> bool {
        let mut listeners = self.sender_listeners.write();
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        listeners.sort_by_key(|l| l.sending_order());
        true
    }

    /// Unregisters a sender listener. Returns `false` if it was not registered.
    pub fn remove_sender_listener(&self, listener: &Arc<dyn SenderListener>) -> bool {
        let mut listeners = self.sender_listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Snapshot of registered observers in delivery order.
    #[must_use]
    pub fn observers(&self) -> Vec<Arc<dyn ChannelObserver>> {
        self.observers.read().clone()
    }

    /// Snapshot of registered sender listeners in delivery order.
    #[must_use]
    pub fn sender_listeners(&self) -> Vec<Arc<dyn SenderListener>> {
        self.sender_listeners.read().clone()
    }

    /// Returns `true` if observers are currently skipped.
    #[inline]
    #[must_use]
    pub fn is_forward_only(&self) -> bool {
        self.forward_only.load(Ordering::Acquire)
    }

    /// Toggles forward-only mode and tells observers about it.
    ///
    /// Returns `false` if the value did not change.
    pub fn set_forward_only(&self, forward_only: bool, channel: &ChannelInfo) -> bool {
        if self.forward_only.swap(forward_only, Ordering::AcqRel) == forward_only {
            return false;
        }
        for observer in self.observers() {
            observer.on_visibility_change(forward_only, channel);
        }
        true
    }

    /// Delivers a frame to sender listeners, then to observers.
    ///
    /// Returns `false` if an observer stopped delivery.
    pub fn notify_message(
        &self,
        channel: &ChannelInfo,
        message: &MessageRecord,
        initiator: Initiator,
    ) -> bool {
        for listener in self.sender_listeners() {
            listener.on_message_frame(channel, message, initiator);
        }

        if self.is_forward_only() {
            return true;
        }

        // Snapshot so observers may register others without deadlocking.
        for observer in self.observers() {
            if !observer.on_message_frame(channel, message) {
                trace!(
                    channel_id = %channel.id,
                    message_id = %message.message_id,
                    "Observer stopped frame delivery"
                );
                return false;
            }
        }
        true
    }

    /// Delivers a state transition.
    pub fn notify_state(&self, channel: &ChannelInfo, state: ChannelState) {
        if !self.is_forward_only() {
            for observer in self.observers() {
                observer.on_state_change(state, channel);
            }
        }
        for listener in self.sender_listeners() {
            listener.on_state_change(state, channel);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
