//! WebSocket service: owns the collaborators and tracks live channels.
//!
//! # Example
//!
//! ```no_run
//! use ws_intercept::{HandshakeConfig, Initiator, Opcode, WebSocketService};
//!
//! # async fn example() -> ws_intercept::Result<()> {
//! let service = WebSocketService::builder().build()?;
//!
//! let channel = service
//!     .establish(HandshakeConfig::for_uri("ws://localhost:8080/chat")?)
//!     .await?;
//! channel.send(Opcode::Text, "hello", Initiator::ManualRequest).await?;
//!
//! println!("{}", service.tree().read().snapshot()?);
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use rustc_hash::FxHashMap;
use tracing::{debug, info};
use url::Url;

use crate::channel::{Channel, ChannelObserver, SenderListener};
use crate::error::{Error, Result};
use crate::establish::mode::compile_patterns;
use crate::establish::{ConnectionEstablisher, OperatingMode, Scope, ScopePolicy};
use crate::handshake::HandshakeConfig;
use crate::identifiers::ChannelId;
use crate::structure::{SharedTree, StructuralTree, StructureObserver};
use crate::transport::{ListenerPool, TransportFactory};

use super::builder::ServiceBuilder;
use super::options::ServiceOptions;

// ============================================================================
// Types
// ============================================================================

/// Internal shared state of the service.
pub(crate) struct ServiceInner {
    /// Establishment routine, bound to the pool and transport factory.
    establisher: ConnectionEstablisher,

    /// Mode and scope, shared with the establisher.
    policy: Arc<ScopePolicy>,

    /// Listener pool of every channel.
    pool: Arc<ListenerPool>,

    /// Established channels by id.
    channels: Mutex<FxHashMap<ChannelId, Channel>>,

    /// Compiled channel ignore list.
    ignore_list: RwLock<Vec<Regex>>,

    /// Observers attached to every channel.
    observers: RwLock<Vec<Arc<dyn ChannelObserver>>>,

    /// Sender listeners attached to every channel.
    sender_listeners: RwLock<Vec<Arc<dyn SenderListener>>>,

    /// Structural index fed by `structure`.
    tree: SharedTree,

    /// Observer filing traffic into `tree`.
    structure: Arc<dyn ChannelObserver>,
}

// ============================================================================
// WebSocketService
// ============================================================================

/// Entry point for establishing and tracking WebSocket channels.
///
/// The service owns its listener pool and transport factory; both live as
/// long as the service and are shut down with it.
#[derive(Clone)]
pub struct WebSocketService {
    inner: Arc<ServiceInner>,
}

impl fmt::Debug for WebSocketService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketService")
            .field("mode", &self.mode())
            .field("channel_count", &self.channel_count())
            .field("pool", &self.inner.pool)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// WebSocketService - Construction
// ============================================================================

impl WebSocketService {
    #[inline]
    #[must_use]
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::new()
    }

    pub(crate) fn new(
        options: ServiceOptions,
        scope: Scope,
        transports: Arc<dyn TransportFactory>,
        pool: Arc<ListenerPool>,
    ) -> Result<Self> {
        let ignore_list = compile_patterns(&options.ignore_list)?;
        let policy = Arc::new(ScopePolicy::new(options.mode, scope));
        let establisher =
            ConnectionEstablisher::new(transports, Arc::clone(&pool), Arc::clone(&policy))
                .with_remove_extensions_header(options.remove_extensions_header);

        let tree = StructuralTree::with_root_name(options.root_name).into_shared();
        let structure: Arc<dyn ChannelObserver> =
            Arc::new(StructureObserver::new(Arc::clone(&tree)));

        info!(mode = %options.mode, ignored = ignore_list.len(), "WebSocket service initialized");

        Ok(Self {
            inner: Arc::new(ServiceInner {
                establisher,
                policy,
                pool,
                channels: Mutex::new(FxHashMap::default()),
                ignore_list: RwLock::new(ignore_list),
                observers: RwLock::new(Vec::new()),
                sender_listeners: RwLock::new(Vec::new()),
                tree,
                structure,
            }),
        })
    }
}

// ============================================================================
// WebSocketService - Establishment
// ============================================================================

impl WebSocketService {
    /// Establishes a channel and registers it.
    ///
    /// The service's global observers, sender listeners and structure
    /// observer are added to `config` before sending. A target matching the
    /// ignore list is established forward-only.
    ///
    /// # Errors
    ///
    /// Every error of [`ConnectionEstablisher::establish`].
    pub async fn establish(&self, mut config: HandshakeConfig) -> Result<Channel> {
        for observer in self.inner.observers.read().iter() {
            config.add_observer(Arc::clone(observer));
        }
        for listener in self.inner.sender_listeners.read().iter() {
            config.add_sender_listener(Arc::clone(listener));
        }
        config.add_observer(Arc::clone(&self.inner.structure));

        if self.is_ignored(&config.message().request.uri) {
            debug!(uri = %config.message().request.uri, "Target on ignore list");
            config = config.with_forward_only(true);
        }

        let channel = self.inner.establisher.establish(config).await?;
        self.inner.channels.lock().insert(channel.id(), channel.clone());

        debug!(
            channel_id = %channel.id(),
            channel_count = self.channel_count(),
            "Channel registered"
        );
        Ok(channel)
    }

    /// Re-sends the handshake of a known channel with its current observers
    /// and sender listeners.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelNotFound`] if `channel_id` is unknown
    /// - every error of [`WebSocketService::establish`]
    pub async fn reestablish(&self, channel_id: ChannelId) -> Result<Channel> {
        let config = self
            .channel(channel_id)
            .ok_or_else(|| Error::channel_not_found(channel_id))?
            .handshake_config();
        debug!(channel_id = %channel_id, "Re-establishing channel");
        self.establish(config).await
    }
}

// ============================================================================
// WebSocketService - Channel Registry
// ============================================================================

impl WebSocketService {
    #[must_use]
    pub fn channel(&self, channel_id: ChannelId) -> Option<Channel> {
        self.inner.channels.lock().get(&channel_id).cloned()
    }

    /// All registered channels, ordered by id.
    #[must_use]
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.inner.channels.lock().values().cloned().collect();
        channels.sort_by_key(Channel::id);
        channels
    }

    #[inline]
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.inner.channels.lock().len()
    }

    /// Returns `true` if the channel is known and open.
    #[must_use]
    pub fn is_connected(&self, channel_id: ChannelId) -> bool {
        self.channel(channel_id).is_some_and(|channel| channel.is_connected())
    }

    /// Requests a close of one channel. It stays registered until pruned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelNotFound`] if `channel_id` is unknown.
    pub fn close_channel(&self, channel_id: ChannelId) -> Result<()> {
        let channel = self
            .channel(channel_id)
            .ok_or_else(|| Error::channel_not_found(channel_id))?;
        channel.close();
        Ok(())
    }

    /// Drops closed channels from the registry. Returns how many were dropped.
    pub fn prune_closed(&self) -> usize {
        let mut channels = self.inner.channels.lock();
        let before = channels.len();
        channels.retain(|_, channel| !channel.state().is_terminal());
        let pruned = before - channels.len();
        if pruned > 0 {
            debug!(pruned, remaining = channels.len(), "Closed channels pruned");
        }
        pruned
    }
}

// ============================================================================
// WebSocketService - Mode, Scope, Ignore List
// ============================================================================

impl WebSocketService {
    #[inline]
    #[must_use]
    pub fn mode(&self) -> OperatingMode {
        self.inner.policy.mode()
    }

    /// Applies to every later establishment attempt.
    pub fn set_mode(&self, mode: OperatingMode) {
        self.inner.policy.set_mode(mode);
    }

    pub fn set_scope(&self, scope: Scope) {
        self.inner.policy.set_scope(scope);
    }

    /// Replaces the ignore list and updates the visibility of every
    /// registered channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid pattern. The old
    /// list stays in place.
    pub fn set_channel_ignore_list<I>(&self, patterns: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let compiled = compile_patterns(patterns)?;
        *self.inner.ignore_list.write() = compiled;

        for channel in self.channels() {
            let ignored = self.is_ignored(&channel.info().url);
            channel.set_forward_only(ignored);
        }
        Ok(())
    }

    /// Returns `true` if `url` matches the ignore list.
    #[must_use]
    pub fn is_ignored(&self, url: &Url) -> bool {
        let url = url.as_str();
        self.inner
            .ignore_list
            .read()
            .iter()
            .any(|pattern| pattern.is_match(url))
    }
}

// ============================================================================
// WebSocketService - Global Observers
// ============================================================================

impl WebSocketService {
    /// Adds an observer to every registered and future channel.
    ///
    /// Returns `false` if it was registered already.
    pub fn add_observer(&self, observer: Arc<dyn ChannelObserver>) -> bool {
        {
            let mut observers = self.inner.observers.write();
            if observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
                return false;
            }
            observers.push(Arc::clone(&observer));
        }
        for channel in self.channels() {
            channel.add_observer(Arc::clone(&observer));
        }
        true
    }

    /// Removes an observer from the service and from every channel.
    pub fn remove_observer(&self, observer: &Arc<dyn ChannelObserver>) -> bool {
        let removed = {
            let mut observers = self.inner.observers.write();
            let before = observers.len();
            observers.retain(|o| !Arc::ptr_eq(o, observer));
            observers.len() != before
        };
        for channel in self.channels() {
            channel.remove_observer(observer);
        }
        removed
    }

    /// Adds a sender listener to every registered and future channel.
    ///
    /// Returns `false` if it was registered already.
    pub fn add_sender_listener(&self, listener: Arc<dyn SenderListener>) -> bool {
        {
            let mut listeners = self.inner.sender_listeners.write();
            if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
                return false;
            }
            listeners.push(Arc::clone(&listener));
        }
        for channel in self.channels() {
            channel.add_sender_listener(Arc::clone(&listener));
        }
        true
    }

    /// Removes a sender listener from the service and from every channel.
    pub fn remove_sender_listener(&self, listener: &Arc<dyn SenderListener>) -> bool {
        let removed = {
            let mut listeners = self.inner.sender_listeners.write();
            let before = listeners.len();
            listeners.retain(|l| !Arc::ptr_eq(l, listener));
            listeners.len() != before
        };
        for channel in self.channels() {
            channel.remove_sender_listener(listener);
        }
        removed
    }
}

// ============================================================================
// WebSocketService - Lifecycle
// ============================================================================

impl WebSocketService {
    /// Structural index of all captured traffic.
    #[inline]
    #[must_use]
    pub fn tree(&self) -> &SharedTree {
        &self.inner.tree
    }

    #[inline]
    #[must_use]
    pub fn listener_pool(&self) -> &Arc<ListenerPool> {
        &self.inner.pool
    }

    /// Starts a new session: closes every channel, forgets them and empties
    /// the structural tree.
    pub async fn reset_session(&self) {
        let channels = self.drain_channels();
        info!(count = channels.len(), "Resetting session");
        close_all(channels).await;
        self.inner.tree.write().reset();
    }

    /// Closes every channel and stops the listener pool.
    pub async fn shutdown(&self) {
        let channels = self.drain_channels();
        info!(count = channels.len(), "Shutting down WebSocket service");
        close_all(channels).await;
        self.inner.pool.shutdown();
    }

    fn drain_channels(&self) -> Vec<Channel> {
        self.inner.channels.lock().drain().map(|(_, c)| c).collect()
    }
}

/// Requests a close of every channel and waits for each to finish.
async fn close_all(channels: Vec<Channel>) {
    for channel in &channels {
        channel.close();
    }
    for channel in channels {
        channel.wait_closed().await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::{sleep, timeout};
    use tokio_tungstenite::tungstenite::Message;

    use crate::channel::{ChannelInfo, ChannelState, Initiator, MessageRecord, Opcode};
    use crate::structure::{FolderKind, NodeType};
    use crate::test_support::{Reply, ScriptedServer, init_tracing};

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct Texts(Mutex<Vec<String>>);

    impl Texts {
        fn snapshot(&self) -> Vec<String> {
            self.0.lock().clone()
        }
    }

    impl ChannelObserver for Texts {
        fn on_message_frame(&self, _: &ChannelInfo, message: &MessageRecord) -> bool {
            if let Some(text) = message.payload_text() {
                self.0.lock().push(format!("{}:{text}", message.opcode));
            }
            true
        }

        fn on_state_change(&self, _: ChannelState, _: &ChannelInfo) {}
    }

    #[derive(Default)]
    struct Initiators(Mutex<Vec<Initiator>>);

    impl SenderListener for Initiators {
        fn on_message_frame(&self, _: &ChannelInfo, _: &MessageRecord, initiator: Initiator) {
            self.0.lock().push(initiator);
        }

        fn on_state_change(&self, _: ChannelState, _: &ChannelInfo) {}
    }

    async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        let waited = timeout(WAIT, async {
            while !check() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {what}");
    }

    async fn echo_server() -> ScriptedServer {
        init_tracing();
        ScriptedServer::start(|_, _, _| Reply::upgrade(vec![Message::text("welcome")])).await
    }

    #[tokio::test]
    async fn test_establish_registers_and_indexes() -> anyhow::Result<()> {
        let server = echo_server().await;
        let service = WebSocketService::builder().build()?;
        let texts = Arc::new(Texts::default());
        service.add_observer(texts.clone());

        let channel = service
            .establish(HandshakeConfig::for_uri(&server.url("/chat"))?)
            .await?;

        assert_eq!(service.channel_count(), 1);
        assert!(service.is_connected(channel.id()));
        eventually("welcome frame", || texts.snapshot() == ["text:welcome"]).await;
        eventually("welcome indexed", || {
            let tree = service.tree().read();
            tree.first_type_top_down(tree.root(), NodeType::Message).is_some()
        })
        .await;

        let tree = service.tree().read();
        let host = tree
            .find_child(tree.root(), NodeType::Folder(FolderKind::Host), &channel.info().host_key())
            .expect("host folder");
        assert!(tree.is_connected(host));
        assert!(tree.first_type_top_down(host, NodeType::Handshake).is_some());
        drop(tree);

        service.shutdown().await;
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(service.channel_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_ignored_channel_is_forward_only() -> anyhow::Result<()> {
        let server = echo_server().await;
        let service = WebSocketService::builder()
            .ignore_channel(r".*/telemetry")
            .build()?;
        let texts = Arc::new(Texts::default());
        let initiators = Arc::new(Initiators::default());
        service.add_observer(texts.clone());
        service.add_sender_listener(initiators.clone());

        let channel = service
            .establish(HandshakeConfig::for_uri(&server.url("/telemetry"))?)
            .await?;
        assert!(channel.is_forward_only());

        eventually("listener sees welcome", || !initiators.0.lock().is_empty()).await;
        assert!(texts.snapshot().is_empty());

        service.set_channel_ignore_list(Vec::<String>::new())?;
        assert!(!channel.is_forward_only());

        channel.send(Opcode::Text, "ping", Initiator::ManualRequest).await?;
        eventually("echo observed", || texts.snapshot().contains(&"text:ping".to_string())).await;

        service.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_bad_ignore_list_keeps_old_one() -> anyhow::Result<()> {
        let service = WebSocketService::builder().ignore_channel(".*").build()?;
        let url = Url::parse("ws://a.test/")?;

        assert!(service.set_channel_ignore_list(["("]).is_err());
        assert!(service.is_ignored(&url));
        Ok(())
    }

    #[tokio::test]
    async fn test_reestablish_resends_handshake() -> anyhow::Result<()> {
        let server = echo_server().await;
        let service = WebSocketService::builder().build()?;
        let first = service
            .establish(HandshakeConfig::for_uri(&server.url("/chat"))?)
            .await?;

        let second = service.reestablish(first.id()).await?;
        assert_ne!(first.id(), second.id());
        assert_eq!(second.info().url, first.info().url);
        assert_eq!(service.channel_count(), 2);
        assert_eq!(server.request_count(), 2);

        let unknown = ChannelId::from_raw(u64::MAX);
        assert!(matches!(
            service.reestablish(unknown).await,
            Err(Error::ChannelNotFound { .. })
        ));

        service.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_close_and_prune() -> anyhow::Result<()> {
        let server = echo_server().await;
        let service = WebSocketService::builder().build()?;
        let channel = service
            .establish(HandshakeConfig::for_uri(&server.url("/chat"))?)
            .await?;

        assert_eq!(service.prune_closed(), 0);
        service.close_channel(channel.id())?;
        timeout(WAIT, channel.wait_closed()).await?;

        assert!(!service.is_connected(channel.id()));
        assert_eq!(service.prune_closed(), 1);
        assert!(service.channel(channel.id()).is_none());
        assert!(matches!(
            service.close_channel(channel.id()),
            Err(Error::ChannelNotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_mode_change_applies_to_next_attempt() -> anyhow::Result<()> {
        let server = echo_server().await;
        let service = WebSocketService::builder().build()?;
        assert_eq!(service.mode(), OperatingMode::Standard);

        service.set_mode(OperatingMode::Safe);
        let err = service
            .establish(HandshakeConfig::for_uri(&server.url("/chat"))?)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OutOfScopeRequest { .. }));
        assert_eq!(server.request_count(), 0);

        service.set_mode(OperatingMode::Protect);
        service.set_scope(Scope::new([r"ws://127\.0\.0\.1:\d+/chat"], Vec::<String>::new())?);
        service
            .establish(HandshakeConfig::for_uri(&server.url("/chat"))?)
            .await?;

        service.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_global_observer_registration() -> anyhow::Result<()> {
        let server = echo_server().await;
        let service = WebSocketService::builder().build()?;
        let channel = service
            .establish(HandshakeConfig::for_uri(&server.url("/chat"))?)
            .await?;

        let texts: Arc<dyn ChannelObserver> = Arc::new(Texts::default());
        assert!(service.add_observer(Arc::clone(&texts)));
        assert!(!service.add_observer(Arc::clone(&texts)));
        assert!(
            channel
                .handshake_config()
                .observers()
                .iter()
                .any(|o| Arc::ptr_eq(o, &texts))
        );

        assert!(service.remove_observer(&texts));
        assert!(
            !channel
                .handshake_config()
                .observers()
                .iter()
                .any(|o| Arc::ptr_eq(o, &texts))
        );

        service.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_session_clears_tree() -> anyhow::Result<()> {
        let server = echo_server().await;
        let service = WebSocketService::builder().build()?;
        service
            .establish(HandshakeConfig::for_uri(&server.url("/chat"))?)
            .await?;
        assert!(!service.tree().read().is_empty());

        service.reset_session().await;
        assert_eq!(service.channel_count(), 0);
        assert!(service.tree().read().is_empty());
        Ok(())
    }
}
