//! Live channel handle and its listener loop.
//!
//! A [`Channel`] is created once per successful handshake. Clones share the
//! same connection; only the establishment routine and the listener task
//! move its state forward.
//!
//! # State Machine
//!
//! ```text
//! Connecting ──start_listener──► Open ──close()──► Closing ──► Closed
//!                                  │                             ▲
//!                                  └──── EOF / close frame / error ┘
//! ```
//!
//! `Closed` is terminal. Every transition is reported to observers and
//! sender listeners through the channel's [`EventDispatcher`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::Role;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::handshake::{
    HandshakeConfig, HandshakeMessage, parse_extensions, parse_subprotocol, parse_version,
};
use crate::identifiers::{ChannelId, MessageId};
use crate::transport::{BoxedIo, ListenerPool, UpgradedStream};

use super::dispatch::{ChannelObserver, EventDispatcher, SenderListener};
use super::message::{Direction, Initiator, MessageRecord, Opcode, now_millis};

// ============================================================================
// ChannelState
// ============================================================================

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// Handshake done, listener not started yet.
    #[default]
    Connecting,
    /// Frames flow.
    Open,
    /// A local close was requested.
    Closing,
    /// Terminal.
    Closed,
}

impl ChannelState {
    /// Returns `true` for [`ChannelState::Closed`].
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// HandshakeRef / ChannelInfo
// ============================================================================

/// Reference to the handshake that opened a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRef {
    /// Channel opened by the handshake.
    pub channel_id: ChannelId,
    /// Final request URI, after redirects.
    pub uri: Url,
    /// Request method.
    pub method: String,
    /// Final response status, `0` if none was received.
    pub status: u16,
}

/// Immutable description of a channel, handed to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel id.
    pub id: ChannelId,
    /// Target host.
    pub host: String,
    /// Target port.
    pub port: u16,
    /// Final target URI.
    pub url: Url,
    /// Negotiated subprotocol.
    pub subprotocol: Option<String>,
    /// Negotiated extensions, name to raw parameters.
    pub extensions: FxHashMap<String, String>,
    /// Protocol version requested by the client.
    pub version: String,
    /// Opening handshake.
    pub handshake: HandshakeRef,
}

impl ChannelInfo {
    /// Derives the channel description from a completed handshake.
    #[must_use]
    pub fn from_handshake(id: ChannelId, message: &HandshakeMessage) -> Self {
        let request = &message.request;
        Self {
            id,
            host: request.connect_host(),
            port: request.host_port(),
            url: request.uri.clone(),
            subprotocol: parse_subprotocol(message),
            extensions: parse_extensions(message),
            version: parse_version(message),
            handshake: HandshakeRef {
                channel_id: id,
                uri: request.uri.clone(),
                method: request.method.clone(),
                status: message.status().unwrap_or_default(),
            },
        }
    }

    /// `host:port`, the key of the channel's host folder.
    ///
    /// IPv6 hosts are bracketed so the port stays unambiguous.
    #[must_use]
    pub fn host_key(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
impl ChannelInfo {
    /// Description of an unsent handshake to `ws://example.com/chat`.
    pub(crate) fn test_fixture() -> Self {
        let request =
            crate::handshake::build_upgrade_request("ws://example.com/chat").expect("valid target");
        Self::from_handshake(ChannelId::from_raw(1), &HandshakeMessage::new(request))
    }
}

// ============================================================================
// Channel
// ============================================================================

/// Commands for the listener loop.
enum ChannelCommand {
    /// Write a frame.
    Send {
        frame: Message,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Close the connection.
    Shutdown,
}

/// Shared channel state.
struct ChannelInner {
    info: ChannelInfo,
    handshake: HandshakeMessage,
    state: watch::Sender<ChannelState>,
    dispatcher: EventDispatcher,
    command_tx: Mutex<Option<mpsc::UnboundedSender<ChannelCommand>>>,
    next_message_id: AtomicU64,
    opened_at: Mutex<Option<u64>>,
    closed_at: Mutex<Option<u64>>,
}

impl ChannelInner {
    fn next_message_id(&self) -> MessageId {
        MessageId::new(self.next_message_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Moves to `next` and notifies. No-op if already there or closed.
    fn transition(&self, next: ChannelState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == next || state.is_terminal() {
                return false;
            }
            *state = next;
            true
        });
        if !changed {
            return false;
        }

        match next {
            ChannelState::Open => *self.opened_at.lock() = Some(now_millis()),
            ChannelState::Closed => *self.closed_at.lock() = Some(now_millis()),
            ChannelState::Connecting | ChannelState::Closing => {}
        }

        debug!(channel_id = %self.info.id, state = %next, "Channel state changed");
        self.dispatcher.notify_state(&self.info, next);
        true
    }

    fn dispatch_incoming(&self, frame: &Message) {
        let Some(record) =
            MessageRecord::from_ws(self.info.id, self.next_message_id(), Direction::Incoming, frame)
        else {
            return;
        };
        trace!(
            channel_id = %self.info.id,
            message_id = %record.message_id,
            opcode = %record.opcode,
            len = record.payload.len(),
            "Frame received"
        );
        self.dispatcher
            .notify_message(&self.info, &record, Initiator::WebSocket);
    }
}

/// A live WebSocket connection.
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id())
            .field("host", &self.inner.info.host)
            .field("port", &self.inner.info.port)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Creates a channel in [`ChannelState::Connecting`].
    #[must_use]
    pub(crate) fn new(info: ChannelInfo, handshake: HandshakeMessage) -> Self {
        let (state, _) = watch::channel(ChannelState::Connecting);
        Self {
            inner: Arc::new(ChannelInner {
                info,
                handshake,
                state,
                dispatcher: EventDispatcher::new(),
                command_tx: Mutex::new(None),
                next_message_id: AtomicU64::new(0),
                opened_at: Mutex::new(None),
                closed_at: Mutex::new(None),
            }),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Channel id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.inner.info.id
    }

    /// Channel description.
    #[inline]
    #[must_use]
    pub fn info(&self) -> &ChannelInfo {
        &self.inner.info
    }

    /// The handshake that opened this channel.
    #[inline]
    #[must_use]
    pub fn handshake(&self) -> &HandshakeMessage {
        &self.inner.handshake
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    /// Returns `true` while the channel is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Returns `true` if observers are skipped for this channel.
    #[inline]
    #[must_use]
    pub fn is_forward_only(&self) -> bool {
        self.inner.dispatcher.is_forward_only()
    }

    /// Time the channel opened, milliseconds since the Unix epoch.
    #[must_use]
    pub fn opened_at(&self) -> Option<u64> {
        *self.inner.opened_at.lock()
    }

    /// Time the channel closed, milliseconds since the Unix epoch.
    #[must_use]
    pub fn closed_at(&self) -> Option<u64> {
        *self.inner.closed_at.lock()
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Registers an observer. Returns `false` if already registered.
    pub fn add_observer(&self, observer: Arc<dyn ChannelObserver>) -> bool {
        self.inner.dispatcher.add_observer(observer)
    }

    /// Unregisters an observer.
    pub fn remove_observer(&self, observer: &Arc<dyn ChannelObserver>) -> bool {
        self.inner.dispatcher.remove_observer(observer)
    }

    /// Registers a sender listener. Returns `false` if already registered.
    pub fn add_sender_listener(&self, listener: Arc<dyn SenderListener>) -> bool {
        self.inner.dispatcher.add_sender_listener(listener)
    }

    /// Unregisters a sender listener.
    pub fn remove_sender_listener(&self, listener: &Arc<dyn SenderListener>) -> bool {
        self.inner.dispatcher.remove_sender_listener(listener)
    }

    /// Hides (`true`) or shows the channel's traffic to observers.
    ///
    /// Returns `false` if nothing changed.
    pub fn set_forward_only(&self, forward_only: bool) -> bool {
        let changed = self
            .inner
            .dispatcher
            .set_forward_only(forward_only, &self.inner.info);
        if changed {
            debug!(channel_id = %self.id(), forward_only, "Channel visibility changed");
        }
        changed
    }

    /// Builds a configuration that re-sends this channel's handshake with
    /// the currently registered observers and sender listeners.
    #[must_use]
    pub fn handshake_config(&self) -> HandshakeConfig {
        let mut config = HandshakeConfig::new(self.inner.handshake.resend_copy())
            .with_forward_only(self.is_forward_only());
        for observer in self.inner.dispatcher.observers() {
            config.add_observer(observer);
        }
        for listener in self.inner.dispatcher.sender_listeners() {
            config.add_sender_listener(listener);
        }
        config
    }

    // ========================================================================
    // I/O
    // ========================================================================

    /// Wraps the upgraded socket and starts reading on `pool`.
    ///
    /// The channel is `Open` before the first frame is dispatched. If the
    /// listener cannot be spawned the socket is dropped with it and the
    /// channel ends `Closed`.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the channel was closed already
    /// - [`Error::ChannelConstruction`] if the pool refuses the listener
    pub(crate) async fn start_listener(
        &self,
        pool: &ListenerPool,
        upgraded: UpgradedStream,
    ) -> Result<()> {
        if self.state().is_terminal() {
            return Err(Error::ConnectionClosed);
        }

        let UpgradedStream { io, buffered } = upgraded;
        let ws = WebSocketStream::from_partially_read(io, buffered, Role::Client, None).await;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        *self.inner.command_tx.lock() = Some(command_tx);
        self.inner.transition(ChannelState::Open);

        let inner = Arc::clone(&self.inner);
        if let Err(e) = pool.spawn(self.id(), run_listener(inner, ws, command_rx)) {
            warn!(channel_id = %self.id(), error = %e, "Listener not started");
            self.inner.command_tx.lock().take();
            self.inner.transition(ChannelState::Closed);
            return Err(e);
        }

        info!(
            channel_id = %self.id(),
            host = %self.inner.info.host,
            port = self.inner.info.port,
            "Channel open"
        );
        Ok(())
    }

    /// Writes a frame and reports it with [`Direction::Outgoing`].
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidFrame`] for continuation frames, and for text
    ///   payloads that are not valid UTF-8
    /// - [`Error::ConnectionClosed`] if the channel is not open
    /// - [`Error::WebSocket`] if writing fails
    pub async fn send(
        &self,
        opcode: Opcode,
        payload: impl Into<Vec<u8>>,
        initiator: Initiator,
    ) -> Result<MessageRecord> {
        if opcode == Opcode::Continuation {
            return Err(Error::invalid_frame(
                "continuation frames cannot be sent on their own",
            ));
        }

        let command_tx = self
            .inner
            .command_tx
            .lock()
            .clone()
            .ok_or(Error::ConnectionClosed)?;

        let record = MessageRecord::new(
            self.id(),
            self.inner.next_message_id(),
            opcode,
            Direction::Outgoing,
            payload.into(),
        );
        let frame = record.to_ws()?;

        let (reply, reply_rx) = oneshot::channel();
        command_tx
            .send(ChannelCommand::Send { frame, reply })
            .map_err(|_| Error::ConnectionClosed)?;
        reply_rx.await.map_err(|_| Error::ConnectionClosed)??;

        self.inner
            .dispatcher
            .notify_message(&self.inner.info, &record, initiator);
        Ok(record)
    }

    /// Requests a close. The listener sends the close frame and the
    /// channel ends `Closed`.
    pub fn close(&self) {
        let command_tx = self.inner.command_tx.lock().clone();
        match command_tx {
            Some(command_tx) if command_tx.send(ChannelCommand::Shutdown).is_ok() => {
                self.inner.transition(ChannelState::Closing);
            }
            _ => {
                self.inner.transition(ChannelState::Closed);
            }
        }
    }

    /// Waits until the channel is `Closed`.
    pub async fn wait_closed(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|state| state.is_terminal()).await;
    }
}

// ============================================================================
// Listener Loop
// ============================================================================

async fn run_listener(
    inner: Arc<ChannelInner>,
    ws: WebSocketStream<BoxedIo>,
    mut command_rx: mpsc::UnboundedReceiver<ChannelCommand>,
) {
    let channel_id = inner.info.id;
    let (mut ws_write, mut ws_read) = ws.split();

    loop {
        tokio::select! {
            frame = ws_read.next() => {
                match frame {
                    Some(Ok(frame)) => {
                        let is_close = frame.is_close();
                        inner.dispatch_incoming(&frame);
                        if is_close {
                            debug!(channel_id = %channel_id, "Close frame received");
                            // Writes the close reply tungstenite queued.
                            if let Err(e) = ws_write.flush().await {
                                debug!(channel_id = %channel_id, error = %e, "Close reply not delivered");
                            }
                            break;
                        }
                    }

                    Some(Err(e)) => {
                        warn!(channel_id = %channel_id, error = %e, "WebSocket read failed");
                        break;
                    }

                    None => {
                        debug!(channel_id = %channel_id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(ChannelCommand::Send { frame, reply }) => {
                        let result = ws_write.send(frame).await.map_err(Error::from);
                        let _ = reply.send(result);
                    }

                    Some(ChannelCommand::Shutdown) | None => {
                        debug!(channel_id = %channel_id, "Closing channel");
                        inner.transition(ChannelState::Closing);
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }
        }
    }

    inner.command_tx.lock().take();
    inner.transition(ChannelState::Closed);
    debug!(channel_id = %channel_id, "Listener terminated");
}

// ============================================================================
// Tests
// ============================================================================
