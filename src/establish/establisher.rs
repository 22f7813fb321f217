//! Connection establishment.
//!
//! One [`ConnectionEstablisher::establish`] call runs a single attempt to a
//! terminal outcome:
//!
//! ```text
//! validate ─► scope check ─► send ─┬─► rejected hop ──────► OutOfScopeRedirect
//!                                  ├─► no switch ─────────► ProtocolUpgradeFailed
//!                                  ├─► no upgraded stream ► Transport
//!                                  └─► build channel ─► attach ─► start listener
//! ```
//!
//! The attempt's transport is shut down on every path.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelInfo, ChannelObserver, SenderListener};
use crate::error::{Error, Result};
use crate::handshake::{
    HandshakeConfig, HandshakeMessage, RequestHeader, ResponseHeader, check_accept, header,
};
use crate::identifiers::ChannelId;
use crate::transport::{HandshakeTransport, ListenerPool, RedirectPolicy, TransportFactory};

use super::mode::{HopRecorder, OperatingMode, ScopePolicy};

// ============================================================================
// ConnectionEstablisher
// ============================================================================

/// Turns a [`HandshakeConfig`] into a live [`Channel`].
pub struct ConnectionEstablisher {
    transports: Arc<dyn TransportFactory>,
    pool: Arc<ListenerPool>,
    policy: Arc<ScopePolicy>,
    remove_extensions_header: bool,
}

impl fmt::Debug for ConnectionEstablisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEstablisher")
            .field("pool", &self.pool)
            .field("mode", &self.policy.mode())
            .field("remove_extensions_header", &self.remove_extensions_header)
            .finish_non_exhaustive()
    }
}

impl ConnectionEstablisher {
    /// Creates an establisher using the given collaborators.
    #[must_use]
    pub fn new(
        transports: Arc<dyn TransportFactory>,
        pool: Arc<ListenerPool>,
        policy: Arc<ScopePolicy>,
    ) -> Self {
        Self {
            transports,
            pool,
            policy,
            remove_extensions_header: false,
        }
    }

    /// Strips `Sec-WebSocket-Extensions` from every request.
    #[inline]
    #[must_use]
    pub fn with_remove_extensions_header(mut self, remove: bool) -> Self {
        self.remove_extensions_header = remove;
        self
    }

    /// Runs one establishment attempt.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedHandshake`] if the request is not an upgrade request
    /// - [`Error::OutOfScopeRequest`] in safe mode, before anything is sent
    /// - [`Error::OutOfScopeRedirect`] if a redirect hop was not valid
    /// - [`Error::Transport`] / [`Error::Tls`] on exchange failure
    /// - [`Error::ProtocolUpgradeFailed`] if the server did not switch protocols
    /// - [`Error::ChannelConstruction`] if the listener could not start
    pub async fn establish(&self, config: HandshakeConfig) -> Result<Channel> {
        let follow_redirects = config.follows_redirects();
        let reuse_session_state = config.reuses_session_state();
        let forward_only = config.is_forward_only();
        let (mut message, observers, sender_listeners) = config.into_parts();

        message.identity = None;
        message.response = None;
        if self.remove_extensions_header {
            message
                .request
                .headers
                .set(header::SEC_WEBSOCKET_EXTENSIONS, None);
        }

        validate_request(&message.request)?;

        // Only safe mode refuses the initial target. Other modes judge
        // redirect hops, and only when redirects are followed.
        if self.policy.mode() == OperatingMode::Safe {
            debug!(uri = %message.request.uri, "Establishment refused in safe mode");
            return Err(Error::out_of_scope_request(message.request.uri.as_str()));
        }

        let mut transport = self.transports.create(reuse_session_state);
        let attempt = Attempt {
            follow_redirects,
            forward_only,
            observers,
            sender_listeners,
        };
        let result = self.run(transport.as_mut(), message, attempt).await;
        transport.shutdown().await;

        if let Err(e) = &result {
            if e.is_establishment_error() {
                debug!(
                    error = %e,
                    connection = e.is_connection_error(),
                    recoverable = e.is_recoverable(),
                    "Establishment failed"
                );
            } else {
                warn!(error = %e, "Establishment failed unexpectedly");
            }
        }
        result
    }

    async fn run(
        &self,
        transport: &mut dyn HandshakeTransport,
        mut message: HandshakeMessage,
        attempt: Attempt,
    ) -> Result<Channel> {
        let recorder = HopRecorder::new(&self.policy);
        let redirects = if attempt.follow_redirects {
            RedirectPolicy::Follow(&recorder)
        } else {
            RedirectPolicy::DoNotFollow
        };

        debug!(uri = %message.request.uri, follow = attempt.follow_redirects, "Sending handshake");
        transport.send(&mut message, redirects).await?;

        if let Some(hop) = recorder.first_invalid() {
            warn!(hop = %hop, "Redirect out of scope");
            return Err(Error::out_of_scope_redirect(hop.as_str()));
        }

        if !message
            .response
            .as_ref()
            .is_some_and(ResponseHeader::is_protocol_switch)
        {
            return Err(Error::protocol_upgrade_failed(
                message.status().unwrap_or_default(),
            ));
        }

        let upgraded = transport
            .take_upgraded()
            .ok_or_else(|| Error::transport("upgraded stream not available"))?;

        check_accept(&message);

        let info = ChannelInfo::from_handshake(ChannelId::next(), &message);
        let channel = Channel::new(info, message);
        for observer in attempt.observers {
            channel.add_observer(observer);
        }
        for listener in attempt.sender_listeners {
            channel.add_sender_listener(listener);
        }
        if attempt.forward_only {
            channel.set_forward_only(true);
        }

        channel
            .start_listener(&self.pool, upgraded)
            .await
            .map_err(|e| match e {
                Error::ChannelConstruction { .. } => e,
                other => Error::channel_construction(other.to_string()),
            })?;

        info!(
            channel_id = %channel.id(),
            url = %channel.info().url,
            subprotocol = ?channel.info().subprotocol,
            "Channel established"
        );
        Ok(channel)
    }
}

/// Per-attempt options left after the message was taken out of the config.
struct Attempt {
    follow_redirects: bool,
    forward_only: bool,
    observers: Vec<Arc<dyn ChannelObserver>>,
    sender_listeners: Vec<Arc<dyn SenderListener>>,
}

/// Checks that `request` is a WebSocket upgrade request.
fn validate_request(request: &RequestHeader) -> Result<()> {
    if !request.method.eq_ignore_ascii_case("GET") {
        return Err(Error::malformed_handshake(format!(
            "upgrade requires GET, got {}",
            request.method
        )));
    }
    if !request.headers.has_token(header::UPGRADE, "websocket") {
        return Err(Error::malformed_handshake("missing 'Upgrade: websocket'"));
    }
    if request
        .headers
        .get(header::SEC_WEBSOCKET_KEY)
        .is_none_or(|key| key.trim().is_empty())
    {
        return Err(Error::malformed_handshake("missing Sec-WebSocket-Key"));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
