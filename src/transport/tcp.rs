//! Plain HTTP/1.1 handshake transport over TCP.
//!
//! Speaks just enough HTTP to send an upgrade request, read the response
//! head and follow redirects. Secure targets are refused with
//! [`Error::Tls`]; TLS-capable transports plug in through
//! [`TransportFactory`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::handshake::{HandshakeMessage, ResponseHeader};

use super::cookies::CookieJar;
use super::{HandshakeTransport, RedirectPolicy, TransportFactory, UpgradedStream};

// ============================================================================
// Constants
// ============================================================================

/// Default redirect hop limit.
const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Default TCP connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default upper bound for a response head.
const DEFAULT_MAX_HEAD_BYTES: usize = 64 * 1024;

/// Read chunk size while looking for the end of the head.
const READ_CHUNK: usize = 4096;

// ============================================================================
// TransportOptions
// ============================================================================

/// Limits applied by [`TcpTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Maximum number of redirect hops followed.
    pub max_redirects: usize,
    /// Timeout for each TCP connect, `None` to wait indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Maximum size of a response head.
    pub max_head_bytes: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            max_head_bytes: DEFAULT_MAX_HEAD_BYTES,
        }
    }
}

impl TransportOptions {
    /// Sets the redirect hop limit.
    #[inline]
    #[must_use]
    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Option<Duration>) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

// ============================================================================
// TcpTransportFactory
// ============================================================================

/// Creates [`TcpTransport`]s sharing one session-state jar.
#[derive(Debug, Default)]
pub struct TcpTransportFactory {
    options: TransportOptions,
    shared_jar: Arc<Mutex<CookieJar>>,
}

impl TcpTransportFactory {
    /// Creates a factory with the given limits.
    #[must_use]
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options,
            shared_jar: Arc::new(Mutex::new(CookieJar::new())),
        }
    }

    /// Shared session state, as seen by transports created with
    /// `reuse_session_state = true`.
    #[must_use]
    pub fn shared_jar(&self) -> Arc<Mutex<CookieJar>> {
        Arc::clone(&self.shared_jar)
    }
}

impl TransportFactory for TcpTransportFactory {
    fn create(&self, reuse_session_state: bool) -> Box<dyn HandshakeTransport> {
        let jar = if reuse_session_state {
            Arc::clone(&self.shared_jar)
        } else {
            Arc::new(Mutex::new(CookieJar::new()))
        };
        Box::new(TcpTransport::new(self.options, jar, reuse_session_state))
    }
}

// ============================================================================
// TcpTransport
// ============================================================================

/// One-shot HTTP/1.1 transport.
pub struct TcpTransport {
    options: TransportOptions,
    jar: Arc<Mutex<CookieJar>>,
    shared_jar: bool,
    upgraded: Option<UpgradedStream>,
}

impl TcpTransport {
    /// Creates a transport using `jar` as session state.
    #[must_use]
    pub fn new(options: TransportOptions, jar: Arc<Mutex<CookieJar>>, shared_jar: bool) -> Self {
        Self {
            options,
            jar,
            shared_jar,
            upgraded: None,
        }
    }

    async fn connect(&self, host: &str, port: u16) -> Result<TcpStream> {
        let connect = TcpStream::connect((host, port));
        let stream = match self.options.connect_timeout {
            Some(limit) => timeout(limit, connect).await.map_err(|_| {
                Error::transport(format!(
                    "connect to {host}:{port} timed out after {}ms",
                    limit.as_millis()
                ))
            })?,
            None => connect.await,
        }
        .map_err(|e| Error::transport(format!("connect to {host}:{port} failed: {e}")))?;

        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Serializes the request with session cookies and identity applied.
    fn wire_request(&self, message: &HandshakeMessage) -> String {
        let mut request = message.request.clone();

        if !request.headers.contains("Cookie")
            && let Some(cookie) = self.jar.lock().header_for(&request.connect_host())
        {
            request.headers.set("Cookie", Some(&cookie));
        }

        if let Some(auth) = message
            .identity
            .as_ref()
            .and_then(|identity| identity.authorization.as_deref())
        {
            request.headers.set("Authorization", Some(auth));
        }

        request.to_wire()
    }

    /// Reads until the end of the response head.
    ///
    /// Returns the head (without the blank line) and any bytes read past it.
    async fn read_head(&self, stream: &mut TcpStream) -> Result<(String, Vec<u8>)> {
        let mut buf = Vec::with_capacity(READ_CHUNK);
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(end) = find_head_end(&buf) {
                let head = String::from_utf8_lossy(&buf[..end]).into_owned();
                let rest = buf[end + 4..].to_vec();
                return Ok((head, rest));
            }

            if buf.len() > self.options.max_head_bytes {
                return Err(Error::transport(format!(
                    "response head exceeds {} bytes",
                    self.options.max_head_bytes
                )));
            }

            let read = stream.read(&mut chunk).await?;
            if read == 0 {
                return Err(Error::transport("connection closed before response head"));
            }
            buf.extend_from_slice(&chunk[..read]);
        }
    }
}

#[async_trait]
impl HandshakeTransport for TcpTransport {
    async fn send(
        &mut self,
        message: &mut HandshakeMessage,
        redirects: RedirectPolicy<'_>,
    ) -> Result<()> {
        self.upgraded = None;
        let mut hops = 0;

        loop {
            if message.request.is_secure() {
                return Err(Error::tls(
                    message.request.uri.as_str(),
                    "secure targets need a TLS-capable transport",
                    None,
                ));
            }

            let host = message.request.connect_host();
            let port = message.request.host_port();
            let mut stream = self.connect(&host, port).await?;

            let wire = self.wire_request(message);
            stream.write_all(wire.as_bytes()).await?;
            stream.flush().await?;
            trace!(host = %host, port, "Handshake request written");

            let (head, rest) = self.read_head(&mut stream).await?;
            let response = ResponseHeader::parse(&head)?;
            debug!(host = %host, port, status = response.status, "Handshake response received");

            {
                let mut jar = self.jar.lock();
                for value in response.headers.get_all("Set-Cookie") {
                    jar.store(&host, value);
                }
            }

            if response.is_protocol_switch() {
                message.response = Some(response);
                self.upgraded = Some(UpgradedStream::with_buffered(stream, rest));
                return Ok(());
            }

            let RedirectPolicy::Follow(validator) = redirects else {
                message.response = Some(response);
                return Ok(());
            };
            if !response.is_redirect() {
                message.response = Some(response);
                return Ok(());
            }

            let location = response.headers.get("Location").unwrap_or_default();
            let target = message.request.uri.join(location).map_err(|e| {
                Error::transport(format!("invalid redirect location '{location}': {e}"))
            })?;

            if !validator.is_valid(&target) {
                debug!(location = %target, "Redirect hop rejected, not following");
                message.response = Some(response);
                return Ok(());
            }

            hops += 1;
            if hops > self.options.max_redirects {
                return Err(Error::transport(format!(
                    "too many redirects (limit {})",
                    self.options.max_redirects
                )));
            }

            debug!(from = %message.request.uri, to = %target, hops, "Following redirect");
            message.request.uri = target;
            let host_header = message.request.host_header_value();
            message.request.headers.set("Host", Some(&host_header));
        }
    }

    fn take_upgraded(&mut self) -> Option<UpgradedStream> {
        self.upgraded.take()
    }

    async fn shutdown(&mut self) {
        if let Some(mut upgraded) = self.upgraded.take() {
            let _ = upgraded.io.shutdown().await;
        }
        if !self.shared_jar {
            self.jar.lock().clear();
        }
        trace!(shared_jar = self.shared_jar, "Transport released");
    }
}

/// Position of the `\r\n\r\n` terminating the head.
fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

// ============================================================================
// Tests
// ============================================================================
