//! Construction of the HTTP upgrade request.
//!
//! Building is pure apart from the random key: no I/O happens here.
//!
//! # Example
//!
//! ```
//! use ws_intercept::handshake::HandshakeRequestBuilder;
//!
//! # fn example() -> ws_intercept::Result<()> {
//! let request = HandshakeRequestBuilder::new("ws://example.com/chat")
//!     .subprotocol("chat.v2")
//!     .build()?;
//!
//! assert_eq!(request.method, "GET");
//! assert_eq!(request.headers.get("Upgrade"), Some("websocket"));
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use sha1::{Digest, Sha1};
use url::Url;

use crate::error::{Error, Result};

use super::message::RequestHeader;

// ============================================================================
// Constants
// ============================================================================

/// Header names used by the upgrade exchange.
pub mod header {
    /// `Connection`
    pub const CONNECTION: &str = "Connection";
    /// `Upgrade`
    pub const UPGRADE: &str = "Upgrade";
    /// `Sec-WebSocket-Key`
    pub const SEC_WEBSOCKET_KEY: &str = "Sec-WebSocket-Key";
    /// `Sec-WebSocket-Version`
    pub const SEC_WEBSOCKET_VERSION: &str = "Sec-WebSocket-Version";
    /// `Sec-WebSocket-Protocol`
    pub const SEC_WEBSOCKET_PROTOCOL: &str = "Sec-WebSocket-Protocol";
    /// `Sec-WebSocket-Extensions`
    pub const SEC_WEBSOCKET_EXTENSIONS: &str = "Sec-WebSocket-Extensions";
    /// `Sec-WebSocket-Accept`
    pub const SEC_WEBSOCKET_ACCEPT: &str = "Sec-WebSocket-Accept";
}

/// Value of the `Connection` header on upgrade requests.
pub const CONNECTION_UPGRADE: &str = "Upgrade,keep-alive";

/// Protocol version sent unless overridden.
pub const WEBSOCKET_VERSION: &str = "13";

/// Size of the raw nonce behind `Sec-WebSocket-Key`.
pub const KEY_LENGTH: usize = 16;

/// GUID appended to the key when computing `Sec-WebSocket-Accept`.
const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

// ============================================================================
// Key Helpers
// ============================================================================

/// Generates a fresh `Sec-WebSocket-Key`: base64 of 16 random bytes.
#[must_use]
pub fn generate_key() -> String {
    let nonce: [u8; KEY_LENGTH] = rand::random();
    BASE64_STANDARD.encode(nonce)
}

/// Computes the `Sec-WebSocket-Accept` value a server must answer with.
#[must_use]
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(ACCEPT_GUID.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}

/// Builds a default upgrade request for `target`.
///
/// # Errors
///
/// Returns [`Error::MalformedHandshake`] if `target` is not an absolute
/// `ws`, `wss`, `http` or `https` URI with a host.
pub fn build_upgrade_request(target: &str) -> Result<RequestHeader> {
    HandshakeRequestBuilder::new(target).build()
}

// ============================================================================
// HandshakeRequestBuilder
// ============================================================================

/// Builder for the upgrade [`RequestHeader`].
#[derive(Debug, Clone)]
pub struct HandshakeRequestBuilder {
    /// Raw target URI.
    target: String,
    /// Explicit key, generated when absent.
    key: Option<String>,
    /// Explicit version, [`WEBSOCKET_VERSION`] when absent.
    version: Option<String>,
    /// Offered subprotocols.
    subprotocols: Vec<String>,
    /// Offered extensions, raw header syntax.
    extensions: Vec<String>,
    /// Additional headers.
    extra_headers: Vec<(String, String)>,
}

impl HandshakeRequestBuilder {
    /// Creates a builder for `target`.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            key: None,
            version: None,
            subprotocols: Vec::new(),
            extensions: Vec::new(),
            extra_headers: Vec::new(),
        }
    }

    /// Uses `key` instead of a random one.
    #[inline]
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Uses `version` instead of `13`.
    #[inline]
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Offers a subprotocol.
    #[inline]
    #[must_use]
    pub fn subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.subprotocols.push(protocol.into());
        self
    }

    /// Offers an extension, e.g. `permessage-deflate; client_max_window_bits`.
    #[inline]
    #[must_use]
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extensions.push(extension.into());
        self
    }

    /// Adds an arbitrary header.
    #[inline]
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Builds the request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedHandshake`] if the target is unusable or an
    /// explicit key/version is empty.
    pub fn build(self) -> Result<RequestHeader> {
        let uri = Self::validate_target(&self.target)?;

        let key = match self.key {
            Some(key) if key.trim().is_empty() => {
                return Err(Error::malformed_handshake("Sec-WebSocket-Key is empty"));
            }
            Some(key) => key,
            None => generate_key(),
        };

        let version = match self.version {
            Some(version) if version.trim().is_empty() => {
                return Err(Error::malformed_handshake("Sec-WebSocket-Version is empty"));
            }
            Some(version) => version,
            None => WEBSOCKET_VERSION.to_string(),
        };

        let mut request = RequestHeader::new("GET", uri);
        let host = request.host_header_value();
        let headers = &mut request.headers;
        headers.append("Host", host);
        headers.append(header::CONNECTION, CONNECTION_UPGRADE);
        headers.append(header::UPGRADE, "websocket");
        headers.append(header::SEC_WEBSOCKET_KEY, key);
        headers.append(header::SEC_WEBSOCKET_VERSION, version);

        if !self.subprotocols.is_empty() {
            headers.append(header::SEC_WEBSOCKET_PROTOCOL, self.subprotocols.join(", "));
        }
        if !self.extensions.is_empty() {
            headers.append(header::SEC_WEBSOCKET_EXTENSIONS, self.extensions.join(", "));
        }
        for (name, value) in self.extra_headers {
            headers.append(name, value);
        }

        Ok(request)
    }

    fn validate_target(target: &str) -> Result<Url> {
        let uri = Url::parse(target)
            .map_err(|e| Error::malformed_handshake(format!("invalid URI '{target}': {e}")))?;

        if !matches!(uri.scheme(), "ws" | "wss" | "http" | "https") {
            return Err(Error::malformed_handshake(format!(
                "unsupported scheme '{}'",
                uri.scheme()
            )));
        }

        if uri.host_str().is_none_or(str::is_empty) {
            return Err(Error::malformed_handshake(format!(
                "URI has no host: {target}"
            )));
        }

        Ok(uri)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_default_request_headers() {
        let request = build_upgrade_request("ws://example.com/socket").unwrap();

        assert_eq!(request.method, "GET");
        assert_eq!(request.version, "HTTP/1.1");
        assert_eq!(request.headers.get("Connection"), Some("Upgrade,keep-alive"));
        assert_eq!(request.headers.get("Upgrade"), Some("websocket"));
        assert_eq!(request.headers.get("Sec-WebSocket-Version"), Some("13"));
        assert_eq!(request.headers.get("Host"), Some("example.com"));
        assert!(request.headers.get("Sec-WebSocket-Protocol").is_none());
    }

    #[test]
    fn test_key_decodes_to_sixteen_bytes() {
        let request = build_upgrade_request("ws://example.com/").unwrap();
        let key = request.headers.get("Sec-WebSocket-Key").unwrap();
        let raw = BASE64_STANDARD.decode(key).unwrap();
        assert_eq!(raw.len(), KEY_LENGTH);
    }

    #[test]
    fn test_keys_differ_between_calls() {
        let first = build_upgrade_request("ws://example.com/").unwrap();
        let second = build_upgrade_request("ws://example.com/").unwrap();
        assert_ne!(
            first.headers.get("Sec-WebSocket-Key"),
            second.headers.get("Sec-WebSocket-Key")
        );
    }

    #[test]
    fn test_overrides() {
        let request = HandshakeRequestBuilder::new("wss://example.com:8443/a")
            .key("dGhlIHNhbXBsZSBub25jZQ==")
            .version("8")
            .subprotocol("chat")
            .subprotocol("superchat")
            .extension("permessage-deflate")
            .header("Origin", "https://example.com")
            .build()
            .unwrap();

        assert_eq!(
            request.headers.get("Sec-WebSocket-Key"),
            Some("dGhlIHNhbXBsZSBub25jZQ==")
        );
        assert_eq!(request.headers.get("Sec-WebSocket-Version"), Some("8"));
        assert_eq!(
            request.headers.get("Sec-WebSocket-Protocol"),
            Some("chat, superchat")
        );
        assert_eq!(request.headers.get("Host"), Some("example.com:8443"));
        assert_eq!(request.headers.get("Origin"), Some("https://example.com"));
    }

    #[test]
    fn test_malformed_targets() {
        for target in ["not a uri", "ftp://example.com/", "ws://"] {
            let err = build_upgrade_request(target).unwrap_err();
            assert!(
                matches!(err, Error::MalformedHandshake { .. }),
                "{target} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_empty_key_override_rejected() {
        let err = HandshakeRequestBuilder::new("ws://example.com/")
            .key("  ")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::MalformedHandshake { .. }));
    }

    #[test]
    fn test_accept_key_rfc_sample() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    proptest! {
        #[test]
        fn prop_key_is_sixteen_bytes_for_any_host(host in "[a-z]{1,20}", port in 1u16..u16::MAX) {
            let target = format!("ws://{host}.test:{port}/p");
            let a = build_upgrade_request(&target).unwrap();
            let b = build_upgrade_request(&target).unwrap();

            let key_a = a.headers.get("Sec-WebSocket-Key").unwrap();
            let key_b = b.headers.get("Sec-WebSocket-Key").unwrap();
            prop_assert_eq!(BASE64_STANDARD.decode(key_a).unwrap().len(), KEY_LENGTH);
            prop_assert_ne!(key_a, key_b);
            prop_assert_eq!(a.host_port(), port);
        }
    }
}
