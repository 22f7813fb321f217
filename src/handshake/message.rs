//! HTTP request/response headers of the upgrade exchange.
//!
//! The [`HandshakeMessage`] pairs the upgrade request with the response
//! observed by the transport. It is exclusively owned by an establishment
//! attempt until the channel is built; afterwards the channel keeps a
//! read-only copy of it for history and re-establishment.

// ============================================================================
// Imports
// ============================================================================

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Protocol version written on the request line.
pub const HTTP_VERSION: &str = "HTTP/1.1";

/// Status of a completed protocol switch.
pub const STATUS_SWITCHING_PROTOCOLS: u16 = 101;

// ============================================================================
// Headers
// ============================================================================

/// Ordered, case-insensitive header list.
///
/// Order is preserved on the wire; lookups ignore ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Creates an empty header list.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Returns the first value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns every value of `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Replaces all values of `name` with a single one, or removes the
    /// header when `value` is `None`.
    pub fn set(&mut self, name: &str, value: Option<&str>) {
        match value {
            Some(value) => {
                if let Some(pos) = self.position(name) {
                    self.0[pos].1 = value.to_string();
                    let mut index = 0;
                    self.0.retain(|(key, _)| {
                        let keep = index <= pos || !key.eq_ignore_ascii_case(name);
                        index += 1;
                        keep
                    });
                } else {
                    self.0.push((name.to_string(), value.to_string()));
                }
            }
            None => self.0.retain(|(key, _)| !key.eq_ignore_ascii_case(name)),
        }
    }

    /// Appends a header without touching existing values.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Returns `true` if any comma-separated token of `name` equals `token`.
    #[must_use]
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|value| value.split(','))
            .any(|part| part.trim().eq_ignore_ascii_case(token))
    }

    /// Returns `true` if the header is present.
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Iterates `(name, value)` pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of header lines.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no headers.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|(key, _)| key.eq_ignore_ascii_case(name))
    }
}

// ============================================================================
// RequestHeader
// ============================================================================

/// Request line plus headers of the upgrade request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Request method, `GET` for upgrades.
    pub method: String,
    /// Absolute target URI (`ws`, `wss`, `http` or `https`).
    pub uri: Url,
    /// Protocol version on the request line.
    pub version: String,
    /// Header lines.
    pub headers: Headers,
}

impl RequestHeader {
    /// Creates a request with no headers.
    #[must_use]
    pub fn new(method: impl Into<String>, uri: Url) -> Self {
        Self {
            method: method.into(),
            uri,
            version: HTTP_VERSION.to_string(),
            headers: Headers::new(),
        }
    }

    /// Returns the target host as written in the URI.
    ///
    /// IPv6 literals keep their brackets, as in the `Host` header.
    #[inline]
    #[must_use]
    pub fn host_name(&self) -> &str {
        self.uri.host_str().unwrap_or_default()
    }

    /// Returns the bare host to resolve or connect to.
    ///
    /// Unlike [`host_name`](Self::host_name), IPv6 literals come back
    /// without brackets.
    #[must_use]
    pub fn connect_host(&self) -> String {
        match self.uri.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => String::new(),
        }
    }

    /// Returns the target port, falling back to the scheme default.
    #[must_use]
    pub fn host_port(&self) -> u16 {
        self.uri
            .port()
            .unwrap_or(if self.is_secure() { 443 } else { 80 })
    }

    /// Returns `true` for `wss` and `https` targets.
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        matches!(self.uri.scheme(), "wss" | "https")
    }

    /// Value for the `Host` header; the port is omitted when it is the
    /// scheme default.
    #[must_use]
    pub fn host_header_value(&self) -> String {
        match self.uri.port() {
            Some(port) => format!("{}:{port}", self.host_name()),
            None => self.host_name().to_string(),
        }
    }

    /// Origin-form request target (`/path?query`).
    #[must_use]
    pub fn request_target(&self) -> String {
        let mut target = self.uri.path().to_string();
        if target.is_empty() {
            target.push('/');
        }
        if let Some(query) = self.uri.query() {
            target.push('?');
            target.push_str(query);
        }
        target
    }

    /// Serializes the request line and headers, terminated by an empty line.
    #[must_use]
    pub fn to_wire(&self) -> String {
        let mut out = String::with_capacity(256);
        let _ = write!(
            out,
            "{} {} {}\r\n",
            self.method,
            self.request_target(),
            self.version
        );
        if !self.headers.contains("Host") {
            let _ = write!(out, "Host: {}\r\n", self.host_header_value());
        }
        for (name, value) in self.headers.iter() {
            let _ = write!(out, "{name}: {value}\r\n");
        }
        out.push_str("\r\n");
        out
    }
}

// ============================================================================
// ResponseHeader
// ============================================================================

/// Status line plus headers of the server response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    /// Protocol version on the status line.
    pub version: String,
    /// Status code.
    pub status: u16,
    /// Reason phrase, possibly empty.
    pub reason: String,
    /// Header lines.
    pub headers: Headers,
}

impl ResponseHeader {
    /// Creates a response with no headers.
    #[must_use]
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            version: HTTP_VERSION.to_string(),
            status,
            reason: reason.into(),
            headers: Headers::new(),
        }
    }

    /// Parses a status line and headers (everything before the blank line).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the status line is unreadable.
    pub fn parse(head: &str) -> Result<Self> {
        let mut lines = head.split("\r\n");
        let status_line = lines
            .next()
            .ok_or_else(|| Error::transport("empty response"))?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/") {
            return Err(Error::transport(format!(
                "invalid status line: {status_line}"
            )));
        }
        let status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| Error::transport(format!("invalid status line: {status_line}")))?;
        let reason = parts.next().unwrap_or_default();

        let mut headers = Headers::new();
        for line in lines.filter(|line| !line.is_empty()) {
            // Lines without a colon are skipped rather than rejected.
            if let Some((name, value)) = line.split_once(':') {
                headers.append(name.trim(), value.trim());
            }
        }

        Ok(Self {
            version: version.to_string(),
            status,
            reason: reason.to_string(),
            headers,
        })
    }

    /// Returns `true` if this is a redirect carrying a `Location`.
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308) && self.headers.contains("Location")
    }

    /// Returns `true` if the server completed the switch to WebSocket.
    #[must_use]
    pub fn is_protocol_switch(&self) -> bool {
        self.status == STATUS_SWITCHING_PROTOCOLS && self.headers.has_token("Upgrade", "websocket")
    }
}

// ============================================================================
// HandshakeMessage
// ============================================================================

/// Per-request identity binding (user, credentials) applied by a transport.
///
/// Cleared before every establishment so nothing from an earlier request
/// carries over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestIdentity {
    /// Name of the user the request is made as.
    pub user: String,
    /// Value for the `Authorization` header, if any.
    pub authorization: Option<String>,
}

/// Upgrade request and, once sent, the final response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    /// The upgrade request.
    pub request: RequestHeader,
    /// Final response after any redirects.
    pub response: Option<ResponseHeader>,
    /// Identity binding of the last send.
    pub identity: Option<RequestIdentity>,
}

impl HandshakeMessage {
    /// Wraps a request that has not been sent yet.
    #[must_use]
    pub fn new(request: RequestHeader) -> Self {
        Self {
            request,
            response: None,
            identity: None,
        }
    }

    /// Copies the request into a fresh, unsent message.
    #[must_use]
    pub fn resend_copy(&self) -> Self {
        Self::new(self.request.clone())
    }

    /// Returns the final status code, if a response was received.
    #[inline]
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> RequestHeader {
        RequestHeader::new("GET", Url::parse(uri).unwrap())
    }

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.append("Sec-WebSocket-Protocol", "chat");
        assert_eq!(headers.get("sec-websocket-protocol"), Some("chat"));
        assert!(headers.contains("SEC-WEBSOCKET-PROTOCOL"));
    }

    #[test]
    fn test_headers_set_replaces_and_removes() {
        let mut headers = Headers::new();
        headers.append("X-A", "1");
        headers.append("X-B", "2");
        headers.append("x-a", "3");

        headers.set("X-A", Some("9"));
        assert_eq!(headers.get_all("x-a").collect::<Vec<_>>(), vec!["9"]);
        assert_eq!(headers.len(), 2);

        headers.set("x-b", None);
        assert!(!headers.contains("X-B"));
    }

    #[test]
    fn test_has_token() {
        let mut headers = Headers::new();
        headers.append("Connection", "keep-alive, Upgrade");
        assert!(headers.has_token("connection", "upgrade"));
        assert!(!headers.has_token("connection", "close"));
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(request("ws://example.com/").host_port(), 80);
        assert_eq!(request("wss://example.com/").host_port(), 443);
        assert_eq!(request("https://example.com/").host_port(), 443);
        assert_eq!(request("ws://example.com:8080/").host_port(), 8080);
    }

    #[test]
    fn test_connect_host_strips_ipv6_brackets() {
        let request = RequestHeader::new("GET", Url::parse("ws://[::1]:9000/chat").unwrap());
        assert_eq!(request.host_name(), "[::1]");
        assert_eq!(request.connect_host(), "::1");
        assert_eq!(request.host_header_value(), "[::1]:9000");

        let request = RequestHeader::new("GET", Url::parse("ws://Example.com/").unwrap());
        assert_eq!(request.connect_host(), "example.com");
    }

    #[test]
    fn test_to_wire() {
        let mut req = request("ws://example.com:8080/chat?room=1");
        req.headers.append("Upgrade", "websocket");

        let wire = req.to_wire();
        assert!(wire.starts_with("GET /chat?room=1 HTTP/1.1\r\n"));
        assert!(wire.contains("Host: example.com:8080\r\n"));
        assert!(wire.contains("Upgrade: websocket\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_parse_response() {
        let head = "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nbogus line";
        let response = ResponseHeader::parse(head).unwrap();
        assert_eq!(response.status, 101);
        assert_eq!(response.reason, "Switching Protocols");
        assert!(response.is_protocol_switch());
        assert_eq!(response.headers.len(), 2);
    }

    #[test]
    fn test_parse_response_rejects_garbage() {
        assert!(ResponseHeader::parse("nonsense").is_err());
        assert!(ResponseHeader::parse("HTTP/1.1 abc OK").is_err());
    }

    #[test]
    fn test_ok_is_not_protocol_switch() {
        let response = ResponseHeader::parse("HTTP/1.1 200 OK\r\nUpgrade: websocket").unwrap();
        assert!(!response.is_protocol_switch());
    }

    #[test]
    fn test_is_redirect_needs_location() {
        let with = ResponseHeader::parse("HTTP/1.1 301 Moved\r\nLocation: /x").unwrap();
        let without = ResponseHeader::parse("HTTP/1.1 301 Moved").unwrap();
        assert!(with.is_redirect());
        assert!(!without.is_redirect());
    }
}
