//! Negotiated parameters extracted from a completed handshake.
//!
//! None of these functions fail: absent or unparsable values come back
//! empty so channel construction never trips over a sloppy server.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;
use tracing::{trace, warn};

use super::builder::{accept_key, header};
use super::message::HandshakeMessage;

// ============================================================================
// Parsers
// ============================================================================

/// Parses `Sec-WebSocket-Extensions` of the response into
/// `extension name -> raw parameter string`.
///
/// `permessage-deflate; client_max_window_bits=15, x-foo` yields
/// `{"permessage-deflate": "client_max_window_bits=15", "x-foo": ""}`.
#[must_use]
pub fn parse_extensions(message: &HandshakeMessage) -> FxHashMap<String, String> {
    let mut extensions = FxHashMap::default();

    let Some(response) = message.response.as_ref() else {
        return extensions;
    };

    for value in response.headers.get_all(header::SEC_WEBSOCKET_EXTENSIONS) {
        for entry in value.split(',') {
            let mut parts = entry.split(';');
            let name = parts.next().unwrap_or_default().trim();
            if name.is_empty() {
                trace!(entry, "Skipping extension without a name");
                continue;
            }
            let params = parts.map(str::trim).collect::<Vec<_>>().join("; ");
            extensions.insert(name.to_string(), params);
        }
    }

    extensions
}

/// Returns the subprotocol selected by the server, if any.
#[must_use]
pub fn parse_subprotocol(message: &HandshakeMessage) -> Option<String> {
    message
        .response
        .as_ref()
        .and_then(|r| r.headers.get(header::SEC_WEBSOCKET_PROTOCOL))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

/// Returns the protocol version requested by the client, empty if absent.
#[must_use]
pub fn parse_version(message: &HandshakeMessage) -> String {
    message
        .request
        .headers
        .get(header::SEC_WEBSOCKET_VERSION)
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

/// Compares the response `Sec-WebSocket-Accept` with the request key.
///
/// Returns `false` only when both are present and disagree. Mismatches
/// are logged; interception continues regardless.
pub fn check_accept(message: &HandshakeMessage) -> bool {
    let key = message.request.headers.get(header::SEC_WEBSOCKET_KEY);
    let accept = message
        .response
        .as_ref()
        .and_then(|r| r.headers.get(header::SEC_WEBSOCKET_ACCEPT));

    match (key, accept) {
        (Some(key), Some(accept)) => {
            let expected = accept_key(key.trim());
            if expected == accept.trim() {
                true
            } else {
                warn!(expected = %expected, received = %accept, "Sec-WebSocket-Accept mismatch");
                false
            }
        }
        _ => true,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::handshake::builder::HandshakeRequestBuilder;
    use crate::handshake::message::ResponseHeader;

    fn message_with_response(head: &str) -> HandshakeMessage {
        let request = HandshakeRequestBuilder::new("ws://example.com/")
            .key("dGhlIHNhbXBsZSBub25jZQ==")
            .build()
            .unwrap();
        let mut message = HandshakeMessage::new(request);
        message.response = Some(ResponseHeader::parse(head).unwrap());
        message
    }

    #[test]
    fn test_parse_extensions() {
        let message = message_with_response(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits=15, x-foo\r\n\
             Sec-WebSocket-Extensions: x-bar;a=1;b",
        );
        let extensions = parse_extensions(&message);

        assert_eq!(extensions.len(), 3);
        assert_eq!(extensions["permessage-deflate"], "client_max_window_bits=15");
        assert_eq!(extensions["x-foo"], "");
        assert_eq!(extensions["x-bar"], "a=1; b");
    }

    #[test]
    fn test_parse_extensions_tolerates_garbage() {
        let message = message_with_response(
            "HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Extensions: ;;, ,",
        );
        assert!(parse_extensions(&message).is_empty());
    }

    #[test]
    fn test_missing_values_default_to_empty() {
        let message = message_with_response("HTTP/1.1 101 Switching Protocols");
        assert!(parse_extensions(&message).is_empty());
        assert_eq!(parse_subprotocol(&message), None);

        let unsent = HandshakeMessage::new(message.request.clone());
        assert!(parse_extensions(&unsent).is_empty());
    }

    #[test]
    fn test_parse_subprotocol_and_version() {
        let message = message_with_response(
            "HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Protocol:  chat ",
        );
        assert_eq!(parse_subprotocol(&message).as_deref(), Some("chat"));
        assert_eq!(parse_version(&message), "13");
    }

    #[test]
    fn test_check_accept() {
        let good = message_with_response(
            "HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=",
        );
        let bad = message_with_response(
            "HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Accept: nope",
        );
        let missing = message_with_response("HTTP/1.1 101 Switching Protocols");

        assert!(check_accept(&good));
        assert!(!check_accept(&bad));
        assert!(check_accept(&missing));
    }
}
