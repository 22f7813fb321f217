//! Minimal cookie jar holding session state between handshakes.
//!
//! Only name/value pairs keyed by host are kept. Attributes such as
//! `Path` or `Expires` are ignored; a handshake only needs the session
//! cookie back.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;

// ============================================================================
// CookieJar
// ============================================================================

/// Cookies per host, in insertion order per host.
#[derive(Debug, Default, Clone)]
pub struct CookieJar {
    hosts: FxHashMap<String, Vec<(String, String)>>,
}

impl CookieJar {
    /// Creates an empty jar.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores one `Set-Cookie` header value received from `host`.
    pub fn store(&mut self, host: &str, set_cookie: &str) {
        let pair = set_cookie.split(';').next().unwrap_or_default();
        let Some((name, value)) = pair.split_once('=') else {
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            return;
        }

        let cookies = self.hosts.entry(host.to_ascii_lowercase()).or_default();
        match cookies.iter_mut().find(|(n, _)| n == name) {
            Some(existing) => existing.1 = value.trim().to_string(),
            None => cookies.push((name.to_string(), value.trim().to_string())),
        }
    }

    /// Builds the `Cookie` header for `host`, if any cookies are held.
    #[must_use]
    pub fn header_for(&self, host: &str) -> Option<String> {
        let cookies = self.hosts.get(&host.to_ascii_lowercase())?;
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(n, v)| format!("{n}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Returns `true` if no cookies are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.values().all(Vec::is_empty)
    }

    /// Drops all cookies.
    pub fn clear(&mut self) {
        self.hosts.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_header() {
        let mut jar = CookieJar::new();
        jar.store("Example.com", "session=abc; Path=/; HttpOnly");
        jar.store("example.com", "theme=dark");

        assert_eq!(
            jar.header_for("example.com").as_deref(),
            Some("session=abc; theme=dark")
        );
        assert!(jar.header_for("other.com").is_none());
    }

    #[test]
    fn test_store_replaces_value() {
        let mut jar = CookieJar::new();
        jar.store("h", "a=1");
        jar.store("h", "a=2");
        assert_eq!(jar.header_for("h").as_deref(), Some("a=2"));
    }

    #[test]
    fn test_garbage_ignored() {
        let mut jar = CookieJar::new();
        jar.store("h", "novalue");
        jar.store("h", "=x");
        assert!(jar.is_empty());
    }
}
