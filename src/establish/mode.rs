//! Operating mode and scope.
//!
//! The mode decides which targets an establishment attempt may reach:
//!
//! | Mode | Valid targets |
//! |------|---------------|
//! | `safe` | none |
//! | `protect` | in scope only |
//! | `standard`, `attack` | all |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::transport::RedirectValidator;

// ============================================================================
// OperatingMode
// ============================================================================

/// Permissiveness level of the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Nothing potentially harmful is allowed.
    Safe,
    /// Only in-scope targets are allowed.
    Protect,
    /// No restrictions.
    #[default]
    Standard,
    /// No restrictions; in-scope targets are actively attacked.
    Attack,
}

impl OperatingMode {
    /// Lowercase mode name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Protect => "protect",
            Self::Standard => "standard",
            Self::Attack => "attack",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Ok(Self::Safe),
            "protect" => Ok(Self::Protect),
            "standard" => Ok(Self::Standard),
            "attack" => Ok(Self::Attack),
            other => Err(Error::config(format!("unknown operating mode '{other}'"))),
        }
    }
}

// ============================================================================
// Scope
// ============================================================================

/// Include/exclude URL patterns.
///
/// Patterns match the whole URL, case-insensitively. A URL is in scope if
/// an include pattern matches and no exclude pattern does; with no include
/// patterns nothing is in scope.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    includes: Vec<Regex>,
    excludes: Vec<Regex>,
}

impl Scope {
    /// Compiles a scope from raw patterns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid pattern.
    pub fn new<I, E>(includes: I, excludes: E) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Ok(Self {
            includes: compile_patterns(includes)?,
            excludes: compile_patterns(excludes)?,
        })
    }

    /// Scope containing nothing.
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns `true` if `url` is in scope.
    #[must_use]
    pub fn contains(&self, url: &Url) -> bool {
        let url = url.as_str();
        self.includes.iter().any(|p| p.is_match(url)) && !self.excludes.iter().any(|p| p.is_match(url))
    }
}

/// Compiles anchored, case-insensitive patterns.
pub(crate) fn compile_patterns<I>(patterns: I) -> Result<Vec<Regex>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|pattern| {
            let pattern = pattern.as_ref();
            Regex::new(&format!("(?i)^(?:{pattern})$"))
                .map_err(|e| Error::config(format!("invalid pattern '{pattern}': {e}")))
        })
        .collect()
}

// ============================================================================
// ScopePolicy
// ============================================================================

/// Live mode and scope, shared by the service and its establisher.
#[derive(Debug, Default)]
pub struct ScopePolicy {
    mode: RwLock<OperatingMode>,
    scope: RwLock<Scope>,
}

impl ScopePolicy {
    #[must_use]
    pub fn new(mode: OperatingMode, scope: Scope) -> Self {
        Self {
            mode: RwLock::new(mode),
            scope: RwLock::new(scope),
        }
    }

    #[inline]
    #[must_use]
    pub fn mode(&self) -> OperatingMode {
        *self.mode.read()
    }

    pub fn set_mode(&self, mode: OperatingMode) {
        *self.mode.write() = mode;
        debug!(mode = %mode, "Operating mode changed");
    }

    pub fn set_scope(&self, scope: Scope) {
        *self.scope.write() = scope;
    }

    /// Returns `true` if `target` may be reached in the current mode.
    #[must_use]
    pub fn is_valid(&self, target: &Url) -> bool {
        match self.mode() {
            OperatingMode::Safe => false,
            OperatingMode::Protect => self.scope.read().contains(target),
            OperatingMode::Standard | OperatingMode::Attack => true,
        }
    }
}

// ============================================================================
// HopRecorder
// ============================================================================

/// Redirect validator that remembers the first rejected hop.
pub(crate) struct HopRecorder<'a> {
    policy: &'a ScopePolicy,
    first_invalid: Mutex<Option<Url>>,
}

impl<'a> HopRecorder<'a> {
    pub(crate) fn new(policy: &'a ScopePolicy) -> Self {
        Self {
            policy,
            first_invalid: Mutex::new(None),
        }
    }

    /// The first hop the policy rejected.
    pub(crate) fn first_invalid(&self) -> Option<Url> {
        self.first_invalid.lock().clone()
    }
}

impl RedirectValidator for HopRecorder<'_> {
    fn is_valid(&self, target: &Url) -> bool {
        if self.policy.is_valid(target) {
            return true;
        }
        debug!(hop = %target, mode = %self.policy.mode(), "Redirect hop out of scope");
        self.first_invalid.lock().get_or_insert_with(|| target.clone());
        false
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_mode_parse_and_display() {
        assert_eq!("Protect".parse::<OperatingMode>().unwrap(), OperatingMode::Protect);
        assert_eq!(OperatingMode::Attack.to_string(), "attack");
        assert!(matches!(
            "paranoid".parse::<OperatingMode>(),
            Err(Error::Config { .. })
        ));
        assert_eq!(OperatingMode::default(), OperatingMode::Standard);
    }

    #[test]
    fn test_scope_matches_whole_url() {
        let scope = Scope::new([r"ws://example\.com/.*"], [r".*/admin.*"]).unwrap();

        assert!(scope.contains(&url("ws://EXAMPLE.com/chat")));
        assert!(!scope.contains(&url("ws://example.com/admin/feed")));
        assert!(!scope.contains(&url("ws://evil.test/?ws://example.com/")));
        assert!(!Scope::empty().contains(&url("ws://example.com/")));
    }

    #[test]
    fn test_bad_pattern_is_config_error() {
        let err = Scope::new(["("], Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_policy_per_mode() {
        let inside = url("ws://example.com/chat");
        let outside = url("ws://other.test/");
        let policy = ScopePolicy::new(
            OperatingMode::Safe,
            Scope::new([r"ws://example\.com/.*"], Vec::<String>::new()).unwrap(),
        );

        assert!(!policy.is_valid(&inside));

        policy.set_mode(OperatingMode::Protect);
        assert!(policy.is_valid(&inside));
        assert!(!policy.is_valid(&outside));

        for mode in [OperatingMode::Standard, OperatingMode::Attack] {
            policy.set_mode(mode);
            assert!(policy.is_valid(&outside));
        }
    }

    #[test]
    fn test_hop_recorder_keeps_first_invalid() {
        let policy = ScopePolicy::new(OperatingMode::Safe, Scope::empty());
        let recorder = HopRecorder::new(&policy);

        assert!(!recorder.is_valid(&url("http://first.test/")));
        assert!(!recorder.is_valid(&url("http://second.test/")));
        assert_eq!(recorder.first_invalid(), Some(url("http://first.test/")));
    }
}
