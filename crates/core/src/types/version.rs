//! Optimistic-concurrency and retry-safety tokens for cart mutations.
//!
//! Every mutating cart request carries the last-known [`CartVersion`] as an
//! `If-Match` precondition and an [`IdempotencyKey`] so the request can be
//! replayed safely after a transport failure.

use core::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monotonic cart version used as an optimistic lock.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct CartVersion(u64);

impl CartVersion {
    /// Create a version from its integer value.
    #[must_use]
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    /// Returns the integer value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Render as an `If-Match` header value (a quoted entity tag).
    #[must_use]
    pub fn to_if_match(self) -> String {
        format!("\"{}\"", self.0)
    }

    /// Parse from an `ETag` header or a bare integer.
    ///
    /// Accepts `7`, `"7"`, and weak tags like `W/"7"`.
    #[must_use]
    pub fn parse_etag(value: &str) -> Option<Self> {
        let value = value.trim();
        let value = value.strip_prefix("W/").unwrap_or(value);
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        value.parse::<u64>().ok().map(Self)
    }
}

impl fmt::Display for CartVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated key that makes a mutating request safe to retry.
///
/// One key is generated per logical operation; a retry of the same operation
/// reuses it, a new operation gets a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Generate a fresh random key (UUID v4).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_if_match_is_quoted() {
        assert_eq!(CartVersion::new(3).to_if_match(), "\"3\"");
    }

    #[test]
    fn test_parse_etag_forms() {
        assert_eq!(CartVersion::parse_etag("7"), Some(CartVersion::new(7)));
        assert_eq!(CartVersion::parse_etag("\"7\""), Some(CartVersion::new(7)));
        assert_eq!(CartVersion::parse_etag("W/\"7\""), Some(CartVersion::new(7)));
        assert_eq!(CartVersion::parse_etag("\"abc\""), None);
        assert_eq!(CartVersion::parse_etag(""), None);
    }

    #[test]
    fn test_versions_order() {
        assert!(CartVersion::new(2) > CartVersion::new(1));
    }

    #[test]
    fn test_idempotency_keys_are_unique() {
        let a = IdempotencyKey::generate();
        let b = IdempotencyKey::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }
}
