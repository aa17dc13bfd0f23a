//! Identity newtypes shared across the Tandem crates.
//!
//! Everything that crosses the wire or keys an index gets its own wrapper
//! type. Sessions, users, and invite keys are opaque strings on the wire;
//! connections are a server-local counter that never leaves the process
//! except for logging.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A unique identifier for a user (authenticated or guest).
///
/// Authenticated users carry the id from their identity provider; guests
/// get a synthetic `guest-<hex>` id that is never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this id belongs to a synthetic guest principal.
    pub fn is_guest(&self) -> bool {
        self.0.starts_with("guest-")
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A unique identifier for a live session.
///
/// Generated server-side with 128 bits of entropy (32 lowercase hex
/// characters) so it is non-guessable; never reused after the session
/// is purged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A session admission credential: exactly 12 characters from `[A-Z0-9]`.
///
/// Compared case-sensitively. At most one live session holds a given key
/// at any time; rotation unregisters the old key atomically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InviteKey(pub String);

impl InviteKey {
    /// The fixed key length.
    pub const LEN: usize = 12;

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the string has the shape of an invite key
    /// (12 uppercase alphanumerics). Shape-valid does not mean live.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == Self::LEN
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
    }
}

impl fmt::Display for InviteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InviteKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A server-local identifier for one realtime connection.
///
/// Allocated from an atomic counter at accept time. Distinct from
/// [`UserId`]: one user may hold several connections (multiple editor
/// tabs), each with its own `ConnectionId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

// =========================================================================
// Tests
// =========================================================================
