//! Core identifier types and protocol constants for rdv.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Default port the rendezvous server listens on.
pub const DEFAULT_PORT: u16 = 9090;

/// Opaque per-peer identifier within the signaler, chosen by the client at
/// connect time and unique across the whole server.
///
/// Unrelated to a hardware MAC address; the reference client mints a fresh
/// UUID string, but any non-empty string works.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mac(String);

impl Mac {
    /// Wrap a string into a `Mac`.
    #[must_use]
    pub fn new(inner: impl Into<String>) -> Self {
        Self(inner.into())
    }

    /// Borrow the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identifier carries no characters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for Mac {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Mac {
    fn from(val: &str) -> Self {
        Self(val.to_owned())
    }
}

/// Opaque namespace identifier; peers sharing a community are candidates for
/// introduction to one another.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Community(String);

impl Community {
    /// Wrap a string into a `Community`.
    #[must_use]
    pub fn new(inner: impl Into<String>) -> Self {
        Self(inner.into())
    }

    /// Borrow the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identifier carries no characters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for Community {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Community {
    fn from(val: &str) -> Self {
        Self(val.to_owned())
    }
}
