//! Remote Handles
//!
//! A handle is the remote engine's opaque name for a dataset it owns. The
//! engine expires handles that are not renewed within their TTL; the client
//! only tracks whether a handle is still believed alive.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a dataset held by the remote engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteHandle(String);

impl RemoteHandle {
    /// Wrap a handle token returned by the engine.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RemoteHandle {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for RemoteHandle {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl AsRef<str> for RemoteHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_raw_token() {
        let handle = RemoteHandle::new("df-42");
        assert_eq!(handle.to_string(), "df-42");
        assert_eq!(handle.as_str(), "df-42");
    }

    #[test]
    fn serializes_as_plain_string() {
        let handle = RemoteHandle::from("abc");
        assert_eq!(serde_json::to_string(&handle).unwrap(), "\"abc\"");
    }
}
