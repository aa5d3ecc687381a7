//! Session identifiers.
//!
//! A [`SessionId`] is 128 bits of randomness rendered as a UUID string. It is
//! the same identifier space regardless of whether the session ends up
//! local, sandboxed, or remote, which is what keeps it safe to look a
//! `clone_terminal` request's `originalSessionId` up in either registry
//! without first knowing its kind.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Stable, filesystem/container-name-safe rendering used to derive
    /// sandbox container names.
    pub fn as_simple(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
