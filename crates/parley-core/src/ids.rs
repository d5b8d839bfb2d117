//! Branded ID newtypes for type safety.
//!
//! String IDs (`ProcessId`, `EnvelopeId`, `ConnectionId`) wrap a `String`;
//! fresh values are UUID v7 generated via [`uuid::Uuid::now_v7`].
//! Persisted entities (`RoomId`, `UserId`, `MessageId`) are numeric and
//! assigned by the store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Return the raw integer value.
            #[must_use]
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

branded_id! {
    /// Identity of one running server process.
    ProcessId
}

branded_id! {
    /// Unique identifier of one publish on the distributed bus.
    EnvelopeId
}

branded_id! {
    /// Identifier of one accepted WebSocket connection.
    ConnectionId
}

numeric_id! {
    /// Identifier of a chat room.
    RoomId
}

numeric_id! {
    /// Identifier of a user.
    UserId
}

numeric_id! {
    /// Identifier of a persisted message, used as the pagination cursor.
    MessageId
}

impl ProcessId {
    /// Resolve this process's identity.
    ///
    /// An explicit value wins; otherwise `HOSTNAME`, otherwise
    /// `server-<unix millis>`.
    #[must_use]
    pub fn resolve(explicit: Option<&str>) -> Self {
        if let Some(id) = explicit.filter(|s| !s.trim().is_empty()) {
            return Self::from(id.trim());
        }
        match std::env::var("HOSTNAME") {
            Ok(host) if !host.trim().is_empty() => Self::from_string(host.trim().to_owned()),
            _ => Self::from_string(format!(
                "server-{}",
                chrono::Utc::now().timestamp_millis()
            )),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
