//! Branded ID newtypes.
//!
//! Connections and watchers get distinct ID types wrapping a `String`, so a
//! watcher handle can never be passed where a connection ID is expected.
//! Fresh IDs are UUID v7 (time-ordered), which keeps log lines sortable.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

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

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Last eight characters (the random tail of a v7 ID), for
            /// thread names and compact log fields.
            #[must_use]
            pub fn short(&self) -> &str {
                let start = self.0.char_indices().rev().nth(7).map_or(0, |(i, _)| i);
                &self.0[start..]
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
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

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

branded_id! {
    /// Unique identifier for a connected WebSocket client.
    ConnectionId
}

branded_id! {
    /// Unique identifier for one run of a filesystem watcher.
    WatchId
}
