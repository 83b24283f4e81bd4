//! Strongly typed identifiers
//!
//! Users and rooms are identified by externally supplied strings (the auth
//! collaborator resolves the user id, the room id is usually the artifact id).
//! Connections get a server-generated id of the form `conn_<uuid>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identity of an authenticated user
    UserId
);

string_id!(
    /// Identity of a collaboration room (one per shared artifact)
    RoomId
);

string_id!(
    /// Identity of one live transport session
    ConnectionId
);

impl ConnectionId {
    /// Generate a fresh, unique connection id
    pub fn generate() -> Self {
        Self(format!("conn_{}", Uuid::new_v4().simple()))
    }
}
