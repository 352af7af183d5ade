//! Client identity newtypes.
//!
//! The handshake collaborator hands the relay an already-validated user and
//! room. Both are kept as distinct newtypes so a room ID can never be passed
//! where a user ID is expected. [`ClientId`] is derived from the pair and is
//! only used to label logs and metrics.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
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

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Database user ID of an authenticated client.
    UserId
}

branded_id! {
    /// Room the client joined.
    RoomId
}

branded_id! {
    /// Diagnostic label for one client, `<user>@<room>`.
    ///
    /// Not unique across reconnects and never used as a lookup key.
    ClientId
}

/// Validated identity of one connected client.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientIdentity {
    /// Authenticated user.
    pub user_id: UserId,
    /// Joined room.
    pub room_id: RoomId,
}

impl ClientIdentity {
    /// Build an identity from anything string-like.
    pub fn new(user_id: impl Into<UserId>, room_id: impl Into<RoomId>) -> Self {
        Self {
            user_id: user_id.into(),
            room_id: room_id.into(),
        }
    }

    /// Derived diagnostic ID.
    #[must_use]
    pub fn client_id(&self) -> ClientId {
        ClientId(format!("{}@{}", self.user_id, self.room_id))
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user_id, self.room_id)
    }
}
