//! Identifiers for records, users, reaction keys and hosting posts.
//!
//! Platform identifiers (snowflakes, emoji) are opaque strings to the core, so
//! each one gets a string newtype to keep them from being mixed up.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Creates a new `", stringify!($name), "`")]
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the identifier as a string slice
            #[must_use]
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

string_id! {
    /// Unique identifier for a signup record (one per scheduled event)
    RecordId
}

string_id! {
    /// Platform user identifier
    UserId
}

string_id! {
    /// Reaction identity key: the symbol that correlates a reaction to a slot
    ReactionKey
}

/// Reference to the hosting post on the chat platform.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostRef {
    /// Guild (server) the post lives in
    pub guild_id: String,
    /// Channel the post lives in
    pub channel_id: String,
    /// Message id of the post
    pub message_id: String,
}

impl PostRef {
    /// Creates a new `PostRef`
    #[must_use]
    pub fn new(
        guild_id: impl Into<String>,
        channel_id: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            guild_id: guild_id.into(),
            channel_id: channel_id.into(),
            message_id: message_id.into(),
        }
    }
}

impl fmt::Display for PostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.guild_id, self.channel_id, self.message_id)
    }
}
