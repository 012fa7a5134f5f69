use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Declares a UUIDv7-backed newtype identifier with the conveniences the
/// rest of the workspace expects (`Display`, string conversions, `new()`).
///
/// UUIDv7 embeds a millisecond timestamp, so ids sort chronologically —
/// handy for log correlation and for `ORDER BY id` listings without an
/// extra timestamp column.
macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

id_type!(UserId);
id_type!(ConversationId);
id_type!(MessageId);
id_type!(BranchId);
id_type!(ParticipantId);
id_type!(ConnId);

/// The well-known root parent: a branch with this `parentBranchId` is a
/// tree root. Never a real branch id.
pub const ROOT_BRANCH: &str = "root";

/// Conversation wire format — `standard` implies a single assistant derived
/// from `Conversation.model`; `prefill` has an explicit participant set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationFormat {
    Standard,
    Prefill,
}

/// A participant's role within the conversation tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    User,
    Assistant,
}

/// A branch's role, distinct from `ParticipantRole` because branches can
/// also carry a `system` role (prompt-composition artifacts, not a
/// participant in the room sense).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchRole {
    User,
    Assistant,
    System,
}

/// How a `prefill`-format participant's conversation mode resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    Auto,
    Prefill,
    Messages,
    Completion,
}
