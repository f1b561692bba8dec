use serde::{Deserialize, Serialize};

/// Chat user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// Chat channel id (numeric). One notifier per channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub i64);

/// Message id, unique only within its channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i32);

/// A stable reference to a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

impl UserId {
    /// Platform-neutral mention text used in replies.
    pub fn mention(&self, display_name: Option<&str>) -> String {
        match display_name {
            Some(name) if !name.trim().is_empty() => format!("@{}", name.trim_start_matches('@')),
            _ => format!("user {}", self.0),
        }
    }
}
