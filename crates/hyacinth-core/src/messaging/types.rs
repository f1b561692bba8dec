use crate::domain::{ChannelId, MessageRef, UserId};

/// Cross-messenger inbound event model.
///
/// Platform-specific fields stay in the adapter; the core only needs this shape.
#[derive(Clone, Debug)]
pub enum InboundEvent {
    Message(ChatMessage),
    ReactionAdded(ReactionEvent),
    ReactionRemoved(ReactionEvent),
}

#[derive(Clone, Debug)]
pub struct ChatMessage {
    pub message: MessageRef,
    pub author: UserId,
    pub author_name: Option<String>,
    pub text: String,
}

impl ChatMessage {
    pub fn channel_id(&self) -> ChannelId {
        self.message.channel_id
    }

    pub fn author_mention(&self) -> String {
        self.author.mention(self.author_name.as_deref())
    }
}

#[derive(Clone, Debug)]
pub struct ReactionEvent {
    pub message: MessageRef,
    pub user: UserId,
    pub user_name: Option<String>,
    pub emoji: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReactionAction {
    Added,
    Removed,
}

/// Capabilities / feature flags of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_reactions: bool,
    pub supports_reaction_removal: bool,
    pub supports_delete: bool,
    pub max_message_len: usize,
}
