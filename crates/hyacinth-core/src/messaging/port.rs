use async_trait::async_trait;

use crate::{
    domain::{ChannelId, MessageRef},
    messaging::types::MessagingCapabilities,
    Result,
};

/// Cross-messenger outbound port.
///
/// Telegram is the first implementation. Reactions are offered as a list of
/// emoji the user can toggle; adapters without native reactions render them
/// as buttons and report presses as reaction events.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<MessageRef>;

    async fn send_with_reactions(
        &self,
        channel: ChannelId,
        text: &str,
        reactions: &[&str],
    ) -> Result<MessageRef>;

    async fn delete_message(&self, msg: MessageRef) -> Result<()>;
}
