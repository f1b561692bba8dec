//! Telegram adapter (teloxide).
//!
//! This crate implements the `hyacinth-core` MessagingPort over the Telegram
//! Bot API. Telegram bots cannot read member reactions, so reactions are
//! rendered as inline buttons and button presses are reported back to the
//! core as reaction events (see [`router`]).

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode},
};

use tokio::time::sleep;

pub mod router;

use hyacinth_core::{
    domain::{ChannelId, MessageId, MessageRef},
    errors::Error,
    messaging::{port::MessagingPort, types::MessagingCapabilities},
    Result,
};

/// Callback data prefix for reaction buttons.
pub const REACTION_CALLBACK_PREFIX: &str = "react:";

const MAX_MESSAGE_LEN: usize = 4096;

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(channel: ChannelId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(channel.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 2;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(teloxide::RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    tracing::warn!(wait = ?d, attempt = attempts, "telegram flood limit hit; retrying");
                    sleep(d).await;
                }
                Err(other) => return Err(Self::map_err(other)),
            }
        }
    }
}

/// One row of buttons, one per emoji; the callback data names the emoji.
pub fn reaction_keyboard(reactions: &[&str]) -> InlineKeyboardMarkup {
    let row: Vec<InlineKeyboardButton> = reactions
        .iter()
        .map(|emoji| {
            InlineKeyboardButton::callback(
                emoji.to_string(),
                format!("{REACTION_CALLBACK_PREFIX}{emoji}"),
            )
        })
        .collect();
    InlineKeyboardMarkup::new(vec![row])
}

/// Emoji named by a reaction button's callback data.
pub fn parse_reaction_data(data: &str) -> Option<&str> {
    data.strip_prefix(REACTION_CALLBACK_PREFIX)
        .filter(|emoji| !emoji.is_empty())
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_reactions: true,
            supports_reaction_removal: true,
            supports_delete: true,
            max_message_len: MAX_MESSAGE_LEN,
        }
    }

    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(channel), text.to_string())
                    .parse_mode(ParseMode::Html)
                    .disable_web_page_preview(true)
            })
            .await?;

        Ok(MessageRef {
            channel_id: channel,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn send_with_reactions(
        &self,
        channel: ChannelId,
        text: &str,
        reactions: &[&str],
    ) -> Result<MessageRef> {
        if reactions.is_empty() {
            return self.send_text(channel, text).await;
        }
        let markup = reaction_keyboard(reactions);

        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(channel), text.to_string())
                    .parse_mode(ParseMode::Html)
                    .reply_markup(markup.clone())
            })
            .await?;

        Ok(MessageRef {
            channel_id: channel,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.with_retry(|| {
            self.bot.delete_message(
                Self::tg_chat(msg.channel_id),
                Self::tg_msg_id(msg.message_id),
            )
        })
        .await?;
        Ok(())
    }
}
