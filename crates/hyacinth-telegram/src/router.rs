use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*, types::User};

use tokio::sync::Mutex;

use hyacinth_core::{
    bot::{BotSettings, NotifierBot},
    config::Config,
    domain::{ChannelId, MessageId, MessageRef, UserId},
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
        types::{ChatMessage, InboundEvent, ReactionEvent},
    },
    plugins::PluginRegistry,
    store::{ListingStore, NotifierStore},
};

use crate::{parse_reaction_data, TelegramMessenger};

#[derive(Clone)]
pub struct AppState {
    pub notifier: Arc<NotifierBot>,
    pub toggles: Arc<ReactionToggles>,
}

/// Button presses act as toggles: the first press by a user adds the
/// reaction, the next press by the same user removes it.
///
/// Entries expire with the reaction handlers: once the ttl has passed a
/// press counts as a fresh add again.
pub struct ReactionToggles {
    ttl: Duration,
    active: Mutex<HashMap<(MessageRef, UserId, String), Instant>>,
}

impl ReactionToggles {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true when this press adds the reaction.
    pub async fn toggle(&self, message: MessageRef, user: UserId, emoji: &str) -> bool {
        self.toggle_at(message, user, emoji, Instant::now()).await
    }

    async fn toggle_at(&self, message: MessageRef, user: UserId, emoji: &str, now: Instant) -> bool {
        let key = (message, user, emoji.to_string());
        let mut active = self.active.lock().await;
        active.retain(|_, pressed| now.saturating_duration_since(*pressed) < self.ttl);
        if active.remove(&key).is_some() {
            false
        } else {
            active.insert(key, now);
            true
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.active.lock().await.len()
    }
}

pub async fn run_polling<S>(
    cfg: Arc<Config>,
    plugins: Arc<PluginRegistry>,
    store: Arc<S>,
) -> anyhow::Result<()>
where
    S: ListingStore + NotifierStore + 'static,
{
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    let mut settings = BotSettings::from_config(&cfg);
    match bot.get_me().await {
        Ok(me) => {
            tracing::info!(username = %me.username(), "hyacinth started");
            settings.bot_username = Some(me.username().to_string());
            settings.bot_user_id = Some(user_id(&me.user));
        }
        Err(e) => tracing::warn!(error = %e, "get_me failed; mention commands disabled"),
    }
    tracing::info!(
        allowed_users = cfg.telegram_allowed_users.len(),
        plugins = plugins.loaded().len(),
        data_dir = %cfg.data_dir.display(),
        "configuration loaded"
    );

    // Wrap the raw Telegram messenger with a throttling decorator so a cycle with many
    // new listings does not trip flood limits. 429 RetryAfter is still retried below it.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let listings: Arc<dyn ListingStore> = store.clone();
    let notifier_store: Arc<dyn NotifierStore> = store;
    let notifier = NotifierBot::new(settings, messenger, plugins, listings, notifier_store).await?;
    let started = notifier.start().await;
    tracing::info!(notifiers = started, "polling saved notifiers");

    let state = Arc::new(AppState {
        notifier: notifier.clone(),
        toggles: Arc::new(ReactionToggles::new(cfg.reaction_handler_ttl)),
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::info!("dispatcher stopped; shutting down poll tasks");
    notifier.shutdown().await;
    Ok(())
}

fn user_id(user: &User) -> UserId {
    UserId(user.id.0 as i64)
}

fn message_ref(msg: &Message) -> MessageRef {
    MessageRef {
        channel_id: ChannelId(msg.chat.id.0),
        message_id: MessageId(msg.id.0),
    }
}

async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let (Some(text), Some(user)) = (msg.text(), msg.from()) else {
        return Ok(());
    };

    let event = InboundEvent::Message(ChatMessage {
        message: message_ref(&msg),
        author: user_id(user),
        author_name: user.username.clone(),
        text: text.to_string(),
    });
    dispatch_event(&state, event).await;
    Ok(())
}

async fn handle_callback(bot: Bot, q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let emoji = q.data.as_deref().and_then(parse_reaction_data);
    let (Some(msg), Some(emoji)) = (q.message.as_ref(), emoji) else {
        let _ = bot.answer_callback_query(q.id.clone()).await;
        return Ok(());
    };

    let message = message_ref(msg);
    let user = user_id(&q.from);
    let added = state.toggles.toggle(message, user, emoji).await;
    let ack = if added {
        format!("{emoji} added")
    } else {
        format!("{emoji} removed")
    };
    // Answer first so the client's spinner stops even if the handler is slow.
    if let Err(e) = bot.answer_callback_query(q.id.clone()).text(ack).await {
        tracing::debug!(error = %e, "answer_callback_query failed");
    }

    let ev = ReactionEvent {
        message,
        user,
        user_name: q.from.username.clone(),
        emoji: emoji.to_string(),
    };
    let event = if added {
        InboundEvent::ReactionAdded(ev)
    } else {
        InboundEvent::ReactionRemoved(ev)
    };
    dispatch_event(&state, event).await;
    Ok(())
}

async fn dispatch_event(state: &AppState, event: InboundEvent) {
    if let Err(e) = state.notifier.handle_event(event).await {
        if !e.is_cancelled() {
            tracing::warn!(error = %e, "event handling failed");
        }
    }
}
