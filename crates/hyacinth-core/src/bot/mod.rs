//! The notifier bot service: turns inbound chat events into commands,
//! conversation answers and reaction routing.
//!
//! Everything stateful (router, reaction registry, interactions, notifiers,
//! scheduler) lives on one [`NotifierBot`] instance built at startup.

mod commands;

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    dispatcher::NotificationDispatcher,
    domain::{ChannelId, MessageRef, UserId},
    formatting::code,
    interaction::{render, Answer, InteractionRegistry, Progress, Question},
    messaging::{
        port::MessagingPort,
        types::{ChatMessage, InboundEvent, ReactionAction, ReactionEvent},
    },
    plugins::PluginRegistry,
    reactions::ReactionRegistry,
    router::{CommandInvocation, CommandRouter},
    scheduler::{PollScheduler, PollSettings, SharedNotifiers},
    search::{Notifier, SearchSpec},
    security::is_authorized,
    store::{ListingStore, NotifierStore},
    Error, Result,
};

pub const AFFIRMATIONS: &[&str] = &["Okay", "Sure", "Sounds good", "No problem", "Roger that", "Got it"];
pub const THANKS: &[&str] = &[
    "Okay",
    "Sure",
    "Sounds good",
    "No problem",
    "Roger that",
    "Got it",
    "Thanks",
    "Thank you",
];

const INTERACTION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Clone, Debug)]
pub struct BotSettings {
    pub command_prefix: Option<String>,
    /// Username without the leading `@`; mentions of it mark a command.
    pub bot_username: Option<String>,
    pub bot_user_id: Option<UserId>,
    pub allowed_users: Vec<i64>,
    pub diagnostic_limit: usize,
    pub poll: PollSettings,
    pub reaction_ttl: Duration,
}

impl BotSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            command_prefix: cfg.command_prefix.clone(),
            bot_username: None,
            bot_user_id: None,
            allowed_users: cfg.telegram_allowed_users.clone(),
            diagnostic_limit: cfg.error_diagnostic_limit,
            poll: PollSettings {
                interval: cfg.poll_interval,
                stagger: cfg.poll_stagger,
            },
            reaction_ttl: cfg.reaction_handler_ttl,
        }
    }
}

/// What a finished conversation should produce.
#[derive(Clone, Debug)]
pub enum SetupPurpose {
    NewSearch { plugin_path: String },
}

pub struct NotifierBot {
    settings: BotSettings,
    chat: Arc<dyn MessagingPort>,
    plugins: Arc<PluginRegistry>,
    listings: Arc<dyn ListingStore>,
    notifier_store: Arc<dyn NotifierStore>,
    notifiers: SharedNotifiers,
    router: CommandRouter<NotifierBot>,
    reactions: Arc<ReactionRegistry>,
    interactions: InteractionRegistry<SetupPurpose>,
    dispatcher: Arc<NotificationDispatcher>,
    scheduler: PollScheduler,
    polling: AtomicBool,
    cancel: CancellationToken,
}

impl NotifierBot {
    pub async fn new(
        settings: BotSettings,
        chat: Arc<dyn MessagingPort>,
        plugins: Arc<PluginRegistry>,
        listings: Arc<dyn ListingStore>,
        notifier_store: Arc<dyn NotifierStore>,
    ) -> Result<Arc<Self>> {
        let mut loaded = BTreeMap::new();
        for notifier in notifier_store.load_notifiers().await? {
            for spec in &notifier.searches {
                if let Err(e) = plugins.resolve(&spec.plugin_path) {
                    tracing::warn!(
                        channel = notifier.channel.0,
                        search = %spec.describe(),
                        error = %e,
                        "saved search uses a plugin that is not loaded"
                    );
                }
            }
            loaded.insert(notifier.channel, notifier);
        }
        tracing::info!(count = loaded.len(), "loaded saved notifiers");

        let notifiers: SharedNotifiers = Arc::new(tokio::sync::Mutex::new(loaded));
        let reactions = Arc::new(ReactionRegistry::new(settings.reaction_ttl));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            plugins.clone(),
            listings.clone(),
            chat.clone(),
            reactions.clone(),
        ));
        let cancel = CancellationToken::new();
        let scheduler = PollScheduler::new(
            settings.poll,
            dispatcher.clone(),
            reactions.clone(),
            notifiers.clone(),
            cancel.clone(),
        );

        let mut router = CommandRouter::new(settings.diagnostic_limit);
        commands::register(&mut router)?;

        Ok(Arc::new(Self {
            settings,
            chat,
            plugins,
            listings,
            notifier_store,
            notifiers,
            router,
            reactions,
            interactions: InteractionRegistry::new(INTERACTION_TIMEOUT),
            dispatcher,
            scheduler,
            polling: AtomicBool::new(false),
            cancel,
        }))
    }

    /// Start polling every saved notifier.
    pub async fn start(&self) -> usize {
        self.polling.store(true, Ordering::SeqCst);
        self.scheduler.start_all().await
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.scheduler.shutdown().await;
    }

    pub fn command_patterns(&self) -> Vec<&str> {
        self.router.patterns()
    }

    pub async fn handle_event(self: &Arc<Self>, event: InboundEvent) -> Result<()> {
        match event {
            InboundEvent::Message(msg) => self.on_message(msg).await,
            InboundEvent::ReactionAdded(ev) => self.on_reaction(ReactionAction::Added, ev).await,
            InboundEvent::ReactionRemoved(ev) => self.on_reaction(ReactionAction::Removed, ev).await,
        }
    }

    async fn on_message(self: &Arc<Self>, msg: ChatMessage) -> Result<()> {
        if Some(msg.author) == self.settings.bot_user_id {
            return Ok(());
        }

        let Some(command) = self.extract_command(&msg.text) else {
            let progress = self
                .interactions
                .answer(msg.channel_id(), msg.author, Answer::Text(&msg.text))
                .await;
            return self.on_progress(msg.channel_id(), &msg.author_mention(), progress).await;
        };

        if !is_authorized(Some(msg.author), &self.settings.allowed_users) {
            tracing::warn!(user = msg.author.0, channel = msg.channel_id().0, "unauthorized command");
            self.chat
                .send_text(
                    msg.channel_id(),
                    &format!("Sorry {}, you are not allowed to use this bot.", msg.author_mention()),
                )
                .await?;
            return Ok(());
        }

        tracing::info!(channel = msg.channel_id().0, user = msg.author.0, %command, "received command");
        let invocation = CommandInvocation::new(msg, command);
        match self.router.route(self.clone(), invocation, self.chat.as_ref()).await {
            Ok(_) => Ok(()),
            // Already logged and apologized for.
            Err(Error::CommandHandler { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn on_reaction(self: &Arc<Self>, action: ReactionAction, ev: ReactionEvent) -> Result<()> {
        if Some(ev.user) == self.settings.bot_user_id {
            return Ok(());
        }

        if action == ReactionAction::Added {
            let progress = self
                .interactions
                .answer(
                    ev.message.channel_id,
                    ev.user,
                    Answer::Reaction {
                        message: ev.message,
                        emoji: &ev.emoji,
                    },
                )
                .await;
            if !matches!(progress, Progress::Ignored) {
                let mention = ev.user.mention(ev.user_name.as_deref());
                return self.on_progress(ev.message.channel_id, &mention, progress).await;
            }
        }

        if let Err(e) = self.reactions.on_reaction(action, &ev).await {
            tracing::warn!(
                channel = ev.message.channel_id.0,
                user = ev.user.0,
                error = %e,
                "reaction handler failed"
            );
        }
        Ok(())
    }

    /// Command text of a message, or `None` when it is not addressed to the bot.
    pub fn extract_command(&self, text: &str) -> Option<String> {
        let text = text.trim();

        // Telegram-style `/command@botname args`.
        if let Some(rest) = text.strip_prefix('/') {
            let (head, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let name = match head.split_once('@') {
                Some((name, target)) => {
                    let ours = self
                        .settings
                        .bot_username
                        .as_deref()
                        .is_some_and(|u| u.eq_ignore_ascii_case(target));
                    if !ours {
                        return None;
                    }
                    name
                }
                None => head,
            };
            if name.is_empty() {
                return None;
            }
            return Some(format!("{name} {}", tail.trim()).trim().to_string());
        }

        if let Some(username) = self.settings.bot_username.as_deref() {
            let mention = format!("@{username}");
            // ASCII lowercasing keeps byte offsets aligned with `text`.
            if let Some(pos) = text.to_ascii_lowercase().find(&mention.to_ascii_lowercase()) {
                let mut out = text.to_string();
                out.replace_range(pos..pos + mention.len(), "");
                return Some(out.trim().to_string());
            }
        }

        if let Some(prefix) = self.settings.command_prefix.as_deref() {
            if let Some(rest) = text.strip_prefix(prefix) {
                return Some(rest.trim().to_string());
            }
        }
        None
    }

    pub fn affirm(&self) -> &'static str {
        AFFIRMATIONS.choose(&mut rand::thread_rng()).copied().unwrap_or("Okay")
    }

    pub fn thank(&self) -> &'static str {
        THANKS.choose(&mut rand::thread_rng()).copied().unwrap_or("Thanks")
    }

    /// How users should type `command` given the configured prefix / mention.
    pub fn command_hint(&self, command: &str) -> String {
        match (&self.settings.command_prefix, &self.settings.bot_username) {
            (Some(prefix), _) => format!("{prefix}{command}"),
            (None, Some(user)) => format!("@{user} {command}"),
            (None, None) => command.to_string(),
        }
    }

    async fn reply(&self, inv: &CommandInvocation, text: &str) -> Result<MessageRef> {
        self.chat.send_text(inv.channel(), text).await
    }

    async fn send_missing_notifier(&self, inv: &CommandInvocation) -> Result<()> {
        let text = format!(
            "Sorry {}, you cannot use this command because there is not a notifier on this channel. \
             Try setting one up with {}.",
            inv.mention(),
            code(&self.command_hint("notify <plugin>"))
        );
        self.reply(inv, &text).await?;
        Ok(())
    }

    /// Copy of this channel's notifier, or the "no notifier" reply.
    async fn notifier_snapshot(&self, inv: &CommandInvocation) -> Result<Option<Notifier>> {
        let snapshot = self.notifiers.lock().await.get(&inv.channel()).cloned();
        if snapshot.is_none() {
            self.send_missing_notifier(inv).await?;
        }
        Ok(snapshot)
    }

    /// Apply `f` to this channel's notifier and persist it only if it changed.
    ///
    /// Returns `None` (after telling the user) when the channel has no notifier.
    async fn update_notifier<T>(
        &self,
        inv: &CommandInvocation,
        f: impl FnOnce(&mut Notifier) -> T,
    ) -> Result<Option<T>> {
        let mut map = self.notifiers.lock().await;
        if !map.contains_key(&inv.channel()) {
            drop(map);
            self.send_missing_notifier(inv).await?;
            return Ok(None);
        }
        let Some(notifier) = map.get_mut(&inv.channel()) else {
            return Ok(None);
        };

        let before = notifier.clone();
        let out = f(notifier);
        if *notifier != before {
            tracing::debug!(channel = inv.channel().0, "notifier changed; saving");
            if let Err(e) = self.notifier_store.save_notifier(notifier).await {
                *notifier = before;
                return Err(e);
            }
        }
        Ok(Some(out))
    }

    /// Add `spec` to the channel's notifier, creating the notifier if needed.
    /// Returns `Ok(false)` when the channel already has that search.
    async fn add_search(&self, channel: ChannelId, owner: UserId, spec: SearchSpec) -> Result<bool> {
        let created = {
            let mut map = self.notifiers.lock().await;
            let created = !map.contains_key(&channel);
            let mut updated = map
                .get(&channel)
                .cloned()
                .unwrap_or_else(|| Notifier::new(channel, owner));
            if updated.add_search(spec.clone()).is_err() {
                return Ok(false);
            }
            self.notifier_store.save_notifier(&updated).await?;
            map.insert(channel, updated);
            created
        };

        tracing::info!(channel = channel.0, search = %spec.describe(), created, "search added");
        if created && self.polling.load(Ordering::SeqCst) {
            self.scheduler.start(channel, Duration::ZERO).await;
        }
        Ok(true)
    }

    async fn remove_notifier(&self, channel: ChannelId) -> Result<bool> {
        {
            let mut map = self.notifiers.lock().await;
            let Some(previous) = map.remove(&channel) else {
                return Ok(false);
            };
            if let Err(e) = self.notifier_store.delete_notifier(channel).await {
                map.insert(channel, previous);
                return Err(e);
            }
        }
        self.scheduler.stop(channel).await;
        self.interactions.cancel(channel).await;
        tracing::info!(channel = channel.0, "notifier deleted");
        Ok(true)
    }

    /// Send a conversation prompt, with reactions when the question takes them.
    async fn ask(&self, channel: ChannelId, text: &str, question: &Question) -> Result<()> {
        if question.accepted_reactions.is_empty() {
            self.chat.send_text(channel, text).await?;
        } else {
            let emoji: Vec<&str> = question.accepted_reactions.iter().map(String::as_str).collect();
            let sent = self.chat.send_with_reactions(channel, text, &emoji).await?;
            self.interactions.set_prompt_message(channel, sent).await;
        }
        Ok(())
    }

    async fn on_progress(&self, channel: ChannelId, mention: &str, progress: Progress<SetupPurpose>) -> Result<()> {
        match progress {
            Progress::Ignored => Ok(()),
            Progress::Rejected { response } => {
                self.chat.send_text(channel, &render(&response, mention)).await?;
                Ok(())
            }
            Progress::Next(question) => {
                let text = format!("{} {mention}. {}", self.thank(), render(&question.prompt, mention));
                self.ask(channel, &text, &question).await
            }
            Progress::Cancelled => {
                self.chat
                    .send_text(channel, &format!("{}, never mind then.", self.affirm()))
                    .await?;
                Ok(())
            }
            Progress::Complete(done) => {
                let answers = done.answers().clone();
                match done.payload {
                    SetupPurpose::NewSearch { plugin_path } => {
                        commands::finish_guided_setup(self, done.channel, done.user, mention, &plugin_path, &answers)
                            .await
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dispatcher::BOOKMARK_EMOJI,
        listing::RawListing,
        matching::match_listings,
        plugins::PluginSettings,
        store::JsonStore,
        testing::{chat_message, reaction, FakeChat, ScriptedPlugin},
    };
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    const PATH: &str = "tests.plugins:Scripted";

    /// Notifier store that counts saves.
    struct CountingStore {
        inner: JsonStore,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl NotifierStore for CountingStore {
        async fn load_notifiers(&self) -> Result<Vec<Notifier>> {
            self.inner.load_notifiers().await
        }

        async fn save_notifier(&self, notifier: &Notifier) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save_notifier(notifier).await
        }

        async fn delete_notifier(&self, channel: ChannelId) -> Result<()> {
            self.inner.delete_notifier(channel).await
        }
    }

    struct Harness {
        bot: Arc<NotifierBot>,
        chat: Arc<FakeChat>,
        plugin: Arc<ScriptedPlugin>,
        store: Arc<CountingStore>,
        listings: Arc<JsonStore>,
    }

    impl Harness {
        async fn say(&self, user: i64, text: &str) {
            let msg = chat_message(1, 1000, user, text);
            self.bot.handle_event(InboundEvent::Message(msg)).await.unwrap();
        }

        async fn react(&self, message: MessageRef, user: i64, emoji: &str) {
            let ev = reaction(message, user, emoji);
            self.bot.handle_event(InboundEvent::ReactionAdded(ev)).await.unwrap();
        }

        fn saves(&self) -> usize {
            self.store.saves.load(Ordering::SeqCst)
        }
    }

    fn settings() -> BotSettings {
        BotSettings {
            command_prefix: Some("$".to_string()),
            bot_username: Some("hyacinth_bot".to_string()),
            bot_user_id: Some(UserId(999)),
            allowed_users: Vec::new(),
            diagnostic_limit: 1900,
            poll: PollSettings {
                interval: Duration::from_secs(3600),
                stagger: Duration::ZERO,
            },
            reaction_ttl: Duration::from_secs(60),
        }
    }

    async fn harness_with(settings: BotSettings) -> Harness {
        let plugin = Arc::new(ScriptedPlugin::new("scripted"));
        let plugins = PluginRegistry::builder()
            .register_instance(PATH, plugin.clone())
            .unwrap()
            .build(
                &PluginSettings {
                    scrape_timeout: Duration::from_secs(1),
                },
                &[PATH.to_string()],
            )
            .unwrap();
        let chat = Arc::new(FakeChat::default());
        let store = Arc::new(CountingStore {
            inner: JsonStore::in_memory(),
            saves: AtomicUsize::new(0),
        });
        let listings = Arc::new(JsonStore::in_memory());
        let bot = NotifierBot::new(
            settings,
            chat.clone(),
            Arc::new(plugins),
            listings.clone(),
            store.clone(),
        )
        .await
        .unwrap();
        Harness {
            bot,
            chat,
            plugin,
            store,
            listings,
        }
    }

    async fn harness() -> Harness {
        harness_with(settings()).await
    }

    #[tokio::test]
    async fn commands_are_extracted_from_prefix_mention_and_slash() {
        let h = harness().await;
        let bot = &h.bot;
        assert_eq!(bot.extract_command("$notify json_feed").as_deref(), Some("notify json_feed"));
        assert_eq!(bot.extract_command("hey @Hyacinth_Bot show").as_deref(), Some("hey  show"));
        assert_eq!(bot.extract_command("@hyacinth_bot show").as_deref(), Some("show"));
        assert_eq!(bot.extract_command("/show@hyacinth_bot").as_deref(), Some("show"));
        assert_eq!(bot.extract_command("/remove 2").as_deref(), Some("remove 2"));
        assert_eq!(bot.extract_command("/show@other_bot"), None);
        assert_eq!(bot.extract_command("just chatting"), None);
    }

    #[tokio::test]
    async fn commands_register_in_fixed_order() {
        let h = harness().await;
        let patterns = h.bot.command_patterns();
        assert_eq!(patterns[0], "(d|debug) poll");
        assert_eq!(patterns[1], "(d|debug) reactions");
        let hint = patterns.iter().position(|p| *p == r"notify\s*$").unwrap();
        let full = patterns.iter().position(|p| p.starts_with("notify (?P<plugin>")).unwrap();
        assert!(hint < full);
    }

    #[tokio::test]
    async fn notify_with_params_creates_and_lists_search() {
        let h = harness().await;
        h.say(1, "$notify scripted q=couch").await;
        assert!(h.chat.last_text().contains("I'll let this channel know about new listings for"));
        assert_eq!(h.saves(), 1);

        h.say(1, "$notify scripted q=couch").await;
        assert!(h.chat.last_text().contains("already has the search"));
        assert_eq!(h.saves(), 1);

        h.say(1, "$show").await;
        assert!(h.chat.last_text().contains("1. <code>Scripted: q=couch</code>"));
    }

    #[tokio::test]
    async fn commands_without_notifier_explain_setup() {
        let h = harness().await;
        for cmd in ["$show", "$pause", "$remove 1", "$stats", "$delete", "$d poll"] {
            h.say(1, cmd).await;
            assert_eq!(
                h.chat.last_text(),
                "Sorry @user1, you cannot use this command because there is not a notifier on this channel. \
                 Try setting one up with <code>$notify &lt;plugin&gt;</code>.",
                "{cmd}"
            );
        }
        assert_eq!(h.saves(), 0);
    }

    #[tokio::test]
    async fn unchanged_notifier_is_not_saved() {
        let h = harness().await;
        h.say(1, "$notify scripted q=couch").await;
        h.say(1, "$pause").await;
        assert!(h.chat.last_text().contains("paused notifications"));
        assert_eq!(h.saves(), 2);

        h.say(1, "$stop").await;
        assert_eq!(h.chat.last_text(), "Notifications on this channel are already paused.");
        assert_eq!(h.saves(), 2);

        h.say(1, "$remove 5").await;
        assert_eq!(h.chat.last_text(), "Sorry @user1, there is no search #5.");
        assert_eq!(h.saves(), 2);

        h.say(1, "$remove 1").await;
        assert!(h.chat.last_text().contains("removed search #1"));
        assert_eq!(h.saves(), 3);
    }

    #[tokio::test]
    async fn remove_echoes_an_index_too_large_to_parse() {
        let h = harness().await;
        h.say(1, "$notify scripted q=couch").await;
        h.say(1, "$remove 99999999999999999999999").await;
        assert_eq!(
            h.chat.last_text(),
            "Sorry @user1, there is no search #99999999999999999999999."
        );
        assert_eq!(h.saves(), 1);
    }

    #[tokio::test]
    async fn saved_list_is_bounded_by_message_limit() {
        let h = harness().await;
        let spec = SearchSpec::new(PATH, [("q".to_string(), "couch".to_string())].into()).unwrap();
        let raw = (0..300)
            .map(|i| {
                RawListing::new(i.to_string(), format!("Listing {i} {}", "x".repeat(200)))
                    .with_url(format!("https://example.com/{i}"))
            })
            .collect();
        let listings = match_listings(ChannelId(1), &spec, raw, &mut Default::default()).novel;
        for l in &listings {
            h.listings.record_listing(l).await.unwrap();
            h.listings.set_bookmark(&l.key(), UserId(5), true).await.unwrap();
        }

        h.say(5, "$saved").await;
        let text = h.chat.last_text();
        assert!(text.chars().count() <= 4096);
        assert!(text.starts_with("<b>Saved listings (300)</b>"));
        assert!(text.contains("Listing 299 "));
        assert!(text.contains("older listings not shown."));
    }

    #[tokio::test]
    async fn unknown_plugin_and_missing_plugin_are_explained() {
        let h = harness().await;
        h.say(1, "$notify nope q=1").await;
        assert!(h.chat.last_text().contains("I don't know a plugin called <code>nope</code>"));
        h.say(1, "$notify").await;
        assert!(h.chat.last_text().contains("you need to tell me which plugin to use"));
        h.say(1, "$notify scripted q=").await;
        assert_eq!(h.saves(), 0);
    }

    #[tokio::test]
    async fn guided_setup_collects_criteria_then_confirmation() {
        let h = harness().await;
        h.say(1, "$notify scripted").await;
        assert!(h.chat.last_text().contains("what should I search for"));

        h.say(1, "not a pair").await;
        assert!(h.chat.last_text().starts_with("Sorry @user1, I couldn't use that."));

        // Someone else's chatter does not answer the question.
        let before = h.chat.sent().len();
        h.say(2, "q=desk").await;
        assert_eq!(h.chat.sent().len(), before);

        h.say(1, "q=couch").await;
        let prompt = h.chat.sent().pop().unwrap();
        assert_eq!(prompt.reactions, vec!["✅", "❌"]);

        h.react(prompt.message, 2, "✅").await;
        assert_eq!(h.chat.sent().len(), before + 1);

        h.react(prompt.message, 1, "✅").await;
        assert!(h.chat.last_text().contains("Scripted: q=couch"));
        let notifiers = h.store.load_notifiers().await.unwrap();
        assert_eq!(notifiers[0].searches[0].criteria["q"], "couch");
    }

    #[tokio::test]
    async fn delete_needs_requesters_confirmation() {
        let h = harness().await;
        h.say(1, "$notify scripted q=couch").await;
        h.say(1, "$delete").await;
        let prompt = h.chat.sent().pop().unwrap();
        assert_eq!(prompt.reactions, vec!["✅", "❌"]);

        h.react(prompt.message, 2, "✅").await;
        assert_eq!(h.store.load_notifiers().await.unwrap().len(), 1);

        h.react(prompt.message, 1, "✅").await;
        assert!(h.chat.last_text().contains("I deleted the notifier on this channel."));
        assert!(h.store.load_notifiers().await.unwrap().is_empty());
        assert_eq!(h.bot.reactions.len().await, 0);
    }

    #[tokio::test]
    async fn debug_poll_sends_listings_and_star_saves_them() {
        let h = harness().await;
        h.say(1, "$notify scripted q=couch").await;
        h.plugin
            .push_ok(vec![RawListing::new("123", "Couch").with_price(100.0)]);

        h.say(1, "$debug poll").await;
        let summary = h.chat.last_text();
        assert!(summary.starts_with("Polled 1 searches."));
        assert!(summary.contains("new 1, sent 1"));

        let listing_msg = h
            .chat
            .sent()
            .into_iter()
            .find(|s| s.reactions == vec![BOOKMARK_EMOJI])
            .unwrap();
        assert!(listing_msg.text.contains("Couch"));

        h.react(listing_msg.message, 5, BOOKMARK_EMOJI).await;
        h.say(5, "$saved").await;
        assert!(h.chat.last_text().contains("Couch ($100)"));
        h.say(6, "$saved").await;
        assert!(h.chat.last_text().contains("you haven't saved any listings yet"));

        h.say(1, "$stats").await;
        assert!(h.chat.last_text().contains("Total: 1"));
    }

    #[tokio::test]
    async fn own_messages_are_ignored_and_allow_list_enforced() {
        let h = harness().await;
        h.say(999, "$help").await;
        assert!(h.chat.sent().is_empty());

        h.say(1, "@hyacinth_bot help").await;
        assert!(h.chat.last_text().contains("Hyacinth commands"));

        let mut restricted = settings();
        restricted.allowed_users = vec![1];
        let h = harness_with(restricted).await;
        h.say(2, "$help").await;
        assert_eq!(h.chat.last_text(), "Sorry @user2, you are not allowed to use this bot.");
    }
}
