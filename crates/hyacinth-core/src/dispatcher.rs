//! One poll cycle per search: fetch, match, notify.
//!
//! Per search spec the cycle walks `Idle → Fetching → Matching → Notifying →
//! Idle`; any failure ends it in `Failed`, leaves the spec active and is
//! retried on the next tick. Nothing here ever reports a failure to chat.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::ChannelId,
    formatting::format_listing,
    listing::Listing,
    matching::match_listings,
    messaging::{
        port::MessagingPort,
        types::{ReactionAction, ReactionEvent},
    },
    plugins::PluginRegistry,
    reactions::{HandlerFuture, HandlerOutcome, ReactionRegistry},
    search::{LedgerKey, Notifier, SearchSpec},
    store::ListingStore,
    Error, Result,
};

/// Reaction that stars a listing for the reacting user.
pub const BOOKMARK_EMOJI: &str = "⭐";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Fetching,
    Matching,
    Notifying,
    Failed,
}

#[derive(Clone, Debug)]
pub struct CycleReport {
    pub ledger: LedgerKey,
    pub state: CycleState,
    pub fetched: usize,
    pub novel: usize,
    pub sent: usize,
    pub send_failures: usize,
    pub skipped_malformed: usize,
    /// Stopped between listings by shutdown.
    pub cancelled: bool,
    pub error: Option<String>,
}

impl CycleReport {
    fn new(ledger: LedgerKey) -> Self {
        Self {
            ledger,
            state: CycleState::Idle,
            fetched: 0,
            novel: 0,
            sent: 0,
            send_failures: 0,
            skipped_malformed: 0,
            cancelled: false,
            error: None,
        }
    }

    fn fail(mut self, e: &Error) -> Self {
        self.state = CycleState::Failed;
        self.error = Some(e.to_string());
        self
    }
}

/// One lock per channel's search, so a manual poll and a scheduled one never
/// notify the same listing twice.
#[derive(Default)]
struct SearchLocks {
    inner: Mutex<HashMap<LedgerKey, Arc<Mutex<()>>>>,
}

impl SearchLocks {
    async fn lock_search(&self, key: &LedgerKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct NotificationDispatcher {
    plugins: Arc<PluginRegistry>,
    listings: Arc<dyn ListingStore>,
    chat: Arc<dyn MessagingPort>,
    reactions: Arc<ReactionRegistry>,
    search_locks: SearchLocks,
}

impl NotificationDispatcher {
    pub fn new(
        plugins: Arc<PluginRegistry>,
        listings: Arc<dyn ListingStore>,
        chat: Arc<dyn MessagingPort>,
        reactions: Arc<ReactionRegistry>,
    ) -> Self {
        Self {
            plugins,
            listings,
            chat,
            reactions,
            search_locks: SearchLocks::default(),
        }
    }

    /// Run every search of `notifier` once. Paused notifiers yield no reports.
    pub async fn run_notifier(&self, notifier: &Notifier, cancel: &CancellationToken) -> Vec<CycleReport> {
        if notifier.paused {
            tracing::debug!(channel = notifier.channel.0, "notifier paused; skipping poll");
            return Vec::new();
        }

        let mut reports = Vec::with_capacity(notifier.searches.len());
        for spec in &notifier.searches {
            if cancel.is_cancelled() {
                break;
            }
            reports.push(self.run_search(notifier.channel, spec, cancel).await);
        }
        reports
    }

    /// One cycle for one search spec. Never returns an error: failures are
    /// contained in the report.
    pub async fn run_search(
        &self,
        channel: ChannelId,
        spec: &SearchSpec,
        cancel: &CancellationToken,
    ) -> CycleReport {
        let key = LedgerKey::new(channel, spec);
        let _cycle = self.search_locks.lock_search(&key).await;
        let mut report = CycleReport::new(key.clone());

        report.state = CycleState::Fetching;
        let raw = match self.fetch(spec).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    channel = channel.0,
                    search = %key.search.short(),
                    plugin = %spec.plugin_path,
                    error = %e,
                    "scrape failed"
                );
                return report.fail(&e);
            }
        };
        report.fetched = raw.len();

        report.state = CycleState::Matching;
        let mut seen = match self.listings.seen_ids(&key).await {
            Ok(seen) => seen,
            Err(e) => {
                tracing::error!(channel = channel.0, search = %key.search.short(), error = %e, "failed to load seen ids");
                return report.fail(&e);
            }
        };
        let outcome = match_listings(channel, spec, raw, &mut seen);
        for skipped in &outcome.skipped {
            tracing::warn!(
                search = %key.search.short(),
                plugin = %spec.plugin_path,
                error = %skipped.to_error(),
                "skipping malformed listing"
            );
        }
        report.skipped_malformed = outcome.skipped.len();
        report.novel = outcome.novel.len();

        report.state = CycleState::Notifying;
        for listing in &outcome.novel {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.notify(channel, spec, listing).await {
                Ok(true) => report.sent += 1,
                Ok(false) => report.send_failures += 1,
                Err(e) => {
                    tracing::error!(
                        channel = channel.0,
                        search = %key.search.short(),
                        listing = %listing.source_id,
                        error = %e,
                        "failed to record listing; aborting cycle"
                    );
                    return report.fail(&e);
                }
            }
        }

        report.state = CycleState::Idle;
        tracing::info!(
            channel = channel.0,
            search = %key.search.short(),
            fetched = report.fetched,
            novel = report.novel,
            sent = report.sent,
            send_failures = report.send_failures,
            skipped = report.skipped_malformed,
            "poll cycle finished"
        );
        report
    }

    async fn fetch(&self, spec: &SearchSpec) -> Result<Vec<crate::listing::RawListing>> {
        let plugin = self.plugins.resolve(&spec.plugin_path)?;
        plugin.scrape(&spec.criteria).await
    }

    /// Send, then record. `Ok(false)` means the send failed and the listing
    /// stays unrecorded for the next cycle; `Err` is a persistence failure.
    async fn notify(&self, channel: ChannelId, spec: &SearchSpec, listing: &Listing) -> Result<bool> {
        let text = format_listing(listing, spec);
        let sent = match self
            .chat
            .send_with_reactions(channel, &text, &[BOOKMARK_EMOJI])
            .await
        {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(
                    channel = channel.0,
                    listing = %listing.source_id,
                    error = %e,
                    "failed to send listing; will retry next cycle"
                );
                return Ok(false);
            }
        };

        if !self.listings.record_listing(listing).await? {
            tracing::warn!(listing = %listing.source_id, "listing was already recorded");
        }

        let handler = bookmark_handler(self.listings.clone(), listing);
        if let Err(e) = self.reactions.bind(sent, handler).await {
            tracing::error!(error = %e, "bookmark handler not bound");
            debug_assert!(!matches!(e, Error::DuplicateBinding(_)), "{e}");
        }
        Ok(true)
    }
}

/// ⭐ added stars the listing for the reactor, removed unstars it.
fn bookmark_handler(
    store: Arc<dyn ListingStore>,
    listing: &Listing,
) -> impl Fn(ReactionAction, ReactionEvent) -> HandlerFuture + Send + Sync + 'static {
    let key = listing.key();
    move |action: ReactionAction, event: ReactionEvent| -> HandlerFuture {
        let store = store.clone();
        let key = key.clone();
        Box::pin(async move {
            if event.emoji != BOOKMARK_EMOJI {
                return Ok(HandlerOutcome::Keep);
            }
            let on = action == ReactionAction::Added;
            if store.set_bookmark(&key, event.user, on).await? {
                tracing::info!(user = event.user.0, listing = %key.source_id, on, "bookmark changed");
            }
            Ok(HandlerOutcome::Keep)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::UserId,
        listing::RawListing,
        plugins::PluginSettings,
        store::JsonStore,
        testing::{reaction, FakeChat, ScriptedPlugin},
    };
    use std::{collections::BTreeMap, time::Duration};

    const PATH: &str = "tests.plugins:Scripted";

    struct Harness {
        plugin: Arc<ScriptedPlugin>,
        store: Arc<JsonStore>,
        chat: Arc<FakeChat>,
        reactions: Arc<ReactionRegistry>,
        dispatcher: NotificationDispatcher,
    }

    fn harness() -> Harness {
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
        let store = Arc::new(JsonStore::in_memory());
        let chat = Arc::new(FakeChat::default());
        let reactions = Arc::new(ReactionRegistry::new(Duration::from_secs(60)));
        let dispatcher = NotificationDispatcher::new(
            Arc::new(plugins),
            store.clone(),
            chat.clone(),
            reactions.clone(),
        );
        Harness {
            plugin,
            store,
            chat,
            reactions,
            dispatcher,
        }
    }

    fn couch() -> SearchSpec {
        let mut criteria = BTreeMap::new();
        criteria.insert("q".to_string(), "couch".to_string());
        criteria.insert("max_price".to_string(), "200".to_string());
        SearchSpec::new(PATH, criteria).unwrap()
    }

    #[tokio::test]
    async fn couch_listing_is_sent_once() {
        let h = harness();
        let spec = couch();
        let cancel = CancellationToken::new();
        let raw = vec![RawListing::new("123", "Couch").with_price(100.0)];
        h.plugin.push_ok(raw.clone());
        h.plugin.push_ok(raw);

        let first = h.dispatcher.run_search(ChannelId(1), &spec, &cancel).await;
        assert_eq!(first.state, CycleState::Idle);
        assert_eq!((first.fetched, first.novel, first.sent), (1, 1, 1));
        assert_eq!(h.chat.sent().len(), 1);
        assert!(h.chat.last_text().contains("Couch"));
        assert_eq!(h.chat.sent()[0].reactions, vec![BOOKMARK_EMOJI]);
        let seen = h.store.seen_ids(&LedgerKey::new(ChannelId(1), &spec)).await.unwrap();
        assert_eq!(seen, ["123".to_string()].into_iter().collect());

        let second = h.dispatcher.run_search(ChannelId(1), &spec, &cancel).await;
        assert_eq!((second.fetched, second.novel, second.sent), (1, 0, 0));
        assert_eq!(h.chat.sent().len(), 1);
    }

    #[tokio::test]
    async fn same_search_in_two_channels_notifies_both() {
        let h = harness();
        let spec = couch();
        let cancel = CancellationToken::new();
        let raw = vec![RawListing::new("123", "Couch").with_price(100.0)];
        h.plugin.push_ok(raw.clone());
        h.plugin.push_ok(raw.clone());
        h.plugin.push_ok(raw);

        let first = h.dispatcher.run_search(ChannelId(1), &spec, &cancel).await;
        let second = h.dispatcher.run_search(ChannelId(2), &spec, &cancel).await;
        assert_eq!((first.novel, first.sent), (1, 1));
        assert_eq!((second.novel, second.sent), (1, 1));
        let channels: Vec<ChannelId> = h.chat.sent().iter().map(|s| s.message.channel_id).collect();
        assert_eq!(channels, vec![ChannelId(1), ChannelId(2)]);

        let again = h.dispatcher.run_search(ChannelId(2), &spec, &cancel).await;
        assert_eq!((again.novel, again.sent), (0, 0));
        assert_eq!(h.chat.sent().len(), 2);
    }

    #[tokio::test]
    async fn failed_scrape_leaves_ledger_untouched() {
        let h = harness();
        let spec = couch();
        h.plugin.push_err("connection reset");

        let report = h
            .dispatcher
            .run_search(ChannelId(1), &spec, &CancellationToken::new())
            .await;
        assert_eq!(report.state, CycleState::Failed);
        assert!(report.error.unwrap().contains("connection reset"));
        assert!(h.store.seen_ids(&LedgerKey::new(ChannelId(1), &spec)).await.unwrap().is_empty());
        assert!(h.chat.sent().is_empty());
    }

    #[tokio::test]
    async fn unknown_plugin_fails_the_cycle_only() {
        let h = harness();
        let spec = SearchSpec::new("tests.plugins:Missing", BTreeMap::new()).unwrap();
        let report = h
            .dispatcher
            .run_search(ChannelId(1), &spec, &CancellationToken::new())
            .await;
        assert_eq!(report.state, CycleState::Failed);
        assert_eq!(h.plugin.calls(), 0);
    }

    #[tokio::test]
    async fn failed_send_is_retried_next_cycle() {
        let h = harness();
        let spec = couch();
        let cancel = CancellationToken::new();
        let raw = vec![RawListing::new("1", "One"), RawListing::new("2", "Two")];
        h.plugin.push_ok(raw.clone());
        h.plugin.push_ok(raw);

        h.chat.set_failing(true);
        let first = h.dispatcher.run_search(ChannelId(1), &spec, &cancel).await;
        assert_eq!(first.state, CycleState::Idle);
        assert_eq!((first.novel, first.sent, first.send_failures), (2, 0, 2));
        assert!(h.store.seen_ids(&LedgerKey::new(ChannelId(1), &spec)).await.unwrap().is_empty());

        h.chat.set_failing(false);
        let second = h.dispatcher.run_search(ChannelId(1), &spec, &cancel).await;
        assert_eq!((second.novel, second.sent), (2, 2));
        let texts = h.chat.texts();
        assert!(texts[0].contains("One") && texts[1].contains("Two"));
    }

    #[tokio::test]
    async fn malformed_items_are_counted_not_fatal() {
        let h = harness();
        let spec = couch();
        let mut bad = RawListing::new("x", "No id");
        bad.source_id = None;
        h.plugin
            .push_ok(vec![RawListing::new("1", "One"), bad, RawListing::new("3", "Three")]);

        let report = h
            .dispatcher
            .run_search(ChannelId(1), &spec, &CancellationToken::new())
            .await;
        assert_eq!((report.novel, report.sent, report.skipped_malformed), (2, 2, 1));
    }

    #[tokio::test]
    async fn cancellation_stops_between_listings() {
        let h = harness();
        let spec = couch();
        h.plugin.push_ok(vec![RawListing::new("1", "One")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = h.dispatcher.run_search(ChannelId(1), &spec, &cancel).await;
        assert!(report.cancelled);
        assert_eq!(report.sent, 0);
        assert!(h.store.seen_ids(&LedgerKey::new(ChannelId(1), &spec)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn paused_notifier_is_skipped() {
        let h = harness();
        let mut n = Notifier::new(ChannelId(1), UserId(1));
        n.add_search(couch()).unwrap();
        n.paused = true;
        h.plugin.push_ok(vec![RawListing::new("1", "One")]);

        let reports = h.dispatcher.run_notifier(&n, &CancellationToken::new()).await;
        assert!(reports.is_empty());
        assert_eq!(h.plugin.calls(), 0);
    }

    #[tokio::test]
    async fn star_reaction_bookmarks_the_listing() {
        let h = harness();
        let spec = couch();
        h.plugin.push_ok(vec![RawListing::new("9", "Lamp")]);
        h.dispatcher
            .run_search(ChannelId(1), &spec, &CancellationToken::new())
            .await;
        let sent = h.chat.sent()[0].message;

        h.reactions
            .on_reaction(ReactionAction::Added, &reaction(sent, 5, BOOKMARK_EMOJI))
            .await
            .unwrap();
        h.reactions
            .on_reaction(ReactionAction::Added, &reaction(sent, 6, "👍"))
            .await
            .unwrap();
        let saved = h.store.bookmarks(UserId(5)).await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].title, "Lamp");
        assert!(h.store.bookmarks(UserId(6)).await.unwrap().is_empty());

        h.reactions
            .on_reaction(ReactionAction::Removed, &reaction(sent, 5, BOOKMARK_EMOJI))
            .await
            .unwrap();
        assert!(h.store.bookmarks(UserId(5)).await.unwrap().is_empty());
    }
}
