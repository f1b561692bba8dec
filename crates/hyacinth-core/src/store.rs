//! Persistence ports and the JSON ledger that implements them.
//!
//! The dedup ledger is scoped per [`LedgerKey`] (channel plus search): every
//! channel's search has its own lock and its own file, so concurrent poll
//! cycles never contend or overwrite each other, and two channels running the
//! same search are each notified.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    domain::{ChannelId, UserId},
    listing::{Listing, ListingKey},
    search::{LedgerKey, Notifier},
    Error, Result,
};

/// Dedup ledger: which listings have been notified for which channel's search.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn seen_ids(&self, ledger: &LedgerKey) -> Result<HashSet<String>>;

    /// Record the listing and mark its id seen as one unit.
    ///
    /// Returns `Ok(false)` without writing if the pair is already recorded.
    async fn record_listing(&self, listing: &Listing) -> Result<bool>;

    async fn listing_count(&self, ledger: &LedgerKey) -> Result<usize>;

    async fn get_listing(&self, key: &ListingKey) -> Result<Option<Listing>>;

    /// Star or unstar a listing for `user`. Returns whether anything changed.
    async fn set_bookmark(&self, key: &ListingKey, user: UserId, on: bool) -> Result<bool>;

    async fn bookmarks(&self, user: UserId) -> Result<Vec<Listing>>;
}

#[async_trait]
pub trait NotifierStore: Send + Sync {
    async fn load_notifiers(&self) -> Result<Vec<Notifier>>;
    async fn save_notifier(&self, notifier: &Notifier) -> Result<()>;
    async fn delete_notifier(&self, channel: ChannelId) -> Result<()>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Ledger {
    listings: Vec<Listing>,
    #[serde(default)]
    bookmarks: BTreeMap<String, BTreeSet<UserId>>,
    #[serde(skip)]
    seen: HashSet<String>,
}

impl Ledger {
    fn reindex(&mut self) {
        self.seen = self.listings.iter().map(|l| l.source_id.clone()).collect();
    }
}

/// JSON-file store. With no root directory it is purely in memory.
///
/// Layout under the root: `notifiers.json` and `ledger/<channel>_<search_key>.json`.
/// Each write goes to a temp file that is renamed over the target.
pub struct JsonStore {
    root: Option<PathBuf>,
    ledgers: Mutex<HashMap<LedgerKey, Arc<Mutex<Ledger>>>>,
    notifiers: Mutex<BTreeMap<ChannelId, Notifier>>,
}

impl JsonStore {
    pub fn in_memory() -> Self {
        Self {
            root: None,
            ledgers: Mutex::new(HashMap::new()),
            notifiers: Mutex::new(BTreeMap::new()),
        }
    }

    /// Open (creating if needed) a store rooted at `root` and load everything in it.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let ledger_dir = root.join("ledger");
        tokio::fs::create_dir_all(&ledger_dir)
            .await
            .map_err(|e| persistence(&ledger_dir, e))?;

        let notifiers_path = root.join("notifiers.json");
        let notifiers: Vec<Notifier> = match tokio::fs::read_to_string(&notifiers_path).await {
            Ok(txt) if !txt.trim().is_empty() => serde_json::from_str(&txt)
                .map_err(|e| persistence(&notifiers_path, e))?,
            Ok(_) => Vec::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(persistence(&notifiers_path, e)),
        };

        let mut ledgers = HashMap::new();
        let mut rd = tokio::fs::read_dir(&ledger_dir)
            .await
            .map_err(|e| persistence(&ledger_dir, e))?;
        while let Some(ent) = rd
            .next_entry()
            .await
            .map_err(|e| persistence(&ledger_dir, e))?
        {
            let path = ent.path();
            let Some(stem) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            let Some(key) = LedgerKey::from_file_stem(stem) else {
                tracing::warn!(path = %path.display(), "ignoring ledger file with unrecognized name");
                continue;
            };
            let txt = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| persistence(&path, e))?;
            let mut ledger: Ledger =
                serde_json::from_str(&txt).map_err(|e| persistence(&path, e))?;
            ledger.reindex();
            ledgers.insert(key, Arc::new(Mutex::new(ledger)));
        }

        tracing::info!(
            root = %root.display(),
            notifiers = notifiers.len(),
            ledgers = ledgers.len(),
            "store opened"
        );

        Ok(Self {
            root: Some(root),
            ledgers: Mutex::new(ledgers),
            notifiers: Mutex::new(notifiers.into_iter().map(|n| (n.channel, n)).collect()),
        })
    }

    async fn ledger_for(&self, key: &LedgerKey) -> Arc<Mutex<Ledger>> {
        let mut map = self.ledgers.lock().await;
        map.entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Ledger::default())))
            .clone()
    }

    async fn existing_ledger(&self, key: &LedgerKey) -> Option<Arc<Mutex<Ledger>>> {
        self.ledgers.lock().await.get(key).cloned()
    }

    async fn persist_ledger(&self, key: &LedgerKey, ledger: &Ledger) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let path = root.join("ledger").join(format!("{}.json", key.file_stem()));
        write_atomic(&path, &serde_json::to_string(ledger)?).await
    }

    async fn persist_notifiers(&self, notifiers: &BTreeMap<ChannelId, Notifier>) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let all = notifiers.values().collect::<Vec<_>>();
        write_atomic(&root.join("notifiers.json"), &serde_json::to_string(&all)?).await
    }
}

#[async_trait]
impl ListingStore for JsonStore {
    async fn seen_ids(&self, key: &LedgerKey) -> Result<HashSet<String>> {
        let Some(ledger) = self.existing_ledger(key).await else {
            return Ok(HashSet::new());
        };
        let guard = ledger.lock().await;
        Ok(guard.seen.clone())
    }

    async fn record_listing(&self, listing: &Listing) -> Result<bool> {
        let ledger = self.ledger_for(&listing.ledger).await;
        let mut guard = ledger.lock().await;
        if guard.seen.contains(&listing.source_id) {
            return Ok(false);
        }

        guard.listings.push(listing.clone());
        guard.seen.insert(listing.source_id.clone());
        if let Err(e) = self.persist_ledger(&listing.ledger, &guard).await {
            // Roll back so memory never claims more than disk.
            guard.listings.pop();
            guard.seen.remove(&listing.source_id);
            return Err(e);
        }
        Ok(true)
    }

    async fn listing_count(&self, key: &LedgerKey) -> Result<usize> {
        let Some(ledger) = self.existing_ledger(key).await else {
            return Ok(0);
        };
        let guard = ledger.lock().await;
        Ok(guard.listings.len())
    }

    async fn get_listing(&self, key: &ListingKey) -> Result<Option<Listing>> {
        let Some(ledger) = self.existing_ledger(&key.ledger).await else {
            return Ok(None);
        };
        let guard = ledger.lock().await;
        Ok(guard
            .listings
            .iter()
            .find(|l| l.source_id == key.source_id)
            .cloned())
    }

    async fn set_bookmark(&self, key: &ListingKey, user: UserId, on: bool) -> Result<bool> {
        let Some(ledger) = self.existing_ledger(&key.ledger).await else {
            return Ok(false);
        };
        let mut guard = ledger.lock().await;
        if !guard.seen.contains(&key.source_id) {
            return Ok(false);
        }

        let before = guard.clone();
        let changed = if on {
            guard
                .bookmarks
                .entry(key.source_id.clone())
                .or_default()
                .insert(user)
        } else {
            let removed = guard
                .bookmarks
                .get_mut(&key.source_id)
                .map(|users| users.remove(&user))
                .unwrap_or(false);
            if guard
                .bookmarks
                .get(&key.source_id)
                .is_some_and(|users| users.is_empty())
            {
                guard.bookmarks.remove(&key.source_id);
            }
            removed
        };

        if changed {
            if let Err(e) = self.persist_ledger(&key.ledger, &guard).await {
                *guard = before;
                return Err(e);
            }
        }
        Ok(changed)
    }

    async fn bookmarks(&self, user: UserId) -> Result<Vec<Listing>> {
        let ledgers = self.ledgers.lock().await.values().cloned().collect::<Vec<_>>();
        let mut out = Vec::new();
        for ledger in ledgers {
            let guard = ledger.lock().await;
            for listing in &guard.listings {
                if guard
                    .bookmarks
                    .get(&listing.source_id)
                    .is_some_and(|users| users.contains(&user))
                {
                    out.push(listing.clone());
                }
            }
        }
        out.sort_by(|a, b| a.matched_at.cmp(&b.matched_at));
        Ok(out)
    }
}

#[async_trait]
impl NotifierStore for JsonStore {
    async fn load_notifiers(&self) -> Result<Vec<Notifier>> {
        Ok(self.notifiers.lock().await.values().cloned().collect())
    }

    async fn save_notifier(&self, notifier: &Notifier) -> Result<()> {
        let mut map = self.notifiers.lock().await;
        let previous = map.insert(notifier.channel, notifier.clone());
        if let Err(e) = self.persist_notifiers(&map).await {
            match previous {
                Some(p) => map.insert(notifier.channel, p),
                None => map.remove(&notifier.channel),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn delete_notifier(&self, channel: ChannelId) -> Result<()> {
        let mut map = self.notifiers.lock().await;
        let Some(previous) = map.remove(&channel) else {
            return Ok(());
        };
        if let Err(e) = self.persist_notifiers(&map).await {
            map.insert(channel, previous);
            return Err(e);
        }
        Ok(())
    }
}

async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| persistence(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| persistence(path, e))
}

fn persistence(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Persistence(format!("{}: {e}", path.display()))
}
