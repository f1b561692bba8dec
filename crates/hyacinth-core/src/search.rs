//! Search specifications and the notifiers that own them.

use std::{collections::BTreeMap, fmt, sync::OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    domain::{ChannelId, UserId},
    Error, Result,
};

/// Filter criteria plus the plugin that evaluates them.
///
/// Persisted as `{ "criteria": {...}, "plugin_path": "<namespace>:<symbol>" }`.
/// Records in an older schema (e.g. keyed by `source`) are rejected rather
/// than guessed at; they must be migrated out of band.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchSpec {
    pub criteria: BTreeMap<String, String>,
    pub plugin_path: String,
}

/// Stable identity of a [`SearchSpec`]: hex SHA-256 of its canonical JSON.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SearchKey(pub String);

impl fmt::Display for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl SearchKey {
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

/// Dedup scope: one search as run for one channel.
///
/// Two channels with an identical search keep separate ledgers, so each is
/// told about every listing.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LedgerKey {
    pub channel: ChannelId,
    pub search: SearchKey,
}

impl LedgerKey {
    pub fn new(channel: ChannelId, spec: &SearchSpec) -> Self {
        Self {
            channel,
            search: spec.key(),
        }
    }

    /// `<channel>_<search_key>`; channel ids may be negative, search keys are hex.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.channel.0, self.search)
    }

    pub fn from_file_stem(stem: &str) -> Option<Self> {
        let (channel, search) = stem.rsplit_once('_')?;
        if search.is_empty() || !search.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self {
            channel: ChannelId(channel.parse().ok()?),
            search: SearchKey(search.to_string()),
        })
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel.0, self.search.short())
    }
}

impl SearchSpec {
    pub fn new(plugin_path: impl Into<String>, criteria: BTreeMap<String, String>) -> Result<Self> {
        let spec = Self {
            criteria,
            plugin_path: plugin_path.into(),
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Structural validation only; criteria semantics belong to the plugin.
    pub fn validate(&self) -> Result<()> {
        for (k, v) in &self.criteria {
            if !criteria_key_re().is_match(k) {
                return Err(Error::Config(format!("invalid criteria key: {k:?}")));
            }
            if v.trim().is_empty() {
                return Err(Error::Config(format!("criteria {k} has an empty value")));
            }
        }
        Ok(())
    }

    pub fn key(&self) -> SearchKey {
        // BTreeMap keeps criteria sorted, so the JSON form is canonical.
        let canonical = serde_json::json!({
            "criteria": self.criteria,
            "plugin_path": self.plugin_path,
        })
        .to_string();

        let mut h = Sha256::new();
        h.update(canonical.as_bytes());
        SearchKey(to_hex(&h.finalize()))
    }

    /// One-line human description, e.g. `json_feed: url=https://…`.
    pub fn describe(&self) -> String {
        let symbol = self
            .plugin_path
            .rsplit_once(':')
            .map(|(_, s)| s)
            .unwrap_or(&self.plugin_path);
        if self.criteria.is_empty() {
            return format!("{symbol} (no criteria)");
        }
        let params = self
            .criteria
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        format!("{symbol}: {params}")
    }
}

/// A channel's collection of active searches and the delivery target for matches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notifier {
    pub channel: ChannelId,
    pub owner: UserId,
    pub searches: Vec<SearchSpec>,
    #[serde(default)]
    pub paused: bool,
    pub created_at: DateTime<Utc>,
}

impl Notifier {
    pub fn new(channel: ChannelId, owner: UserId) -> Self {
        Self {
            channel,
            owner,
            searches: Vec::new(),
            paused: false,
            created_at: Utc::now(),
        }
    }

    pub fn add_search(&mut self, spec: SearchSpec) -> Result<()> {
        let key = spec.key();
        if self.searches.iter().any(|s| s.key() == key) {
            return Err(Error::Config(format!(
                "this channel already has the search {}",
                spec.describe()
            )));
        }
        self.searches.push(spec);
        Ok(())
    }

    /// Remove by 1-based index as shown to users.
    pub fn remove_search(&mut self, index: usize) -> Option<SearchSpec> {
        if index == 0 || index > self.searches.len() {
            return None;
        }
        Some(self.searches.remove(index - 1))
    }
}

/// Parse `key=value key2=value2` into criteria.
pub fn parse_criteria(text: &str) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for part in text.split_whitespace() {
        let Some((k, v)) = part.split_once('=') else {
            return Err(Error::Config(format!(
                "expected key=value, got {part:?}"
            )));
        };
        if !criteria_key_re().is_match(k) || v.is_empty() {
            return Err(Error::Config(format!("invalid criteria pair {part:?}")));
        }
        out.insert(k.to_string(), v.to_string());
    }
    Ok(out)
}

fn criteria_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"))
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
