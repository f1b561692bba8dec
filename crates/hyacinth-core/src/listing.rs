use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::ChannelId,
    search::{LedgerKey, SearchSpec},
};

/// One item as returned by a scraper plugin, before deduplication.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    pub source_id: Option<String>,
    pub title: Option<String>,
    pub price: Option<f64>,
    pub url: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl RawListing {
    pub fn new(source_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source_id: Some(source_id.into()),
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Trimmed source-native id, or `None` when missing/blank.
    pub fn normalized_id(&self) -> Option<&str> {
        self.source_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Identity of a listing: the channel's search it matched under plus its source id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListingKey {
    pub ledger: LedgerKey,
    pub source_id: String,
}

/// A listing that was novel for one search at match time. Never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub ledger: LedgerKey,
    pub source_id: String,
    pub title: String,
    pub price: Option<f64>,
    pub url: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub matched_at: DateTime<Utc>,
}

impl Listing {
    pub(crate) fn from_raw(
        channel: ChannelId,
        spec: &SearchSpec,
        source_id: &str,
        raw: RawListing,
    ) -> Self {
        Self {
            ledger: LedgerKey::new(channel, spec),
            source_id: source_id.to_string(),
            title: raw
                .title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "(untitled listing)".to_string()),
            price: raw.price,
            url: raw.url,
            location: raw.location,
            attributes: raw.attributes,
            matched_at: Utc::now(),
        }
    }

    pub fn key(&self) -> ListingKey {
        ListingKey {
            ledger: self.ledger.clone(),
            source_id: self.source_id.clone(),
        }
    }
}
