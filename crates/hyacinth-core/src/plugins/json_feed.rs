//! Generic JSON feed plugin.
//!
//! Fetches `url` and reads a JSON array of listing objects, optionally nested
//! under a dot-separated `path`. Knows nothing about any particular site.

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    listing::RawListing,
    plugins::{Criteria, PluginSettings, ScraperPlugin},
    Error, Result,
};

pub const JSON_FEED_PLUGIN_PATH: &str = "hyacinth.plugins.json_feed:JsonFeedPlugin";

const NAME: &str = "json_feed";

pub struct JsonFeedPlugin {
    client: reqwest::Client,
}

impl JsonFeedPlugin {
    pub fn new(settings: &PluginSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.scrape_timeout)
            .user_agent(concat!("hyacinth/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ScraperPlugin for JsonFeedPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn validate_criteria(&self, criteria: &Criteria) -> Result<()> {
        let Some(url) = criteria.get("url") else {
            return Err(Error::Config("json_feed needs a url=<feed url> criterion".to_string()));
        };
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!("not an http(s) url: {url}")));
        }
        Ok(())
    }

    async fn scrape(&self, criteria: &Criteria) -> Result<Vec<RawListing>> {
        self.validate_criteria(criteria)?;
        let url = &criteria["url"];

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::scrape(NAME, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::scrape(NAME, format!("{url} returned HTTP {status}")));
        }

        let body: Value = resp.json().await.map_err(|e| Error::scrape(NAME, e))?;
        parse_feed(&body, criteria.get("path").map(String::as_str))
    }
}

fn parse_feed(body: &Value, path: Option<&str>) -> Result<Vec<RawListing>> {
    let mut node = body;
    if let Some(path) = path {
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            node = node
                .get(segment)
                .ok_or_else(|| Error::scrape(NAME, format!("missing field {segment:?} in feed")))?;
        }
    }

    let Some(items) = node.as_array() else {
        return Err(Error::scrape(NAME, "feed is not a JSON array"));
    };

    Ok(items.iter().map(raw_from_item).collect())
}

fn raw_from_item(item: &Value) -> RawListing {
    let Some(obj) = item.as_object() else {
        // Kept so the matcher reports it as malformed.
        return RawListing::default();
    };

    let mut raw = RawListing {
        source_id: obj
            .get("source_id")
            .or_else(|| obj.get("id"))
            .and_then(scalar_to_string),
        title: obj.get("title").and_then(scalar_to_string),
        price: obj.get("price").and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().trim_start_matches('$').replace(',', "").parse().ok(),
            _ => None,
        }),
        url: obj.get("url").and_then(scalar_to_string),
        location: obj.get("location").and_then(scalar_to_string),
        ..RawListing::default()
    };

    for (k, v) in obj {
        if !matches!(
            k.as_str(),
            "id" | "source_id" | "title" | "price" | "url" | "location"
        ) {
            raw.attributes.insert(k.clone(), v.clone());
        }
    }
    raw
}

fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
