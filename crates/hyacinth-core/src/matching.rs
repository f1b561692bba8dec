//! Deduplication of freshly scraped listings against a search's seen-set.
//!
//! Matching is pure: it reads the seen-set, extends it with what it emits,
//! and leaves persistence to the caller.

use std::collections::HashSet;

use crate::{
    domain::ChannelId,
    listing::{Listing, RawListing},
    search::SearchSpec,
    Error,
};

/// A raw item dropped because it cannot be identified.
#[derive(Clone, Debug, PartialEq)]
pub struct SkippedListing {
    pub index: usize,
    pub reason: String,
}

impl SkippedListing {
    pub fn to_error(&self) -> Error {
        Error::MalformedListing {
            index: self.index,
            reason: self.reason.clone(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MatchOutcome {
    /// Novel listings, in the order the plugin returned them.
    pub novel: Vec<Listing>,
    pub skipped: Vec<SkippedListing>,
    /// Items already in the seen-set (including repeats within the batch).
    pub already_seen: usize,
}

/// Filter `raw` down to listings not yet seen for `spec` in `channel`.
///
/// Every emitted id is added to `seen`, so a second run over the same batch
/// yields nothing and duplicates inside one batch are emitted once.
pub fn match_listings(
    channel: ChannelId,
    spec: &SearchSpec,
    raw: Vec<RawListing>,
    seen: &mut HashSet<String>,
) -> MatchOutcome {
    let mut out = MatchOutcome::default();

    for (index, item) in raw.into_iter().enumerate() {
        let Some(id) = item.normalized_id().map(str::to_string) else {
            out.skipped.push(SkippedListing {
                index,
                reason: "missing source id".to_string(),
            });
            continue;
        };

        if !seen.insert(id.clone()) {
            out.already_seen += 1;
            continue;
        }

        out.novel.push(Listing::from_raw(channel, spec, &id, item));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::LedgerKey;
    use std::collections::BTreeMap;

    fn spec() -> SearchSpec {
        let mut criteria = BTreeMap::new();
        criteria.insert("q".to_string(), "couch".to_string());
        SearchSpec::new("tests.plugins:Fake", criteria).unwrap()
    }

    fn ids(listings: &[Listing]) -> Vec<&str> {
        listings.iter().map(|l| l.source_id.as_str()).collect()
    }

    #[test]
    fn preserves_plugin_order() {
        let raw = vec![
            RawListing::new("a", "A"),
            RawListing::new("b", "B"),
            RawListing::new("c", "C"),
        ];
        let mut seen = HashSet::new();
        let out = match_listings(ChannelId(1), &spec(), raw, &mut seen);
        assert_eq!(ids(&out.novel), vec!["a", "b", "c"]);
        assert!(out.skipped.is_empty());
    }

    #[test]
    fn second_run_over_same_batch_is_empty() {
        let raw = vec![RawListing::new("1", "One"), RawListing::new("2", "Two")];
        let mut seen = HashSet::new();
        let first = match_listings(ChannelId(1), &spec(), raw.clone(), &mut seen);
        assert_eq!(first.novel.len(), 2);

        let second = match_listings(ChannelId(1), &spec(), raw, &mut seen);
        assert!(second.novel.is_empty());
        assert_eq!(second.already_seen, 2);
    }

    #[test]
    fn malformed_item_is_skipped_not_fatal() {
        let mut missing = RawListing::new("ignored", "No id");
        missing.source_id = None;
        let raw = vec![RawListing::new("1", "One"), missing, RawListing::new("3", "Three")];

        let mut seen = HashSet::new();
        let out = match_listings(ChannelId(1), &spec(), raw, &mut seen);
        assert_eq!(ids(&out.novel), vec!["1", "3"]);
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].index, 1);
        assert!(matches!(
            out.skipped[0].to_error(),
            Error::MalformedListing { index: 1, .. }
        ));
    }

    #[test]
    fn blank_ids_are_malformed_and_ids_are_trimmed() {
        let mut blank = RawListing::new("   ", "Blank");
        blank.title = None;
        let raw = vec![blank, RawListing::new(" 42 ", "Padded"), RawListing::new("42", "Dup")];

        let mut seen = HashSet::new();
        let out = match_listings(ChannelId(1), &spec(), raw, &mut seen);
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(ids(&out.novel), vec!["42"]);
        assert_eq!(out.novel[0].title, "Padded");
        assert_eq!(out.already_seen, 1);
    }

    #[test]
    fn previously_seen_ids_are_filtered_and_listings_bind_to_channel_search() {
        let mut seen: HashSet<String> = ["123".to_string()].into_iter().collect();
        let raw = vec![RawListing::new("123", "Couch"), RawListing::new("124", "Sofa")];
        let out = match_listings(ChannelId(1), &spec(), raw, &mut seen);
        assert_eq!(ids(&out.novel), vec!["124"]);
        assert_eq!(out.novel[0].ledger, LedgerKey::new(ChannelId(1), &spec()));
        assert!(seen.contains("124"));
    }
}
