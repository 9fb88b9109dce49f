use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::feed::RawEntry;
use crate::store::{FeedStore, StoreError};
use crate::util::collapse_whitespace;

/// Separates title from summary in the fingerprint input so that
/// `("ab", "c")` and `("a", "bc")` hash differently.
const FIELD_SEPARATOR: char = '\u{1f}';

/// An entry whose fingerprint is not yet stored for its feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub entry: RawEntry,
    pub content_hash: String,
}

/// Stable content fingerprint over normalized `title + summary`.
///
/// The link is not part of the input, so an edited entry republished under
/// the same link counts as new. Entries with neither title nor summary all
/// share the fingerprint of the empty string.
pub fn fingerprint(title: &str, summary: &str) -> String {
    let title = collapse_whitespace(title);
    let summary = collapse_whitespace(summary);

    let mut hasher = Sha256::new();
    if !(title.is_empty() && summary.is_empty()) {
        hasher.update(title.as_bytes());
        hasher.update(FIELD_SEPARATOR.to_string().as_bytes());
        hasher.update(summary.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Keeps the entries whose fingerprint is absent from `existing`, in input
/// order. Repeats within `entries` collapse onto their first occurrence.
pub fn select_new(existing: &HashSet<String>, entries: Vec<RawEntry>) -> Vec<NewEntry> {
    let mut seen: HashSet<String> = HashSet::new();

    entries
        .into_iter()
        .filter_map(|entry| {
            let content_hash = fingerprint(&entry.title, &entry.summary);
            if existing.contains(&content_hash) || !seen.insert(content_hash.clone()) {
                return None;
            }
            Some(NewEntry {
                entry,
                content_hash,
            })
        })
        .collect()
}

/// Filters `entries` down to those not yet stored for `feed_id`.
///
/// Issues exactly one fingerprint query against the store regardless of how
/// many entries are checked.
pub async fn filter_new(
    store: &dyn FeedStore,
    feed_id: &str,
    entries: Vec<RawEntry>,
) -> Result<Vec<NewEntry>, StoreError> {
    if entries.is_empty() {
        return Ok(Vec::new());
    }

    let existing = store.existing_hashes(feed_id).await?;
    let total = entries.len();
    let fresh = select_new(&existing, entries);

    tracing::debug!(
        feed_id = %feed_id,
        fetched = total,
        known = existing.len(),
        new = fresh.len(),
        "Deduplicated feed entries"
    );
    Ok(fresh)
}
