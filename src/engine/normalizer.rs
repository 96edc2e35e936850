//! Entry normalization: ordered fallback chains over the loosely-typed raw
//! entry, producing a candidate item or a skip decision.

use crate::feed::{RawEntry, RawTimestamp};
use crate::storage::Feed;

/// Placeholder title for entries that supply none.
pub const MISSING_TITLE: &str = "(none)";

/// A normalized entry, ready for identity resolution.
///
/// `link` and `atom_id` may be empty strings; empty values are skipped by
/// the corresponding identity lookups. `weak_date` records that `published`
/// was fabricated because the source supplied no usable timestamp — the
/// catch-up read-state rules care about this downstream.
#[derive(Debug, Clone)]
pub struct CandidateItem {
    pub title: String,
    pub link: String,
    pub atom_id: String,
    pub description: String,
    pub published: i64,
    pub weak_date: bool,
}

/// Normalize one raw entry against its parent feed.
///
/// Returns `None` when no content is extractable — the only condition that
/// skips an entry. The skip is logged here and never fails the batch;
/// sibling entries still process.
pub fn normalize(feed: &Feed, entry: &RawEntry, now: i64) -> Option<CandidateItem> {
    let description = match extract_content(entry) {
        Some(text) => text,
        None => {
            tracing::warn!(feed_id = feed.id, link = %feed.link, "No content in entry, skipping");
            return None;
        }
    };

    let title = entry
        .title
        .clone()
        .unwrap_or_else(|| MISSING_TITLE.to_string());
    let link = entry.link.clone().unwrap_or_default();
    let atom_id = entry.id.clone().unwrap_or_default();
    let (published, weak_date) = pick_published(entry, now);

    Some(CandidateItem {
        title,
        link,
        atom_id,
        description,
        published,
        weak_date,
    })
}

/// Content fallback chain: structured content body, then summary-detail
/// body, then plain summary. The first present field wins, trimmed.
fn extract_content(entry: &RawEntry) -> Option<String> {
    entry
        .content
        .as_deref()
        .or(entry.summary_detail.as_deref())
        .or(entry.summary.as_deref())
        .map(|s| s.trim().to_string())
}

/// Timestamp fallback chain: published, then updated, then created.
///
/// The first *present* field decides. A present-but-unparseable field stops
/// the chain and fabricates "now" with the weak-date flag set — it does not
/// fall through to the next field. All-absent also fabricates "now".
fn pick_published(entry: &RawEntry, now: i64) -> (i64, bool) {
    for field in [entry.published, entry.updated, entry.created] {
        match field {
            Some(RawTimestamp::Parsed(ts)) => return (ts, false),
            Some(RawTimestamp::Unparseable) => return (now, true),
            None => continue,
        }
    }
    (now, true)
}
