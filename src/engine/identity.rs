//! Item identity: content hashing and existing-item resolution.

use anyhow::Result;
use sha2::{Digest, Sha256};

use super::normalizer::CandidateItem;
use crate::storage::{Feed, Item, ItemRepository};

/// Deterministic identity hash for an item, scoped to its owning feed.
///
/// The digest covers the feed link, the item link, the atom id, and the
/// title, concatenated with no separators. Any title edit therefore mints a
/// new identity for items that carry neither a link nor an atom id; that is
/// the long-standing behavior and changing it would orphan every stored
/// hash, so it stays.
pub fn identity_hash(feed_link: &str, link: &str, atom_id: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(feed_link.as_bytes());
    hasher.update(link.as_bytes());
    hasher.update(atom_id.as_bytes());
    hasher.update(title.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hash of an item link alone, used for the global cross-feed link lookup.
pub fn link_fingerprint(link: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(link.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Resolves a normalized candidate to an already-stored item, if any.
///
/// Lookup precedence: atom id (global, so an item syndicated through several
/// feeds matches across all of them), then link fingerprint (also global),
/// then the per-feed identity hash. Each stage is skipped when the candidate
/// lacks the field, and a miss falls through to the next stage.
pub struct IdentityResolver<S> {
    store: S,
}

impl<S: ItemRepository + Clone> IdentityResolver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, feed: &Feed, candidate: &CandidateItem) -> Result<Option<Item>> {
        if !candidate.atom_id.is_empty() {
            let matches = self.store.items_by_atom_id(&candidate.atom_id).await?;
            if let Some(item) = self.collapse_duplicates(matches, "atom_id").await? {
                return Ok(Some(item));
            }
        }

        if !candidate.link.is_empty() {
            let hash = link_fingerprint(&candidate.link);
            let matches = self.store.items_by_link_hash(&hash).await?;
            if let Some(item) = self.collapse_duplicates(matches, "link_hash").await? {
                return Ok(Some(item));
            }
        }

        let guid = identity_hash(
            &feed.link,
            &candidate.link,
            &candidate.atom_id,
            &candidate.title,
        );
        self.store.item_by_guid(feed.id, &guid).await
    }

    /// Keep the newest of a set of duplicate matches and delete the rest.
    ///
    /// Matches arrive ordered newest-first, so the head is the survivor.
    async fn collapse_duplicates(&self, matches: Vec<Item>, key: &str) -> Result<Option<Item>> {
        let mut iter = matches.into_iter();
        let survivor = match iter.next() {
            Some(item) => item,
            None => return Ok(None),
        };

        for dup in iter {
            tracing::warn!(
                key,
                kept = survivor.id,
                deleted = dup.id,
                "Duplicate items matched, keeping newest"
            );
            self.store.delete_item(dup.id).await?;
        }

        Ok(Some(survivor))
    }
}
