//! Create-or-update of resolved items, with newer-wins conflict handling.

use anyhow::{anyhow, Result};

use super::identity::{identity_hash, link_fingerprint};
use super::normalizer::CandidateItem;
use crate::storage::{Feed, FeedRepository, Item, ItemRepository, NewItem};

/// Applies a normalized candidate to storage: inserts a fresh item, or
/// overwrites an existing one unless the stored copy is strictly newer.
pub struct Merger<S> {
    store: S,
}

impl<S: ItemRepository + FeedRepository + Clone> Merger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Merge the candidate into storage. Returns the stored item and whether
    /// it was newly created.
    ///
    /// An existing item with a strictly greater published timestamp is left
    /// untouched; an equal timestamp still takes the incoming version, so
    /// in-place edits that do not bump the date propagate.
    pub async fn merge(
        &self,
        feed: &Feed,
        existing: Option<Item>,
        candidate: &CandidateItem,
    ) -> Result<(Item, bool)> {
        let mut item = match existing {
            None => {
                let item = self
                    .store
                    .insert_item(&NewItem {
                        feed_id: feed.id,
                        title: candidate.title.clone(),
                        link: candidate.link.clone(),
                        link_hash: fingerprint_or_empty(&candidate.link),
                        guid: identity_hash(
                            &feed.link,
                            &candidate.link,
                            &candidate.atom_id,
                            &candidate.title,
                        ),
                        atom_id: candidate.atom_id.clone(),
                        description: candidate.description.clone(),
                        published: candidate.published,
                    })
                    .await?;
                return Ok((item, true));
            }
            Some(item) => item,
        };

        if item.published > candidate.published {
            tracing::debug!(
                item_id = item.id,
                stored = item.published,
                incoming = candidate.published,
                "Stored item is newer, skipping overwrite"
            );
            return Ok((item, false));
        }

        if item.link != candidate.link {
            item.link_hash = fingerprint_or_empty(&candidate.link);
        }
        item.title = candidate.title.clone();
        item.link = candidate.link.clone();
        item.atom_id = candidate.atom_id.clone();
        item.description = candidate.description.clone();
        item.published = candidate.published;

        // The identity hash is scoped to the feed that owns the item, which
        // for a cross-feed match is not the feed being polled.
        let owner_link = if item.feed_id == feed.id {
            feed.link.clone()
        } else {
            self.store
                .feed_by_id(item.feed_id)
                .await?
                .ok_or_else(|| anyhow!("item {} references missing feed {}", item.id, item.feed_id))?
                .link
        };
        item.guid = identity_hash(&owner_link, &item.link, &item.atom_id, &item.title);

        self.store.update_item(&item).await?;
        Ok((item, false))
    }
}

fn fingerprint_or_empty(link: &str) -> String {
    if link.is_empty() {
        String::new()
    } else {
        link_fingerprint(link)
    }
}
