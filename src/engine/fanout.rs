//! Read-state fan-out: projecting stored items onto subscribers.

use anyhow::Result;

use crate::storage::{Feed, Item, ItemRepository, SubscriptionRepository};

/// Items published before this cutoff (2013-03-13T00:00:00Z) predate the
/// system and arrive already-read for everyone.
pub const BOOTSTRAP_CUTOFF: i64 = 1_363_132_800;

/// Window for the catch-up heuristics, one day in seconds.
const CATCH_UP_WINDOW: i64 = 86_400;

/// How many of the newest items stay unread when a new subscriber backfills.
const BACKFILL_UNREAD: usize = 10;

/// How a document reached the engine, which decides the initial read flag
/// for freshly fanned-out items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Routine polling; new items arrive unread.
    Live,
    /// Recovery after downtime. Items far older than what a subscriber has
    /// already seen are marked read so the backlog does not flood them, and
    /// weak-dated items that would sort far into the future are too.
    CatchUp,
}

/// Creates per-subscriber read-state rows for stored items. Existing rows
/// are never modified; the row-level guarantee lives in the store, this
/// component only decides the initial flag.
pub struct FanoutNotifier<S> {
    store: S,
}

impl<S: SubscriptionRepository + ItemRepository + Clone> FanoutNotifier<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Ensure a read-state row for every current subscriber of the feed.
    pub async fn fan_out(
        &self,
        feed: &Feed,
        item: &Item,
        weak_date: bool,
        mode: IngestMode,
    ) -> Result<()> {
        for user_id in self.store.subscribers_of(feed.id).await? {
            let read = self.initial_read(user_id, feed, item, weak_date, mode).await?;
            self.store
                .ensure_read_state(user_id, feed.id, item.id, read)
                .await?;
        }
        Ok(())
    }

    async fn initial_read(
        &self,
        user_id: i64,
        feed: &Feed,
        item: &Item,
        weak_date: bool,
        mode: IngestMode,
    ) -> Result<bool> {
        if item.published < BOOTSTRAP_CUTOFF {
            return Ok(true);
        }

        if mode == IngestMode::CatchUp {
            if let Some(last_seen) = self
                .store
                .latest_seen_published(user_id, feed.id)
                .await?
            {
                if last_seen - item.published >= CATCH_UP_WINDOW {
                    return Ok(true);
                }
                if weak_date && item.published - last_seen >= CATCH_UP_WINDOW {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    /// Create read-state rows for every already-stored item in the feed, for
    /// a user who just subscribed. The newest few stay unread as a starting
    /// point; everything older arrives read.
    pub async fn backfill(&self, user_id: i64, feed: &Feed) -> Result<()> {
        let items = self.store.items_for_feed(feed.id).await?;
        for (position, item) in items.iter().enumerate() {
            let read = position >= BACKFILL_UNREAD;
            self.store
                .ensure_read_state(user_id, feed.id, item.id, read)
                .await?;
        }
        Ok(())
    }

    /// Drop every read-state row the user holds for the feed.
    pub async fn remove_subscriber(&self, user_id: i64, feed: &Feed) -> Result<()> {
        self.store.delete_read_states(user_id, feed.id).await
    }
}
