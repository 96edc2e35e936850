//! The ingestion engine: normalization, identity, merging, fan-out, and
//! scheduling, composed behind one facade.
//!
//! Every component takes its store as an explicit repository dependency;
//! nothing here hangs off save hooks or global state, so each stage is
//! independently testable against an in-memory database.

pub mod fanout;
pub mod identity;
pub mod merger;
pub mod normalizer;
pub mod scheduler;

pub use fanout::{FanoutNotifier, IngestMode, BOOTSTRAP_CUTOFF};
pub use identity::{identity_hash, link_fingerprint, IdentityResolver};
pub use merger::Merger;
pub use normalizer::{normalize, CandidateItem};
pub use scheduler::{FeedScheduler, IngestStats, PollOutcome};

use anyhow::{anyhow, Result};

use crate::feed::FeedFetcher;
use crate::storage::{
    Feed, FeedRepository, ItemRepository, Subscription, SubscriptionRepository,
};

/// Top-level handle over the ingestion pipeline.
pub struct Engine<S, F> {
    store: S,
    scheduler: FeedScheduler<S, F>,
    fanout: FanoutNotifier<S>,
}

impl<S, F> Engine<S, F>
where
    S: FeedRepository + ItemRepository + SubscriptionRepository + Clone,
    F: FeedFetcher,
{
    pub fn new(store: S, fetcher: F, max_concurrent: usize) -> Self {
        Self {
            scheduler: FeedScheduler::new(store.clone(), fetcher, max_concurrent),
            fanout: FanoutNotifier::new(store.clone()),
            store,
        }
    }

    /// Register a feed by link, or return the existing one.
    pub async fn add_feed(&self, link: &str, title: &str) -> Result<Feed> {
        self.store.get_or_create_feed(link, title, None).await
    }

    /// Subscribe a user to a feed, creating the feed if needed. A brand-new
    /// subscription backfills read-state rows for everything already stored.
    pub async fn subscribe(&self, user_id: i64, feed_link: &str) -> Result<Subscription> {
        let feed = self
            .store
            .get_or_create_feed(feed_link, feed_link, None)
            .await?;
        let (subscription, created) = self.store.create_subscription(user_id, feed.id).await?;
        if created {
            tracing::info!(user_id, feed_id = feed.id, link = %feed.link, "New subscription, backfilling");
            self.fanout.backfill(user_id, &feed).await?;
        }
        Ok(subscription)
    }

    /// Remove a user's subscription and every read-state row behind it.
    /// Stored items are untouched; other subscribers still reference them.
    pub async fn unsubscribe(&self, user_id: i64, feed_link: &str) -> Result<()> {
        let feed = self
            .store
            .feed_by_link(feed_link)
            .await?
            .ok_or_else(|| anyhow!("no such feed: {feed_link}"))?;
        self.fanout.remove_subscriber(user_id, &feed).await?;
        self.store.delete_subscription(user_id, feed.id).await?;
        Ok(())
    }

    /// Poll every due feed, up to `batch_size`, at bounded concurrency.
    pub async fn poll_due_feeds(&self, batch_size: i64) -> Result<Vec<(i64, PollOutcome)>> {
        self.scheduler.poll_due_feeds(batch_size).await
    }

    /// Poll a single feed by link, regardless of batch scheduling.
    pub async fn poll_one(&self, feed_link: &str) -> Result<PollOutcome> {
        let feed = self
            .store
            .feed_by_link(feed_link)
            .await?
            .ok_or_else(|| anyhow!("no such feed: {feed_link}"))?;
        self.scheduler.poll_one(feed).await
    }

    /// The feeds a user is subscribed to.
    pub async fn feeds_for_user(&self, user_id: i64) -> Result<Vec<Feed>> {
        self.store.feeds_for_user(user_id).await
    }
}
