//! Durable storage for feeds, items, subscriptions, and read states.
//!
//! The engine components depend on the repository traits below rather than on
//! the concrete [`Database`], so tests can substitute storage freely. The
//! SQLite-backed `Database` implements all three.

mod feeds;
mod items;
mod schema;
mod subscriptions;
mod types;

pub use schema::Database;
pub use types::{
    DatabaseError, Feed, FetchFrequency, Item, NewItem, ReadState, Subscription,
};

use anyhow::Result;

/// Feed lookup and persistence.
#[allow(async_fn_in_trait)]
pub trait FeedRepository {
    /// Find a feed by canonical link, creating it with the given metadata if
    /// absent. Returns the stored feed either way.
    async fn get_or_create_feed(
        &self,
        link: &str,
        title: &str,
        site: Option<&str>,
    ) -> Result<Feed>;

    async fn feed_by_link(&self, link: &str) -> Result<Option<Feed>>;

    async fn feed_by_id(&self, id: i64) -> Result<Option<Feed>>;

    /// Feeds that are candidates for polling: never fetched, or last fetched
    /// at or before `cutoff` (unix seconds). The per-feed poll gate applies
    /// each feed's own frequency window on top of this.
    async fn due_feeds(&self, cutoff: i64, limit: i64) -> Result<Vec<Feed>>;

    /// Persist all mutable feed fields (metadata, frequency, last_fetched).
    async fn save_feed(&self, feed: &Feed) -> Result<()>;

    /// Feeds the given user is subscribed to, ordered by title.
    async fn feeds_for_user(&self, user_id: i64) -> Result<Vec<Feed>>;
}

/// Item lookup, persistence, and the aggregate counts the scheduler needs.
#[allow(async_fn_in_trait)]
pub trait ItemRepository {
    /// All items with this externally supplied identifier, newest published
    /// first. The lookup is global, not scoped to one feed.
    async fn items_by_atom_id(&self, atom_id: &str) -> Result<Vec<Item>>;

    /// All items with this link fingerprint, newest published first.
    async fn items_by_link_hash(&self, link_hash: &str) -> Result<Vec<Item>>;

    async fn item_by_guid(&self, feed_id: i64, guid: &str) -> Result<Option<Item>>;

    async fn insert_item(&self, item: &NewItem) -> Result<Item>;

    async fn update_item(&self, item: &Item) -> Result<()>;

    async fn delete_item(&self, id: i64) -> Result<()>;

    /// Number of items in the feed published strictly after `since`.
    async fn count_published_since(&self, feed_id: i64, since: i64) -> Result<i64>;

    /// All items in the feed, most recently published first.
    async fn items_for_feed(&self, feed_id: i64) -> Result<Vec<Item>>;
}

/// The subscriber directory plus per-user read state.
#[allow(async_fn_in_trait)]
pub trait SubscriptionRepository {
    /// Create the (user, feed) subscription if absent. Returns the row and
    /// whether it was newly created.
    async fn create_subscription(&self, user_id: i64, feed_id: i64)
        -> Result<(Subscription, bool)>;

    async fn delete_subscription(&self, user_id: i64, feed_id: i64) -> Result<()>;

    async fn subscription(&self, user_id: i64, feed_id: i64) -> Result<Option<Subscription>>;

    async fn set_subscription_tags(
        &self,
        user_id: i64,
        feed_id: i64,
        tags: &[String],
    ) -> Result<()>;

    async fn subscribers_of(&self, feed_id: i64) -> Result<Vec<i64>>;

    async fn subscriber_count(&self, feed_id: i64) -> Result<i64>;

    /// Create a read-state row if absent, with the given initial read flag.
    /// An existing row is left completely untouched. Returns true if a row
    /// was created.
    async fn ensure_read_state(
        &self,
        user_id: i64,
        feed_id: i64,
        item_id: i64,
        read: bool,
    ) -> Result<bool>;

    async fn read_state(&self, user_id: i64, item_id: i64) -> Result<Option<ReadState>>;

    async fn set_read(&self, user_id: i64, item_id: i64, read: bool) -> Result<()>;

    async fn set_starred(&self, user_id: i64, item_id: i64, starred: bool) -> Result<()>;

    async fn set_read_state_tags(
        &self,
        user_id: i64,
        item_id: i64,
        tags: &[String],
    ) -> Result<()>;

    /// Remove every read-state row this user has for the feed. Items and the
    /// feed itself are never touched.
    async fn delete_read_states(&self, user_id: i64, feed_id: i64) -> Result<()>;

    /// Published timestamp of the most recent item the user can see in this
    /// feed, if any. Drives the catch-up read-state heuristics.
    async fn latest_seen_published(&self, user_id: i64, feed_id: i64) -> Result<Option<i64>>;

    async fn unread_count(&self, user_id: i64, feed_id: i64) -> Result<i64>;
}
