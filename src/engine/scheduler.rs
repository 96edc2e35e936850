//! The polling scheduler: decides which feeds to fetch and when, runs the
//! fetch, and drives fetched documents through the ingestion pipeline.

use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};

use super::fanout::{FanoutNotifier, IngestMode};
use super::identity::IdentityResolver;
use super::merger::Merger;
use super::normalizer;
use crate::feed::{FeedFetcher, FetchedDocument};
use crate::storage::{
    Feed, FeedRepository, FetchFrequency, ItemRepository, SubscriptionRepository,
};

const DAY_SECONDS: i64 = 86_400;
const YEAR_SECONDS: i64 = 365 * DAY_SECONDS;
const FIVE_YEARS_SECONDS: i64 = 5 * YEAR_SECONDS;

/// A feed producing at least this many items in a day, with more than one
/// subscriber, is promoted to fast polling.
const FAST_PROMOTION_THRESHOLD: i64 = 37;

/// Candidate window for the due-feed query: anything not fetched within the
/// fastest poll interval might be due, and the per-feed gate settles it.
const DUE_LOOKBEHIND_SECONDS: i64 = 600;

/// What a single poll attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The feed's interval has not elapsed, or it is push-driven.
    NotDue,
    /// The feed is permanently excluded from polling.
    Disabled,
    /// The fetch failed; transient failures retry on the next cycle.
    FetchFailed,
    /// A document was ingested.
    Ingested(IngestStats),
}

/// Per-document ingestion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Drives the poll cycle for one feed or a due batch.
///
/// Generic over the store and the fetcher so tests can substitute either;
/// the structurally-excluded link check in particular must be observable as
/// "no fetch call was ever made".
pub struct FeedScheduler<S, F> {
    store: S,
    fetcher: F,
    resolver: IdentityResolver<S>,
    merger: Merger<S>,
    fanout: FanoutNotifier<S>,
    max_concurrent: usize,
}

impl<S, F> FeedScheduler<S, F>
where
    S: FeedRepository + ItemRepository + SubscriptionRepository + Clone,
    F: FeedFetcher,
{
    pub fn new(store: S, fetcher: F, max_concurrent: usize) -> Self {
        Self {
            resolver: IdentityResolver::new(store.clone()),
            merger: Merger::new(store.clone()),
            fanout: FanoutNotifier::new(store.clone()),
            store,
            fetcher,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Poll every feed whose interval may have elapsed, at bounded
    /// concurrency. Per-feed failures are logged and do not abort the batch.
    pub async fn poll_due_feeds(&self, batch_size: i64) -> Result<Vec<(i64, PollOutcome)>> {
        let cutoff = Utc::now().timestamp() - DUE_LOOKBEHIND_SECONDS;
        let feeds = self.store.due_feeds(cutoff, batch_size).await?;
        tracing::info!(candidates = feeds.len(), "Polling due feeds");

        let results = stream::iter(feeds)
            .map(|feed| async move {
                let feed_id = feed.id;
                let link = feed.link.clone();
                match self.poll_one(feed).await {
                    Ok(outcome) => Some((feed_id, outcome)),
                    Err(e) => {
                        tracing::error!(feed_id, link = %link, error = %e, "Poll failed");
                        None
                    }
                }
            })
            .buffer_unordered(self.max_concurrent)
            .collect::<Vec<_>>()
            .await;

        Ok(results.into_iter().flatten().collect())
    }

    /// Run the full gate-fetch-ingest cycle for one feed.
    pub async fn poll_one(&self, mut feed: Feed) -> Result<PollOutcome> {
        let now = Utc::now().timestamp();

        if feed.frequency == FetchFrequency::Never {
            return Ok(PollOutcome::Disabled);
        }

        // Structurally unfetchable links are retired before any network
        // traffic happens.
        if is_structurally_unfetchable(&feed.link) {
            tracing::warn!(feed_id = feed.id, link = %feed.link, "Link is not fetchable, disabling feed");
            feed.frequency = FetchFrequency::Never;
            self.store.save_feed(&feed).await?;
            return Ok(PollOutcome::Disabled);
        }

        match feed.frequency.poll_interval_minutes() {
            None => return Ok(PollOutcome::NotDue), // push-driven
            Some(interval) => {
                if let Some(last) = feed.last_fetched {
                    if (now - last) / 60 < interval {
                        return Ok(PollOutcome::NotDue);
                    }
                }
            }
        }

        let doc = match self.fetcher.fetch(&feed.link).await {
            Ok(doc) => doc,
            Err(e) if e.is_permanent() => {
                tracing::warn!(feed_id = feed.id, link = %feed.link, error = %e, "Permanent fetch failure, disabling feed");
                feed.frequency = FetchFrequency::Never;
                self.store.save_feed(&feed).await?;
                return Ok(PollOutcome::FetchFailed);
            }
            Err(e) => {
                tracing::warn!(feed_id = feed.id, link = %feed.link, error = %e, "Fetch failed, will retry");
                return Ok(PollOutcome::FetchFailed);
            }
        };

        if doc.status == Some(404) {
            tracing::warn!(feed_id = feed.id, link = %feed.link, "Feed gone (404), disabling");
            feed.frequency = FetchFrequency::Never;
            self.store.save_feed(&feed).await?;
            return Ok(PollOutcome::FetchFailed);
        }

        if let Some(bozo) = &doc.bozo {
            if bozo.permanent {
                tracing::warn!(feed_id = feed.id, link = %feed.link, detail = %bozo.detail, "Permanently malformed feed, disabling");
                feed.frequency = FetchFrequency::Never;
                self.store.save_feed(&feed).await?;
                return Ok(PollOutcome::FetchFailed);
            }
            // Malformed but salvageable; whatever parsed still ingests.
            tracing::warn!(feed_id = feed.id, link = %feed.link, detail = %bozo.detail, "Malformed feed document");
        }

        let stats = self.ingest_document(feed, &doc, IngestMode::Live).await?;
        Ok(PollOutcome::Ingested(stats))
    }

    /// Ingest a fetched document: refresh feed metadata and scheduling
    /// state, then run each entry through normalize, resolve, merge, and
    /// fan-out in document order.
    ///
    /// Also the entry point for push-delivered documents, which skip the
    /// poll gate entirely.
    pub async fn ingest_document(
        &self,
        mut feed: Feed,
        doc: &FetchedDocument,
        mode: IngestMode,
    ) -> Result<IngestStats> {
        let now = Utc::now().timestamp();

        apply_metadata(&mut feed, doc);
        self.recompute_frequency(&mut feed, now).await?;
        feed.last_fetched = Some(now);
        self.store.save_feed(&feed).await?;

        let mut stats = IngestStats::default();
        for entry in &doc.entries {
            let candidate = match normalizer::normalize(&feed, entry, now) {
                Some(candidate) => candidate,
                None => {
                    stats.skipped += 1;
                    continue;
                }
            };

            let existing = self.resolver.resolve(&feed, &candidate).await?;
            let (item, created) = self.merger.merge(&feed, existing, &candidate).await?;
            if created {
                stats.created += 1;
            } else {
                stats.updated += 1;
            }

            self.fanout
                .fan_out(&feed, &item, candidate.weak_date, mode)
                .await?;
        }

        tracing::info!(
            feed_id = feed.id,
            link = %feed.link,
            created = stats.created,
            updated = stats.updated,
            skipped = stats.skipped,
            "Ingested document"
        );
        Ok(stats)
    }

    /// Adjust the feed's polling tier from its recent publication history.
    ///
    /// Promotion to fast requires both volume and more than one subscriber.
    /// A year of silence demotes to slow regardless. Five years of silence
    /// only warns; the slow tier already covers it and `Never` is reserved
    /// for feeds that cannot be fetched at all.
    async fn recompute_frequency(&self, feed: &mut Feed, now: i64) -> Result<()> {
        match feed.frequency {
            FetchFrequency::Never | FetchFrequency::Push => return Ok(()),
            FetchFrequency::Fast | FetchFrequency::Default | FetchFrequency::Slow => {}
        }

        let last_day = self
            .store
            .count_published_since(feed.id, now - DAY_SECONDS)
            .await?;
        if last_day >= FAST_PROMOTION_THRESHOLD && self.store.subscriber_count(feed.id).await? > 1 {
            if feed.frequency != FetchFrequency::Fast {
                tracing::info!(feed_id = feed.id, items_last_day = last_day, "Promoting feed to fast polling");
            }
            feed.frequency = FetchFrequency::Fast;
        }

        let last_year = self
            .store
            .count_published_since(feed.id, now - YEAR_SECONDS)
            .await?;
        if last_year == 0 {
            if feed.frequency != FetchFrequency::Slow {
                tracing::info!(feed_id = feed.id, "No items in a year, demoting feed to slow polling");
            }
            feed.frequency = FetchFrequency::Slow;

            let last_five_years = self
                .store
                .count_published_since(feed.id, now - FIVE_YEARS_SECONDS)
                .await?;
            if last_five_years == 0 {
                tracing::warn!(feed_id = feed.id, link = %feed.link, "Feed has published nothing in five years");
            }
        }

        Ok(())
    }
}

/// Links that can never resolve to a fetchable document: relative
/// aggregator-internal paths and the long-dead Twitter timeline API.
pub fn is_structurally_unfetchable(link: &str) -> bool {
    link.starts_with("user/")
        || link.starts_with("webfeed/")
        || link.contains("twitter.com/statuses/user_timeline")
}

/// Overwrite feed metadata with whatever the document supplied.
fn apply_metadata(feed: &mut Feed, doc: &FetchedDocument) {
    if let Some(title) = doc.title.as_deref().filter(|t| !t.is_empty()) {
        feed.title = title.to_string();
    }
    if let Some(description) = doc.description.as_deref() {
        feed.description = description.to_string();
    }
    if let Some(generator) = doc.generator.as_deref() {
        feed.generator = generator.to_string();
    }
    if let Some(site) = doc.site.as_deref().filter(|s| !s.is_empty()) {
        feed.site = Some(site.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FetchError, HttpFetcher, RawEntry, RawTimestamp};
    use crate::storage::Database;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Stub fetcher that counts calls and serves a canned document.
    #[derive(Clone)]
    struct StubFetcher {
        calls: Arc<AtomicUsize>,
        doc: FetchedDocument,
    }

    impl StubFetcher {
        fn new(doc: FetchedDocument) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                doc,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl FeedFetcher for StubFetcher {
        async fn fetch(&self, _link: &str) -> Result<FetchedDocument, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.doc.clone())
        }
    }

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn doc_with_entries(entries: Vec<RawEntry>) -> FetchedDocument {
        FetchedDocument {
            status: Some(200),
            title: Some("Feed".to_string()),
            entries,
            ..Default::default()
        }
    }

    fn entry(id: &str, published: i64) -> RawEntry {
        RawEntry {
            title: Some(format!("Post {id}")),
            id: Some(format!("urn:{id}")),
            content: Some("body".to_string()),
            published: Some(RawTimestamp::Parsed(published)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_feed_never_fetched() {
        let db = test_db().await;
        let mut feed = db
            .get_or_create_feed("http://dead.example.com/rss", "Dead", None)
            .await
            .unwrap();
        feed.frequency = FetchFrequency::Never;
        db.save_feed(&feed).await.unwrap();

        let fetcher = StubFetcher::new(doc_with_entries(vec![]));
        let scheduler = FeedScheduler::new(db.clone(), fetcher.clone(), 1);

        let feed = db.feed_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(scheduler.poll_one(feed).await.unwrap(), PollOutcome::Disabled);
        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unfetchable_link_disabled_without_fetch() {
        let db = test_db().await;
        let feed = db
            .get_or_create_feed("user/17/label/news", "Aggregator label", None)
            .await
            .unwrap();

        let fetcher = StubFetcher::new(doc_with_entries(vec![]));
        let scheduler = FeedScheduler::new(db.clone(), fetcher.clone(), 1);

        assert_eq!(scheduler.poll_one(feed.clone()).await.unwrap(), PollOutcome::Disabled);
        assert_eq!(fetcher.call_count(), 0);

        let reloaded = db.feed_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(reloaded.frequency, FetchFrequency::Never);
    }

    #[tokio::test]
    async fn test_twitter_timeline_link_disabled() {
        let db = test_db().await;
        let feed = db
            .get_or_create_feed(
                "http://twitter.com/statuses/user_timeline/12345.rss",
                "Tweets",
                None,
            )
            .await
            .unwrap();

        let fetcher = StubFetcher::new(doc_with_entries(vec![]));
        let scheduler = FeedScheduler::new(db.clone(), fetcher.clone(), 1);

        assert_eq!(scheduler.poll_one(feed).await.unwrap(), PollOutcome::Disabled);
        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_push_feed_not_polled() {
        let db = test_db().await;
        let mut feed = db
            .get_or_create_feed("http://hub.example.com/rss", "Push", None)
            .await
            .unwrap();
        feed.frequency = FetchFrequency::Push;
        db.save_feed(&feed).await.unwrap();

        let fetcher = StubFetcher::new(doc_with_entries(vec![]));
        let scheduler = FeedScheduler::new(db.clone(), fetcher.clone(), 1);

        let feed = db.feed_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(scheduler.poll_one(feed).await.unwrap(), PollOutcome::NotDue);
        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_recently_fetched_feed_not_due() {
        let db = test_db().await;
        let mut feed = db
            .get_or_create_feed("http://example.com/rss", "Example", None)
            .await
            .unwrap();
        feed.last_fetched = Some(Utc::now().timestamp() - 60);
        db.save_feed(&feed).await.unwrap();

        let fetcher = StubFetcher::new(doc_with_entries(vec![]));
        let scheduler = FeedScheduler::new(db.clone(), fetcher.clone(), 1);

        let feed = db.feed_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(scheduler.poll_one(feed).await.unwrap(), PollOutcome::NotDue);
        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_elapsed_interval_triggers_fetch_and_ingest() {
        let db = test_db().await;
        let now = Utc::now().timestamp();
        let mut feed = db
            .get_or_create_feed("http://example.com/rss", "Example", None)
            .await
            .unwrap();
        feed.last_fetched = Some(now - 3600);
        db.save_feed(&feed).await.unwrap();
        db.create_subscription(1, feed.id).await.unwrap();

        let fetcher = StubFetcher::new(doc_with_entries(vec![entry("a", now - 10)]));
        let scheduler = FeedScheduler::new(db.clone(), fetcher.clone(), 1);

        let feed = db.feed_by_id(feed.id).await.unwrap().unwrap();
        let outcome = scheduler.poll_one(feed.clone()).await.unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Ingested(IngestStats {
                created: 1,
                updated: 0,
                skipped: 0
            })
        );
        assert_eq!(fetcher.call_count(), 1);

        let reloaded = db.feed_by_id(feed.id).await.unwrap().unwrap();
        assert!(reloaded.last_fetched.unwrap() >= now);

        // The subscriber got an unread row
        assert_eq!(db.unread_count(1, feed.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_not_found_disables_feed() {
        let db = test_db().await;
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let feed = db
            .get_or_create_feed(&format!("{}/rss", mock_server.uri()), "Gone", None)
            .await
            .unwrap();

        let scheduler = FeedScheduler::new(
            db.clone(),
            HttpFetcher::new(Duration::from_secs(5)),
            1,
        );
        assert_eq!(
            scheduler.poll_one(feed.clone()).await.unwrap(),
            PollOutcome::FetchFailed
        );

        let reloaded = db.feed_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(reloaded.frequency, FetchFrequency::Never);
    }

    #[tokio::test]
    async fn test_malformed_document_still_polls_again() {
        let db = test_db().await;
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss><chan"))
            .mount(&mock_server)
            .await;

        let feed = db
            .get_or_create_feed(&format!("{}/rss", mock_server.uri()), "Bozo", None)
            .await
            .unwrap();

        let scheduler = FeedScheduler::new(
            db.clone(),
            HttpFetcher::new(Duration::from_secs(5)),
            1,
        );
        let outcome = scheduler.poll_one(feed.clone()).await.unwrap();
        // Nothing parsed, but the feed stays in rotation
        assert!(matches!(outcome, PollOutcome::Ingested(_)));
        let reloaded = db.feed_by_id(feed.id).await.unwrap().unwrap();
        assert_ne!(reloaded.frequency, FetchFrequency::Never);
    }

    #[tokio::test]
    async fn test_repeat_ingest_is_idempotent() {
        let db = test_db().await;
        let now = Utc::now().timestamp();
        let feed = db
            .get_or_create_feed("http://example.com/rss", "Example", None)
            .await
            .unwrap();
        db.create_subscription(1, feed.id).await.unwrap();

        let doc = doc_with_entries(vec![entry("a", now - 20), entry("b", now - 10)]);
        let fetcher = StubFetcher::new(doc.clone());
        let scheduler = FeedScheduler::new(db.clone(), fetcher, 1);

        let first = scheduler
            .ingest_document(feed.clone(), &doc, IngestMode::Live)
            .await
            .unwrap();
        assert_eq!(first.created, 2);

        // The user reads one; a second ingest of the same document must not
        // create anything new or flip the flag back
        let items = db.items_for_feed(feed.id).await.unwrap();
        db.set_read(1, items[0].id, true).await.unwrap();

        let feed = db.feed_by_id(feed.id).await.unwrap().unwrap();
        let second = scheduler
            .ingest_document(feed.clone(), &doc, IngestMode::Live)
            .await
            .unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 2);
        assert_eq!(db.items_for_feed(feed.id).await.unwrap().len(), 2);
        assert!(db.read_state(1, items[0].id).await.unwrap().unwrap().read);
    }

    #[tokio::test]
    async fn test_high_volume_feed_promoted_to_fast() {
        let db = test_db().await;
        let now = Utc::now().timestamp();
        let feed = db
            .get_or_create_feed("http://firehose.example.com/rss", "Firehose", None)
            .await
            .unwrap();
        db.create_subscription(1, feed.id).await.unwrap();
        db.create_subscription(2, feed.id).await.unwrap();

        let entries: Vec<RawEntry> = (0..37).map(|i| entry(&format!("e{i}"), now - i)).collect();
        let doc = doc_with_entries(entries);
        let scheduler = FeedScheduler::new(db.clone(), StubFetcher::new(doc.clone()), 1);

        // First ingest stores the items; the recompute on the next one sees
        // the day's volume
        scheduler
            .ingest_document(feed.clone(), &doc, IngestMode::Live)
            .await
            .unwrap();
        let feed = db.feed_by_id(feed.id).await.unwrap().unwrap();
        scheduler
            .ingest_document(feed.clone(), &doc, IngestMode::Live)
            .await
            .unwrap();

        let reloaded = db.feed_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(reloaded.frequency, FetchFrequency::Fast);
    }

    #[tokio::test]
    async fn test_single_subscriber_feed_not_promoted() {
        let db = test_db().await;
        let now = Utc::now().timestamp();
        let feed = db
            .get_or_create_feed("http://firehose.example.com/rss", "Firehose", None)
            .await
            .unwrap();
        db.create_subscription(1, feed.id).await.unwrap();

        let entries: Vec<RawEntry> = (0..40).map(|i| entry(&format!("e{i}"), now - i)).collect();
        let doc = doc_with_entries(entries);
        let scheduler = FeedScheduler::new(db.clone(), StubFetcher::new(doc.clone()), 1);

        scheduler
            .ingest_document(feed.clone(), &doc, IngestMode::Live)
            .await
            .unwrap();
        let feed = db.feed_by_id(feed.id).await.unwrap().unwrap();
        scheduler
            .ingest_document(feed.clone(), &doc, IngestMode::Live)
            .await
            .unwrap();

        let reloaded = db.feed_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(reloaded.frequency, FetchFrequency::Default);
    }

    #[tokio::test]
    async fn test_silent_feed_demoted_to_slow() {
        let db = test_db().await;
        let feed = db
            .get_or_create_feed("http://quiet.example.com/rss", "Quiet", None)
            .await
            .unwrap();

        let doc = doc_with_entries(vec![]);
        let scheduler = FeedScheduler::new(db.clone(), StubFetcher::new(doc.clone()), 1);
        scheduler
            .ingest_document(feed.clone(), &doc, IngestMode::Live)
            .await
            .unwrap();

        let reloaded = db.feed_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(reloaded.frequency, FetchFrequency::Slow);
    }

    #[tokio::test]
    async fn test_poll_due_feeds_skips_fresh_ones() {
        let db = test_db().await;
        let now = Utc::now().timestamp();

        let stale = db
            .get_or_create_feed("http://stale.example.com/rss", "Stale", None)
            .await
            .unwrap();
        let mut stale = stale;
        stale.last_fetched = Some(now - 7200);
        db.save_feed(&stale).await.unwrap();

        let mut fresh = db
            .get_or_create_feed("http://fresh.example.com/rss", "Fresh", None)
            .await
            .unwrap();
        fresh.last_fetched = Some(now - 30);
        db.save_feed(&fresh).await.unwrap();

        let fetcher = StubFetcher::new(doc_with_entries(vec![entry("a", now - 10)]));
        let scheduler = FeedScheduler::new(db.clone(), fetcher.clone(), 4);

        let results = scheduler.poll_due_feeds(100).await.unwrap();
        assert_eq!(fetcher.call_count(), 1);
        assert!(results
            .iter()
            .any(|(id, o)| *id == stale.id && matches!(o, PollOutcome::Ingested(_))));
        assert!(!results.iter().any(|(id, _)| *id == fresh.id));
    }

    #[test]
    fn test_unfetchable_patterns() {
        assert!(is_structurally_unfetchable("user/17/label/news"));
        assert!(is_structurally_unfetchable("webfeed/abc"));
        assert!(is_structurally_unfetchable(
            "http://twitter.com/statuses/user_timeline/1.rss"
        ));
        assert!(!is_structurally_unfetchable("http://example.com/user/feed"));
    }
}
