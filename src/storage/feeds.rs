use anyhow::Result;

use super::schema::Database;
use super::types::FeedDbRow;
use super::{Feed, FeedRepository};

// ============================================================================
// Feed Operations
// ============================================================================

impl FeedRepository for Database {
    /// Find a feed by canonical link, creating it if absent.
    ///
    /// Insertion races with a concurrent creator are absorbed by the UNIQUE
    /// constraint on link: `ON CONFLICT DO NOTHING` followed by a re-read
    /// returns whichever row won.
    async fn get_or_create_feed(
        &self,
        link: &str,
        title: &str,
        site: Option<&str>,
    ) -> Result<Feed> {
        sqlx::query(
            r#"
            INSERT INTO feeds (link, title, site)
            VALUES (?, ?, ?)
            ON CONFLICT(link) DO NOTHING
        "#,
        )
        .bind(link)
        .bind(title)
        .bind(site)
        .execute(&self.pool)
        .await?;

        let row: FeedDbRow = sqlx::query_as(
            "SELECT id, title, description, link, site, generator, frequency, last_fetched
             FROM feeds WHERE link = ?",
        )
        .bind(link)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_feed())
    }

    async fn feed_by_link(&self, link: &str) -> Result<Option<Feed>> {
        let row: Option<FeedDbRow> = sqlx::query_as(
            "SELECT id, title, description, link, site, generator, frequency, last_fetched
             FROM feeds WHERE link = ?",
        )
        .bind(link)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedDbRow::into_feed))
    }

    async fn feed_by_id(&self, id: i64) -> Result<Option<Feed>> {
        let row: Option<FeedDbRow> = sqlx::query_as(
            "SELECT id, title, description, link, site, generator, frequency, last_fetched
             FROM feeds WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedDbRow::into_feed))
    }

    /// Feeds never fetched, or last fetched at or before `cutoff`.
    ///
    /// Never-polled feeds sort first so a fresh subscription gets its initial
    /// fetch ahead of routine re-polls.
    async fn due_feeds(&self, cutoff: i64, limit: i64) -> Result<Vec<Feed>> {
        let rows: Vec<FeedDbRow> = sqlx::query_as(
            r#"
            SELECT id, title, description, link, site, generator, frequency, last_fetched
            FROM feeds
            WHERE last_fetched IS NULL OR last_fetched <= ?
            ORDER BY last_fetched IS NOT NULL, last_fetched
            LIMIT ?
        "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedDbRow::into_feed).collect())
    }

    async fn save_feed(&self, feed: &Feed) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE feeds
            SET title = ?, description = ?, site = ?, generator = ?,
                frequency = ?, last_fetched = ?
            WHERE id = ?
        "#,
        )
        .bind(&feed.title)
        .bind(&feed.description)
        .bind(&feed.site)
        .bind(&feed.generator)
        .bind(feed.frequency.as_str())
        .bind(feed.last_fetched)
        .bind(feed.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn feeds_for_user(&self, user_id: i64) -> Result<Vec<Feed>> {
        let rows: Vec<FeedDbRow> = sqlx::query_as(
            r#"
            SELECT f.id, f.title, f.description, f.link, f.site, f.generator,
                   f.frequency, f.last_fetched
            FROM feeds f
            JOIN subscriptions s ON s.feed_id = f.id
            WHERE s.user_id = ?
            ORDER BY f.title
        "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedDbRow::into_feed).collect())
    }
}
