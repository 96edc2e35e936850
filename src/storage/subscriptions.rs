use anyhow::Result;

use super::schema::Database;
use super::types::{decode_tags, encode_tags, ReadStateDbRow};
use super::{ReadState, Subscription, SubscriptionRepository};

// ============================================================================
// Subscription Operations
// ============================================================================

impl SubscriptionRepository for Database {
    async fn create_subscription(
        &self,
        user_id: i64,
        feed_id: i64,
    ) -> Result<(Subscription, bool)> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, feed_id)
            VALUES (?, ?)
            ON CONFLICT(user_id, feed_id) DO NOTHING
        "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() > 0;

        let row: (i64, String) = sqlx::query_as(
            "SELECT id, tags FROM subscriptions WHERE user_id = ? AND feed_id = ?",
        )
        .bind(user_id)
        .bind(feed_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((
            Subscription {
                id: row.0,
                user_id,
                feed_id,
                tags: decode_tags(&row.1),
            },
            created,
        ))
    }

    async fn delete_subscription(&self, user_id: i64, feed_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM subscriptions WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn subscription(&self, user_id: i64, feed_id: i64) -> Result<Option<Subscription>> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT id, tags FROM subscriptions WHERE user_id = ? AND feed_id = ?",
        )
        .bind(user_id)
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, tags)| Subscription {
            id,
            user_id,
            feed_id,
            tags: decode_tags(&tags),
        }))
    }

    async fn set_subscription_tags(
        &self,
        user_id: i64,
        feed_id: i64,
        tags: &[String],
    ) -> Result<()> {
        sqlx::query("UPDATE subscriptions SET tags = ? WHERE user_id = ? AND feed_id = ?")
            .bind(encode_tags(tags))
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn subscribers_of(&self, feed_id: i64) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT user_id FROM subscriptions WHERE feed_id = ? ORDER BY user_id")
                .bind(feed_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn subscriber_count(&self, feed_id: i64) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subscriptions WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    // ========================================================================
    // Read State Operations
    // ========================================================================

    /// Create a read-state row if absent; an existing row is never modified.
    ///
    /// This is the idempotency anchor for fan-out: repeated polls of the same
    /// document re-run fan-out for every item, and must not clobber read
    /// flags the user has since changed.
    async fn ensure_read_state(
        &self,
        user_id: i64,
        feed_id: i64,
        item_id: i64,
        read: bool,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO read_states (user_id, feed_id, item_id, read)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, feed_id, item_id) DO NOTHING
        "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(item_id)
        .bind(read)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn read_state(&self, user_id: i64, item_id: i64) -> Result<Option<ReadState>> {
        let row: Option<ReadStateDbRow> = sqlx::query_as(
            "SELECT id, user_id, feed_id, item_id, read, starred, tags
             FROM read_states WHERE user_id = ? AND item_id = ?",
        )
        .bind(user_id)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ReadStateDbRow::into_read_state))
    }

    async fn set_read(&self, user_id: i64, item_id: i64, read: bool) -> Result<()> {
        sqlx::query("UPDATE read_states SET read = ? WHERE user_id = ? AND item_id = ?")
            .bind(read)
            .bind(user_id)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_starred(&self, user_id: i64, item_id: i64, starred: bool) -> Result<()> {
        sqlx::query("UPDATE read_states SET starred = ? WHERE user_id = ? AND item_id = ?")
            .bind(starred)
            .bind(user_id)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_read_state_tags(
        &self,
        user_id: i64,
        item_id: i64,
        tags: &[String],
    ) -> Result<()> {
        sqlx::query("UPDATE read_states SET tags = ? WHERE user_id = ? AND item_id = ?")
            .bind(encode_tags(tags))
            .bind(user_id)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_read_states(&self, user_id: i64, feed_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM read_states WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Published timestamp of the newest item this user has a read-state row
    /// for in the feed. `None` when the user has never seen anything here.
    async fn latest_seen_published(&self, user_id: i64, feed_id: i64) -> Result<Option<i64>> {
        let row: (Option<i64>,) = sqlx::query_as(
            r#"
            SELECT MAX(i.published)
            FROM read_states r
            JOIN items i ON i.id = r.item_id
            WHERE r.user_id = ? AND r.feed_id = ?
        "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn unread_count(&self, user_id: i64, feed_id: i64) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM read_states WHERE user_id = ? AND feed_id = ? AND read = 0",
        )
        .bind(user_id)
        .bind(feed_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }
}
