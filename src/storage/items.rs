use anyhow::Result;

use super::schema::Database;
use super::types::ItemDbRow;
use super::{Item, ItemRepository, NewItem};

const ITEM_COLUMNS: &str =
    "id, feed_id, title, link, link_hash, guid, atom_id, reader_guid, description, published";

// ============================================================================
// Item Operations
// ============================================================================

impl ItemRepository for Database {
    /// Items sharing an externally supplied identifier, newest first.
    ///
    /// The lookup is global: legacy data contains identifier collisions
    /// across feeds, and the resolver wants them all so it can keep the
    /// newest and delete the rest.
    async fn items_by_atom_id(&self, atom_id: &str) -> Result<Vec<Item>> {
        let rows: Vec<ItemDbRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE atom_id = ? ORDER BY published DESC, id DESC"
        ))
        .bind(atom_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ItemDbRow::into_item).collect())
    }

    async fn items_by_link_hash(&self, link_hash: &str) -> Result<Vec<Item>> {
        let rows: Vec<ItemDbRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE link_hash = ? ORDER BY published DESC, id DESC"
        ))
        .bind(link_hash)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ItemDbRow::into_item).collect())
    }

    async fn item_by_guid(&self, feed_id: i64, guid: &str) -> Result<Option<Item>> {
        let row: Option<ItemDbRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE feed_id = ? AND guid = ?"
        ))
        .bind(feed_id)
        .bind(guid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ItemDbRow::into_item))
    }

    async fn insert_item(&self, item: &NewItem) -> Result<Item> {
        let row: ItemDbRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO items (feed_id, title, link, link_hash, guid, atom_id, description, published)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {ITEM_COLUMNS}
        "#
        ))
        .bind(item.feed_id)
        .bind(&item.title)
        .bind(&item.link)
        .bind(&item.link_hash)
        .bind(&item.guid)
        .bind(&item.atom_id)
        .bind(&item.description)
        .bind(item.published)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_item())
    }

    async fn update_item(&self, item: &Item) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE items
            SET title = ?, link = ?, link_hash = ?, guid = ?, atom_id = ?,
                description = ?, published = ?
            WHERE id = ?
        "#,
        )
        .bind(&item.title)
        .bind(&item.link)
        .bind(&item.link_hash)
        .bind(&item.guid)
        .bind(&item.atom_id)
        .bind(&item.description)
        .bind(item.published)
        .bind(item.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete an item. Read states cascade away with it.
    async fn delete_item(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_published_since(&self, feed_id: i64, since: i64) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM items WHERE feed_id = ? AND published > ?")
                .bind(feed_id)
                .bind(since)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    async fn items_for_feed(&self, feed_id: i64) -> Result<Vec<Item>> {
        let rows: Vec<ItemDbRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE feed_id = ? ORDER BY published DESC, id DESC"
        ))
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ItemDbRow::into_item).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Feed, FeedRepository};

    async fn test_db_with_feed() -> (Database, Feed) {
        let db = Database::open(":memory:").await.unwrap();
        let feed = db
            .get_or_create_feed("http://example.com/rss", "Example", None)
            .await
            .unwrap();
        (db, feed)
    }

    fn test_item(feed_id: i64, guid: &str, published: i64) -> NewItem {
        NewItem {
            feed_id,
            title: "Octopus v. Platypus".to_string(),
            link: format!("http://example.com/{}", guid),
            link_hash: format!("hash-{}", guid),
            guid: guid.to_string(),
            atom_id: String::new(),
            description: "A fight to the death.".to_string(),
            published,
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookup_by_guid() {
        let (db, feed) = test_db_with_feed().await;

        let item = db.insert_item(&test_item(feed.id, "g1", 100)).await.unwrap();
        assert!(item.id > 0);
        assert!(item.reader_guid.is_none());

        let found = db.item_by_guid(feed.id, "g1").await.unwrap().unwrap();
        assert_eq!(found.id, item.id);
        assert!(db.item_by_guid(feed.id, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_atom_id_lookup_is_global_and_ordered() {
        let (db, feed) = test_db_with_feed().await;
        let other = db
            .get_or_create_feed("http://other.com/rss", "Other", None)
            .await
            .unwrap();

        let mut a = test_item(feed.id, "g1", 100);
        a.atom_id = "urn:a".to_string();
        let mut b = test_item(other.id, "g2", 200);
        b.atom_id = "urn:a".to_string();
        db.insert_item(&a).await.unwrap();
        db.insert_item(&b).await.unwrap();

        let found = db.items_by_atom_id("urn:a").await.unwrap();
        assert_eq!(found.len(), 2);
        // Newest published first, across feeds
        assert_eq!(found[0].published, 200);
        assert_eq!(found[0].feed_id, other.id);
    }

    #[tokio::test]
    async fn test_count_published_since_is_strict() {
        let (db, feed) = test_db_with_feed().await;
        db.insert_item(&test_item(feed.id, "g1", 100)).await.unwrap();
        db.insert_item(&test_item(feed.id, "g2", 200)).await.unwrap();

        assert_eq!(db.count_published_since(feed.id, 50).await.unwrap(), 2);
        assert_eq!(db.count_published_since(feed.id, 100).await.unwrap(), 1);
        assert_eq!(db.count_published_since(feed.id, 200).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_guid_within_feed_rejected() {
        let (db, feed) = test_db_with_feed().await;
        db.insert_item(&test_item(feed.id, "g1", 100)).await.unwrap();
        assert!(db.insert_item(&test_item(feed.id, "g1", 200)).await.is_err());

        // The same guid in another feed is fine
        let other = db
            .get_or_create_feed("http://other.com/rss", "Other", None)
            .await
            .unwrap();
        db.insert_item(&test_item(other.id, "g1", 100)).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_item() {
        let (db, feed) = test_db_with_feed().await;
        let item = db.insert_item(&test_item(feed.id, "g1", 100)).await.unwrap();
        db.delete_item(item.id).await.unwrap();
        assert!(db.item_by_guid(feed.id, "g1").await.unwrap().is_none());
    }
}
