//! Durable feed cursors.

use chrono::Utc;
use tracing::debug;

use crate::db::DbPool;
use crate::relay::types::{parse_datetime, FeedCursor, ItemId};
use crate::Result;

/// Row type for a feed cursor.
#[derive(Debug, Clone, sqlx::FromRow)]
struct FeedCursorRow {
    feed_id: String,
    last_seen_item_id: String,
    updated_at: String,
}

impl From<FeedCursorRow> for FeedCursor {
    fn from(row: FeedCursorRow) -> Self {
        FeedCursor {
            feed_id: row.feed_id,
            last_seen_item_id: ItemId::new(row.last_seen_item_id),
            updated_at: parse_datetime(&row.updated_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Store of the last processed item per feed.
///
/// The stored value only ever moves forward.
#[derive(Clone)]
pub struct CursorStore {
    pool: DbPool,
}

impl CursorStore {
    /// Create a new store on the given pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the cursor of a feed, if one was ever stored.
    pub async fn get(&self, feed_id: &str) -> Result<Option<FeedCursor>> {
        let row = sqlx::query_as::<_, FeedCursorRow>(
            "SELECT feed_id, last_seen_item_id, updated_at FROM feed_cursors WHERE feed_id = $1",
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedCursor::from))
    }

    /// Move the cursor of a feed to `item_id` if it is more recent.
    ///
    /// Returns true if the stored value changed. The write is committed
    /// before this returns.
    pub async fn advance(&self, feed_id: &str, item_id: &ItemId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT last_seen_item_id FROM feed_cursors WHERE feed_id = $1")
                .bind(feed_id)
                .fetch_optional(&mut *tx)
                .await?;

        if let Some(current) = current {
            if !item_id.is_newer_than(&ItemId::new(current)) {
                return Ok(false);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO feed_cursors (feed_id, last_seen_item_id, updated_at)
            VALUES ($1, $2, datetime('now'))
            ON CONFLICT (feed_id) DO UPDATE
            SET last_seen_item_id = excluded.last_seen_item_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(feed_id)
        .bind(item_id.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Cursor for feed {} advanced to {}", feed_id, item_id);
        Ok(true)
    }
}
