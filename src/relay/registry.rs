//! Subscription registry.
//!
//! Subscriptions are never deleted. Opting out and self-healing both clear
//! the enabled flag and record why.

use chrono::Utc;

use crate::db::DbPool;
use crate::relay::types::{parse_datetime, DisabledReason, Subscription};
use crate::{RelayError, Result};

/// Row type for a subscription.
#[derive(Debug, Clone, sqlx::FromRow)]
struct SubscriptionRow {
    feed_id: String,
    tenant_id: String,
    target: Option<String>,
    enabled: bool,
    disabled_reason: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Subscription {
            feed_id: row.feed_id,
            tenant_id: row.tenant_id,
            target: row.target,
            enabled: row.enabled,
            disabled_reason: row.disabled_reason.and_then(|s| s.parse().ok()),
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
            updated_at: parse_datetime(&row.updated_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Registry of tenant subscriptions.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    pool: DbPool,
}

impl SubscriptionRegistry {
    /// Create a new registry on the given pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// List subscriptions of a feed that receive fan-out.
    ///
    /// Subscriptions without a target are never listed.
    pub async fn list_enabled(&self, feed_id: &str) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT feed_id, tenant_id, target, enabled, disabled_reason, created_at, updated_at
            FROM subscriptions
            WHERE feed_id = $1 AND enabled = 1 AND target IS NOT NULL
            "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Subscription::from).collect())
    }

    /// List every subscription of a feed, enabled or not.
    pub async fn list_all(&self, feed_id: &str) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT feed_id, tenant_id, target, enabled, disabled_reason, created_at, updated_at
            FROM subscriptions
            WHERE feed_id = $1
            ORDER BY tenant_id ASC
            "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Subscription::from).collect())
    }

    /// Get the subscription of a tenant.
    pub async fn get(&self, feed_id: &str, tenant_id: &str) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT feed_id, tenant_id, target, enabled, disabled_reason, created_at, updated_at
            FROM subscriptions
            WHERE feed_id = $1 AND tenant_id = $2
            "#,
        )
        .bind(feed_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Subscription::from))
    }

    /// Count subscriptions receiving fan-out.
    pub async fn count_enabled(&self, feed_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM subscriptions WHERE feed_id = $1 AND enabled = 1 AND target IS NOT NULL",
        )
        .bind(feed_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Create or re-enable the subscription of a tenant.
    ///
    /// The target replaces any previous one.
    pub async fn enable(&self, feed_id: &str, tenant_id: &str, target: &str) -> Result<Subscription> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (feed_id, tenant_id, target, enabled)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (feed_id, tenant_id) DO UPDATE
            SET target = excluded.target,
                enabled = 1,
                disabled_reason = NULL,
                updated_at = datetime('now')
            "#,
        )
        .bind(feed_id)
        .bind(tenant_id)
        .bind(target)
        .execute(&self.pool)
        .await?;

        self.get(feed_id, tenant_id)
            .await?
            .ok_or_else(|| RelayError::NotFound("subscription".to_string()))
    }

    /// Disable the subscription of a tenant.
    ///
    /// Returns true if an enabled subscription was disabled. Disabling a
    /// disabled or unknown subscription changes nothing.
    pub async fn disable(
        &self,
        feed_id: &str,
        tenant_id: &str,
        reason: DisabledReason,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET enabled = 0,
                disabled_reason = $1,
                updated_at = datetime('now')
            WHERE feed_id = $2 AND tenant_id = $3 AND enabled = 1
            "#,
        )
        .bind(reason.as_str())
        .bind(feed_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Disable the subscription of a tenant only while it still delivers to
    /// `target`.
    ///
    /// Used by self-heal: if the tenant re-enabled with another target while
    /// a send to the old one was in flight, the new subscription is kept.
    pub async fn disable_if_target(
        &self,
        feed_id: &str,
        tenant_id: &str,
        target: &str,
        reason: DisabledReason,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET enabled = 0,
                disabled_reason = $1,
                updated_at = datetime('now')
            WHERE feed_id = $2 AND tenant_id = $3 AND target = $4 AND enabled = 1
            "#,
        )
        .bind(reason.as_str())
        .bind(feed_id)
        .bind(tenant_id)
        .bind(target)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
