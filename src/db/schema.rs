//! Database schema and migrations for feed-relay.
//!
//! Migrations are applied in order; the schema_version table records
//! which ones have run.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: Feed cursors
    r#"
-- Last processed item per feed
CREATE TABLE feed_cursors (
    feed_id             TEXT PRIMARY KEY,
    last_seen_item_id   TEXT NOT NULL,
    updated_at          TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
    // v2: Subscriptions
    r#"
-- Tenant subscriptions; rows are disabled, never deleted
CREATE TABLE subscriptions (
    feed_id         TEXT NOT NULL,
    tenant_id       TEXT NOT NULL,
    target          TEXT,
    enabled         INTEGER NOT NULL DEFAULT 1,
    disabled_reason TEXT,                -- 'opt_out', 'permission_denied', 'target_missing'
    created_at      TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (feed_id, tenant_id)
);

CREATE INDEX idx_subscriptions_enabled ON subscriptions(feed_id, enabled);
"#,
];
