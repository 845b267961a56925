//! The feed relay pipeline.
//!
//! [`FeedRelay`] wires the source, cursor store, registry and dispatcher of
//! one feed together and runs a single polling cycle on request.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::db::Database;
use crate::relay::cursor::CursorStore;
use crate::relay::dispatcher::{DispatchReport, Dispatcher};
use crate::relay::messenger::{DeliveryError, Messenger};
use crate::relay::registry::SubscriptionRegistry;
use crate::relay::source::SourceClient;
use crate::relay::types::{DisabledReason, FeedCursor, ItemId, Subscription};
use crate::{RelayError, Result};

/// Summary of one polling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Items returned by the source.
    pub fetched: usize,
    /// Items dispatched and recorded in the cursor.
    pub processed: usize,
    /// Successful deliveries.
    pub delivered: usize,
    /// Transient delivery failures.
    pub transient: usize,
    /// Subscriptions disabled by self-heal.
    pub disabled: usize,
    /// The fetch failed; nothing was dispatched.
    pub fetch_failed: bool,
    /// The cycle stopped early because of cancellation.
    pub cancelled: bool,
}

impl CycleReport {
    fn record(&mut self, dispatch: DispatchReport) {
        self.processed += 1;
        self.delivered += dispatch.delivered;
        self.transient += dispatch.transient;
        self.disabled += dispatch.disabled;
    }
}

/// Relay of one feed to its subscribers.
pub struct FeedRelay {
    feed_id: String,
    source: Arc<dyn SourceClient>,
    messenger: Arc<dyn Messenger>,
    cursors: CursorStore,
    registry: SubscriptionRegistry,
    dispatcher: Dispatcher,
    span: Span,
}

impl FeedRelay {
    /// Create a relay for `feed_id` backed by `db`.
    pub fn new(
        feed_id: impl Into<String>,
        db: &Database,
        source: Arc<dyn SourceClient>,
        messenger: Arc<dyn Messenger>,
        message_template: impl Into<String>,
    ) -> Self {
        let feed_id = feed_id.into();
        let cursors = CursorStore::new(db.pool().clone());
        let registry = SubscriptionRegistry::new(db.pool().clone());
        let dispatcher = Dispatcher::new(registry.clone(), messenger.clone(), message_template);
        let span = info_span!("feed", id = %feed_id);

        Self {
            feed_id,
            source,
            messenger,
            cursors,
            registry,
            dispatcher,
            span,
        }
    }

    /// Get the feed ID.
    pub fn feed_id(&self) -> &str {
        &self.feed_id
    }

    /// Get the subscription registry.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Get the current cursor of the feed.
    pub async fn cursor(&self) -> Result<Option<FeedCursor>> {
        self.cursors.get(&self.feed_id).await
    }

    /// Run one polling cycle.
    ///
    /// Items are dispatched oldest first and the cursor is advanced after
    /// each one. Cancellation is honoured while fetching and between items,
    /// never between an item's dispatch and its cursor advance.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        self.cycle(cancel).instrument(self.span.clone()).await
    }

    async fn cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let mut last_seen: Option<ItemId> = self
            .cursors
            .get(&self.feed_id)
            .await?
            .map(|cursor| cursor.last_seen_item_id);

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Cycle cancelled while fetching");
                report.cancelled = true;
                return Ok(report);
            }
            result = self.source.fetch_since(last_seen.as_ref()) => result,
        };

        let mut items = match fetched {
            Ok(items) => items,
            Err(e) => {
                warn!("Failed to fetch feed: {}", e);
                report.fetch_failed = true;
                return Ok(report);
            }
        };

        report.fetched = items.len();
        if items.is_empty() {
            debug!("No new items");
            return Ok(report);
        }

        // Upstream returns newest first
        items.reverse();

        for item in items {
            if cancel.is_cancelled() {
                debug!("Cycle cancelled before item {}", item.id);
                report.cancelled = true;
                break;
            }

            if let Some(last) = &last_seen {
                if !item.id.is_newer_than(last) {
                    debug!("Skipping item {} (cursor at {})", item.id, last);
                    continue;
                }
            }

            let dispatch = self.dispatcher.deliver(&self.feed_id, &item).await?;
            self.cursors.advance(&self.feed_id, &item.id).await?;
            report.record(dispatch);
            last_seen = Some(item.id);
        }

        if report.processed > 0 {
            info!(
                "Processed {} new item(s): {} delivered, {} transient failure(s), {} subscription(s) disabled",
                report.processed, report.delivered, report.transient, report.disabled
            );
        }
        Ok(report)
    }

    /// Subscribe a tenant, delivering to `target`.
    ///
    /// The caller is responsible for authorizing the tenant. A target that
    /// permanently refuses messages is rejected.
    pub async fn enable_subscription(&self, tenant_id: &str, target: &str) -> Result<Subscription> {
        if tenant_id.trim().is_empty() {
            return Err(RelayError::Validation("tenant ID must not be empty".to_string()));
        }
        if target.trim().is_empty() {
            return Err(RelayError::Validation(
                "delivery target must not be empty".to_string(),
            ));
        }

        match self.messenger.probe(target).await {
            Ok(()) => {}
            Err(e @ (DeliveryError::PermissionDenied(_) | DeliveryError::TargetMissing(_))) => {
                return Err(RelayError::Validation(format!(
                    "cannot deliver to target: {}",
                    e
                )));
            }
            Err(DeliveryError::Transport(e)) => {
                warn!(
                    parent: &self.span,
                    "Could not check target of tenant {}: {}", tenant_id, e
                );
            }
        }

        let subscription = self.registry.enable(&self.feed_id, tenant_id, target).await?;
        info!(parent: &self.span, "Subscription enabled for tenant {}", tenant_id);
        Ok(subscription)
    }

    /// Unsubscribe a tenant.
    ///
    /// Returns true if an enabled subscription was disabled.
    pub async fn disable_subscription(&self, tenant_id: &str) -> Result<bool> {
        let changed = self
            .registry
            .disable(&self.feed_id, tenant_id, DisabledReason::OptOut)
            .await?;
        if changed {
            info!(parent: &self.span, "Subscription disabled for tenant {}", tenant_id);
        }
        Ok(changed)
    }
}
