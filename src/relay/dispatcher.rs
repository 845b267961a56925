//! Fan-out of one item to every enabled subscription.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::relay::messenger::Messenger;
use crate::relay::registry::SubscriptionRegistry;
use crate::relay::types::{DeliveryOutcome, Item, PermanentFailure, Subscription};
use crate::Result;

/// Counts of delivery outcomes for one item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscriptions that received the item.
    pub delivered: usize,
    /// Subscriptions that failed transiently.
    pub transient: usize,
    /// Subscriptions whose target failed permanently.
    pub failed_permanently: usize,
    /// Subscriptions disabled by self-heal.
    pub disabled: usize,
}

impl DispatchReport {
    /// Number of delivery attempts.
    pub fn attempts(&self) -> usize {
        self.delivered + self.transient + self.failed_permanently
    }
}

/// Delivers items to subscriptions and self-heals broken ones.
pub struct Dispatcher {
    registry: SubscriptionRegistry,
    messenger: Arc<dyn Messenger>,
    message_template: String,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(
        registry: SubscriptionRegistry,
        messenger: Arc<dyn Messenger>,
        message_template: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            messenger,
            message_template: message_template.into(),
        }
    }

    /// Deliver `item` to every enabled subscription of `feed_id`.
    ///
    /// Attempts run concurrently and independently. A permanent failure
    /// disables the subscription; a transient one is only logged.
    pub async fn deliver(&self, feed_id: &str, item: &Item) -> Result<DispatchReport> {
        let subscriptions = self.registry.list_enabled(feed_id).await?;
        if subscriptions.is_empty() {
            debug!("No subscriptions for item {}", item.id);
            return Ok(DispatchReport::default());
        }

        let text = item.render(&self.message_template);
        let attempts = subscriptions
            .iter()
            .map(|subscription| self.attempt(subscription, &text));
        let outcomes = join_all(attempts).await;

        let mut report = DispatchReport::default();
        for (subscription, outcome) in subscriptions.iter().zip(outcomes) {
            match outcome {
                DeliveryOutcome::Delivered => report.delivered += 1,
                DeliveryOutcome::Transient(reason) => {
                    warn!(
                        "Transient delivery failure for tenant {} (item {}): {}",
                        subscription.tenant_id, item.id, reason
                    );
                    report.transient += 1;
                }
                DeliveryOutcome::Permanent { kind, detail } => {
                    self.self_heal(feed_id, subscription, kind, &detail, &mut report)
                        .await;
                }
            }
        }

        info!(
            "Item {} delivered to {} of {} subscription(s)",
            item.id,
            report.delivered,
            report.attempts()
        );
        Ok(report)
    }

    /// Disable a subscription whose target failed permanently.
    ///
    /// The subscription is left alone if its target changed since the
    /// attempt. Registry errors are logged, never returned.
    async fn self_heal(
        &self,
        feed_id: &str,
        subscription: &Subscription,
        kind: PermanentFailure,
        detail: &str,
        report: &mut DispatchReport,
    ) {
        let Some(target) = subscription.target.as_deref() else {
            return;
        };
        report.failed_permanently += 1;

        match self
            .registry
            .disable_if_target(feed_id, &subscription.tenant_id, target, kind.disabled_reason())
            .await
        {
            Ok(true) => {
                warn!(
                    "Disabled subscription of tenant {}: {}",
                    subscription.tenant_id, detail
                );
                report.disabled += 1;
            }
            Ok(false) => debug!(
                "Subscription of tenant {} changed during delivery; not disabled",
                subscription.tenant_id
            ),
            Err(e) => error!(
                "Failed to disable subscription of tenant {}: {}",
                subscription.tenant_id, e
            ),
        }
    }

    async fn attempt(&self, subscription: &Subscription, text: &str) -> DeliveryOutcome {
        // list_enabled never returns subscriptions without a target
        let Some(target) = subscription.target.as_deref() else {
            return DeliveryOutcome::Transient("subscription has no target".to_string());
        };
        DeliveryOutcome::from_result(self.messenger.send(target, text).await)
    }
}
