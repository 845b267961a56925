//! Feed relay
//!
//! Polls an upstream feed and delivers each new item to every subscribed
//! tenant. Delivery is at least once: the durable cursor moves past an item
//! only after its fan-out, so an item interrupted by a crash is delivered
//! again on restart, and no item is ever skipped.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod relay;

pub use config::Config;
pub use db::Database;
pub use error::{RelayError, Result};
pub use relay::{
    CycleReport, DeliveryError, FeedRelay, HttpSourceClient, Item, ItemId, Messenger, Scheduler,
    SchedulerHandle, SourceClient, Subscription, SubscriptionRegistry, WebhookMessenger,
};
