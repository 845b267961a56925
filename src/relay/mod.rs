//! Feed relay module.
//!
//! This module polls an upstream feed and fans new items out to tenant
//! subscriptions.

pub mod cursor;
pub mod dispatcher;
pub mod messenger;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod source;
pub mod types;

pub use cursor::CursorStore;
pub use dispatcher::{DispatchReport, Dispatcher};
pub use messenger::{DeliveryError, Messenger, WebhookMessenger};
pub use pipeline::{CycleReport, FeedRelay};
pub use registry::SubscriptionRegistry;
pub use scheduler::{Scheduler, SchedulerHandle};
pub use source::{FetchError, HttpSourceClient, SourceClient};
pub use types::{
    DeliveryOutcome, DisabledReason, FeedCursor, Item, ItemFlags, ItemId, PermanentFailure,
    Subscription,
};
