//! Relay types for feed-relay.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::relay::messenger::DeliveryError;

/// Opaque identifier of a feed item, ordered by recency.
///
/// Two all-digit identifiers compare numerically without being parsed into a
/// fixed-width integer. All-digit identifiers sort before any other
/// identifier; the rest compare lexicographically.
#[derive(Debug, Clone)]
pub struct ItemId(String);

impl ItemId {
    /// Create an item ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether this ID is more recent than `other`.
    pub fn is_newer_than(&self, other: &ItemId) -> bool {
        self > other
    }

    fn numeric_digits(&self) -> Option<&str> {
        if !self.0.is_empty() && self.0.bytes().all(|b| b.is_ascii_digit()) {
            Some(self.0.trim_start_matches('0'))
        } else {
            None
        }
    }
}

impl Ord for ItemId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric_digits(), other.numeric_digits()) {
            (Some(a), Some(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for ItemId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ItemId {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ItemId {}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Category flags of an item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemFlags {
    /// The item reshares another item.
    pub reshare: bool,
    /// The item replies to another item.
    pub reply: bool,
}

impl ItemFlags {
    /// Reshares and replies never enter the pipeline.
    pub fn is_excluded(&self) -> bool {
        self.reshare || self.reply
    }
}

/// An item fetched from the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Item ID.
    pub id: ItemId,
    /// Item text.
    pub text: String,
    /// Category flags.
    pub flags: ItemFlags,
}

impl Item {
    /// Create a new item with no category flags.
    pub fn new(id: impl Into<ItemId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            flags: ItemFlags::default(),
        }
    }

    /// Set the category flags.
    pub fn with_flags(mut self, flags: ItemFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Render the outgoing message for this item.
    ///
    /// `{id}` and `{text}` in the template are replaced.
    pub fn render(&self, template: &str) -> String {
        template
            .replace("{id}", self.id.as_str())
            .replace("{text}", &self.text)
    }
}

/// Progress of a feed.
#[derive(Debug, Clone)]
pub struct FeedCursor {
    /// Feed ID.
    pub feed_id: String,
    /// Most recent item processed.
    pub last_seen_item_id: ItemId,
    /// When the cursor last moved.
    pub updated_at: DateTime<Utc>,
}

/// Why a subscription was disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisabledReason {
    /// The tenant opted out.
    OptOut,
    /// Delivery was refused for lack of permission.
    PermissionDenied,
    /// The delivery target no longer exists.
    TargetMissing,
}

impl DisabledReason {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DisabledReason::OptOut => "opt_out",
            DisabledReason::PermissionDenied => "permission_denied",
            DisabledReason::TargetMissing => "target_missing",
        }
    }
}

impl fmt::Display for DisabledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DisabledReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opt_out" => Ok(DisabledReason::OptOut),
            "permission_denied" => Ok(DisabledReason::PermissionDenied),
            "target_missing" => Ok(DisabledReason::TargetMissing),
            _ => Err(format!("unknown disabled reason: {s}")),
        }
    }
}

/// A tenant's subscription to a feed.
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Feed ID.
    pub feed_id: String,
    /// Tenant ID.
    pub tenant_id: String,
    /// Delivery target, opaque to the relay.
    pub target: Option<String>,
    /// Whether the subscription receives fan-out.
    pub enabled: bool,
    /// Why the subscription was last disabled.
    pub disabled_reason: Option<DisabledReason>,
    /// When the subscription was created.
    pub created_at: DateTime<Utc>,
    /// When the subscription was last changed.
    pub updated_at: DateTime<Utc>,
}

/// Kind of a permanent delivery failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentFailure {
    /// The target refused the message.
    PermissionDenied,
    /// The target does not exist anymore.
    TargetMissing,
}

impl PermanentFailure {
    /// Reason recorded on the subscription when it is self-healed.
    pub fn disabled_reason(&self) -> DisabledReason {
        match self {
            PermanentFailure::PermissionDenied => DisabledReason::PermissionDenied,
            PermanentFailure::TargetMissing => DisabledReason::TargetMissing,
        }
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The target accepted the message.
    Delivered,
    /// Delivery failed but may succeed later.
    Transient(String),
    /// Delivery can never succeed for this target.
    Permanent {
        /// Failure kind.
        kind: PermanentFailure,
        /// Detail for logging.
        detail: String,
    },
}

impl DeliveryOutcome {
    /// Classify the result of a send.
    pub fn from_result(result: Result<(), DeliveryError>) -> Self {
        match result {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(DeliveryError::PermissionDenied(detail)) => DeliveryOutcome::Permanent {
                kind: PermanentFailure::PermissionDenied,
                detail,
            },
            Err(DeliveryError::TargetMissing(detail)) => DeliveryOutcome::Permanent {
                kind: PermanentFailure::TargetMissing,
                detail,
            },
            Err(DeliveryError::Transport(detail)) => DeliveryOutcome::Transient(detail),
        }
    }
}

/// Parse a datetime string to DateTime<Utc>.
pub(crate) fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQLite datetime('now') format
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    None
}
