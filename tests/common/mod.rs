//! Test helpers for relay integration tests.
//!
//! Provides an in-memory upstream, a recording messenger, and helpers to
//! wire them into a [`FeedRelay`].

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use feed_relay::relay::FetchError;
use feed_relay::{Database, DeliveryError, FeedRelay, Item, ItemId, Messenger, SourceClient};

/// Feed ID used by the tests.
pub const FEED: &str = "lotro";

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upstream feed held in memory.
///
/// Items are stored newest first, the way the real upstream returns them.
#[derive(Default)]
pub struct FakeSource {
    items: Mutex<Vec<Item>>,
    failing: AtomicBool,
    ignore_cursor: AtomicBool,
    calls: AtomicUsize,
    cursors: Mutex<Vec<Option<String>>>,
}

impl FakeSource {
    /// Create a source publishing the given IDs, newest first.
    pub fn with_ids(ids: &[&str]) -> Arc<Self> {
        let source = Arc::new(Self::default());
        source.set_ids(ids);
        source
    }

    /// Replace the published items. Each item's text is its ID.
    pub fn set_ids(&self, ids: &[&str]) {
        *self.items.lock().unwrap() = ids.iter().map(|id| Item::new(*id, *id)).collect();
    }

    /// Make every fetch fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Return every item regardless of the cursor.
    pub fn set_ignore_cursor(&self, ignore: bool) {
        self.ignore_cursor.store(ignore, Ordering::SeqCst);
    }

    /// Number of fetches so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Cursors passed to each fetch.
    pub fn cursors(&self) -> Vec<Option<String>> {
        self.cursors.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceClient for FakeSource {
    async fn fetch_since(&self, cursor: Option<&ItemId>) -> Result<Vec<Item>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.cursors
            .lock()
            .unwrap()
            .push(cursor.map(|c| c.as_str().to_string()));

        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Status {
                status: 503,
                body: "Service Unavailable".to_string(),
            });
        }

        let ignore_cursor = self.ignore_cursor.load(Ordering::SeqCst);
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|item| ignore_cursor || cursor.map_or(true, |c| item.id.is_newer_than(c)))
            .cloned()
            .collect())
    }
}

/// Messenger recording every attempt.
#[derive(Default)]
pub struct RecordingMessenger {
    attempts: Mutex<Vec<(String, String)>>,
    delivered: Mutex<Vec<(String, String)>>,
    failures: Mutex<HashMap<String, DeliveryError>>,
    hang_on: Mutex<Option<String>>,
    /// Notified when a send reaches the text set by [`Self::hang_on`].
    pub reached: Notify,
}

impl RecordingMessenger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every send to `target` with `error`.
    pub fn fail(&self, target: &str, error: DeliveryError) {
        self.failures
            .lock()
            .unwrap()
            .insert(target.to_string(), error);
    }

    /// Stop failing sends to `target`.
    pub fn heal(&self, target: &str) {
        self.failures.lock().unwrap().remove(target);
    }

    /// Never complete a send of `text`.
    pub fn hang_on(&self, text: &str) {
        *self.hang_on.lock().unwrap() = Some(text.to_string());
    }

    /// Texts delivered to `target`, in order.
    pub fn delivered_to(&self, target: &str) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Number of attempts made to `target`, failed or not.
    pub fn attempts_to(&self, target: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == target)
            .count()
    }

    /// Total number of successful deliveries.
    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(&self, target: &str, text: &str) -> Result<(), DeliveryError> {
        self.attempts
            .lock()
            .unwrap()
            .push((target.to_string(), text.to_string()));

        let hang = self.hang_on.lock().unwrap().as_deref() == Some(text);
        if hang {
            self.reached.notify_one();
            std::future::pending::<()>().await;
        }

        if let Some(error) = self.failures.lock().unwrap().get(target) {
            return Err(error.clone());
        }

        self.delivered
            .lock()
            .unwrap()
            .push((target.to_string(), text.to_string()));
        Ok(())
    }
}

/// Build a relay for [`FEED`] on `db`. Messages are the bare item ID.
pub fn relay_on(db: &Database, source: Arc<FakeSource>, messenger: Arc<RecordingMessenger>) -> FeedRelay {
    FeedRelay::new(FEED, db, source, messenger, "{id}")
}

/// Build a relay on a fresh in-memory database.
pub async fn setup_relay(
    source: Arc<FakeSource>,
    messenger: Arc<RecordingMessenger>,
) -> (Database, FeedRelay) {
    let db = Database::open_in_memory().await.unwrap();
    let relay = relay_on(&db, source, messenger);
    (db, relay)
}

/// Serve `app` on an ephemeral local port.
pub async fn spawn_server(app: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
