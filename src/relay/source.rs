//! Upstream feed client.
//!
//! This module turns the upstream HTTP contract into a list of [`Item`]s
//! newer than a cursor, newest first.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::FeedConfig;
use crate::relay::types::{Item, ItemFlags, ItemId};
use crate::{RelayError, Result};

/// User agent string for feed fetching.
const USER_AGENT: &str = "feed-relay/0.1 (poller)";

/// Maximum response size in bytes (5MB).
const MAX_RESPONSE_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum length of an error body kept for logging.
const MAX_ERROR_BODY: usize = 512;

/// Fields requested so replies and reshares can be recognised.
const ITEM_FIELDS: &str = "referenced_tweets,in_reply_to_user_id";

/// Transient failure of a fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Upstream answered with a non-success status.
    #[error("HTTP error {status}: {body}")]
    Status {
        /// Status code.
        status: u16,
        /// Start of the response body.
        body: String,
    },

    /// The request could not be completed.
    #[error("failed to fetch feed: {0}")]
    Transport(String),

    /// The response was not the expected JSON.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// New items span more pages than one fetch may read.
    #[error("new items exceed {pages} page(s); raise feed.max_pages or feed.max_results")]
    TooManyPages {
        /// Page limit that was reached.
        pages: u32,
    },
}

/// Source of feed items.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch items newer than `cursor`, newest first.
    ///
    /// Either every item newer than `cursor` is returned or the fetch fails.
    /// Reshares and replies are never returned. No new items is an empty
    /// list, not an error.
    async fn fetch_since(
        &self,
        cursor: Option<&ItemId>,
    ) -> std::result::Result<Vec<Item>, FetchError>;
}

#[derive(Debug, Deserialize)]
struct FeedPage {
    #[serde(default)]
    data: Vec<RawItem>,
    #[serde(default)]
    meta: FeedMeta,
}

#[derive(Debug, Default, Deserialize)]
struct FeedMeta {
    #[serde(default)]
    result_count: u32,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    referenced_tweets: Vec<ReferencedItem>,
    in_reply_to_user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReferencedItem {
    #[serde(rename = "type")]
    kind: String,
}

impl RawItem {
    fn into_item(self) -> Item {
        let mut flags = ItemFlags {
            reshare: false,
            reply: self.in_reply_to_user_id.is_some(),
        };
        for reference in &self.referenced_tweets {
            match reference.kind.as_str() {
                "retweeted" => flags.reshare = true,
                "replied_to" => flags.reply = true,
                _ => {}
            }
        }
        Item::new(self.id, self.text).with_flags(flags)
    }
}

/// Decode one page of the upstream response.
fn parse_page(bytes: &[u8]) -> std::result::Result<FeedPage, FetchError> {
    let page: FeedPage =
        serde_json::from_slice(bytes).map_err(|e| FetchError::Decode(e.to_string()))?;
    if page.meta.result_count as usize != page.data.len() {
        debug!(
            "result_count {} differs from {} returned item(s)",
            page.meta.result_count,
            page.data.len()
        );
    }
    Ok(page)
}

/// HTTP implementation of [`SourceClient`].
pub struct HttpSourceClient {
    client: Client,
    endpoint: url::Url,
    bearer_token: String,
    exclude: String,
    max_results: u32,
    max_pages: u32,
}

impl HttpSourceClient {
    /// Create a client from the feed configuration.
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let endpoint = url::Url::parse(&config.endpoint)
            .map_err(|e| RelayError::Config(format!("invalid feed endpoint: {}", e)))?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .timeout(Duration::from_secs(config.total_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RelayError::Http(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            bearer_token: config.bearer_token.clone(),
            exclude: config.exclude.clone(),
            max_results: config.max_results,
            max_pages: config.max_pages.max(1),
        })
    }

    async fn fetch_page(
        &self,
        cursor: Option<&ItemId>,
        pagination_token: Option<&str>,
    ) -> std::result::Result<FeedPage, FetchError> {
        let mut request = self
            .client
            .get(self.endpoint.clone())
            .bearer_auth(&self.bearer_token)
            .query(&[
                ("max_results", self.max_results.to_string().as_str()),
                ("tweet.fields", ITEM_FIELDS),
            ]);
        if !self.exclude.is_empty() {
            request = request.query(&[("exclude", self.exclude.as_str())]);
        }
        if let Some(cursor) = cursor {
            request = request.query(&[("since_id", cursor.as_str())]);
        }
        if let Some(token) = pagination_token {
            request = request.query(&[("pagination_token", token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        if let Some(content_length) = response.content_length() {
            if content_length > MAX_RESPONSE_SIZE {
                return Err(FetchError::Decode(format!(
                    "response too large: {} bytes (max {} bytes)",
                    content_length, MAX_RESPONSE_SIZE
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(format!("failed to read response: {}", e)))?;

        if bytes.len() as u64 > MAX_RESPONSE_SIZE {
            return Err(FetchError::Decode(format!(
                "response too large: {} bytes (max {} bytes)",
                bytes.len(),
                MAX_RESPONSE_SIZE
            )));
        }

        parse_page(&bytes)
    }
}

#[async_trait]
impl SourceClient for HttpSourceClient {
    async fn fetch_since(
        &self,
        cursor: Option<&ItemId>,
    ) -> std::result::Result<Vec<Item>, FetchError> {
        let mut items = Vec::new();
        let mut pagination_token: Option<String> = None;

        for page_number in 1..=self.max_pages {
            let page = self
                .fetch_page(cursor, pagination_token.as_deref())
                .await?;

            items.extend(
                page.data
                    .into_iter()
                    .map(RawItem::into_item)
                    .filter(|item| !item.flags.is_excluded()),
            );

            match page.meta.next_token {
                Some(token) if page_number < self.max_pages => pagination_token = Some(token),
                // Older unseen items remain; a partial batch would let the
                // cursor jump over them
                Some(_) => return Err(FetchError::TooManyPages { pages: self.max_pages }),
                None => break,
            }
        }

        debug!("Fetched {} item(s) from {}", items.len(), self.endpoint);
        Ok(items)
    }
}
