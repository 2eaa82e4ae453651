//! Encyclopedia lookups for the command bot.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://en.wikipedia.org/w/api.php";

/// Longest summary posted to a room, in characters.
pub const MAX_SUMMARY_CHARS: usize = 99;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("lookup request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub title: String,
    pub extract: String,
}

impl Article {
    /// `"title: summary"`, with the extract cut to [`MAX_SUMMARY_CHARS`].
    pub fn summary(&self) -> String {
        format!("{}: {}", self.title, truncate_chars(&self.extract, MAX_SUMMARY_CHARS))
    }
}

/// Cuts `text` to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[async_trait]
pub trait Lookup: Send + Sync {
    /// `Ok(None)` when the encyclopedia has no such page.
    async fn lookup(&self, query: &str) -> Result<Option<Article>, LookupError>;
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    query: Option<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    title: String,
    #[serde(default)]
    extract: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
}

/// MediaWiki `action=query` client returning the intro extract of a page.
#[derive(Debug, Clone)]
pub struct WikipediaClient {
    http: reqwest::Client,
    api_url: String,
}

impl WikipediaClient {
    pub fn new(api_url: impl Into<String>) -> Result<Self, LookupError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("xmpp-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.into(),
        })
    }
}

#[async_trait]
impl Lookup for WikipediaClient {
    async fn lookup(&self, query: &str) -> Result<Option<Article>, LookupError> {
        let response: QueryResponse = self
            .http
            .get(&self.api_url)
            .query(&[
                ("format", "json"),
                ("action", "query"),
                ("prop", "extracts"),
                ("exlimit", "1"),
                ("explaintext", "1"),
                ("exintro", "1"),
                ("formatversion", "2"),
                ("redirects", "1"),
                ("titles", query),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let page = response
            .query
            .and_then(|result| result.pages.into_iter().next())
            .filter(|page| !page.missing && !page.invalid);
        debug!(query, found = page.is_some(), "encyclopedia lookup finished");

        Ok(page.map(|page| Article {
            title: page.title,
            extract: page.extract,
        }))
    }
}
