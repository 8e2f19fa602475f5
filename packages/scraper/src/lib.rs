#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Paginated quote sources.
//!
//! Provides the [`QuoteSource`] trait the fetch orchestrator consumes, and
//! two concrete implementations: an HTML page scraper ([`html_quotes`]) and
//! a paginated JSON API client ([`json_api`]). Both route their HTTP calls
//! through [`retry`].
//!
//! This crate knows nothing about caching or range arithmetic. It turns one
//! page number into one ordered list of [`Quote`]s.

pub mod html_quotes;
pub mod json_api;
pub mod retry;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use quote_grid_quote_models::Quote;

/// Errors that can occur while fetching from a quote source.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    /// An HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-retryable or exhausted status.
    #[error("HTTP status {status} for {url}")]
    Status {
        /// The response status code.
        status: u16,
        /// The requested URL.
        url: String,
    },

    /// Parsing the response body failed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// JSON decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single page of quotes.
#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    /// Quotes on this page, in source order.
    pub quotes: Vec<Quote>,
    /// Whether the source links to a page after this one.
    pub has_next: bool,
    /// The 1-based page number of this result set.
    pub page_number: u32,
}

/// Configuration shared across source implementations.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Base URL of the source.
    pub url: String,
    /// Additional HTTP headers to include in requests.
    pub headers: BTreeMap<String, String>,
    /// Per-request timeout applied by the HTTP client.
    pub request_timeout: Duration,
    /// How many times a transient failure is retried.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub retry_base_delay: Duration,
}

impl ScrapeConfig {
    /// Creates a new `ScrapeConfig` with the given base URL and sensible
    /// defaults.
    #[must_use]
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            headers: BTreeMap::new(),
            request_timeout: Duration::from_secs(20),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(500),
        }
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry budget for transient failures.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub const fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Adds an HTTP header to include in requests.
    #[must_use]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_owned(), value.to_owned());
        self
    }

    /// Builds a [`reqwest::Client`] with the configured headers and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Parse`] if a header name or value is invalid,
    /// or [`ScrapeError::Http`] if the client cannot be built.
    pub fn build_client(&self) -> Result<reqwest::Client, ScrapeError> {
        let mut header_map = reqwest::header::HeaderMap::new();
        for (key, value) in &self.headers {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| ScrapeError::Parse(format!("invalid header name '{key}': {e}")))?;
            let val = reqwest::header::HeaderValue::from_str(value)
                .map_err(|e| ScrapeError::Parse(format!("invalid header value '{value}': {e}")))?;
            header_map.insert(name, val);
        }
        reqwest::Client::builder()
            .default_headers(header_map)
            .timeout(self.request_timeout)
            .build()
            .map_err(ScrapeError::Http)
    }

    /// Returns the retry policy described by this configuration.
    #[must_use]
    pub const fn retry_policy(&self) -> retry::RetryPolicy {
        retry::RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.retry_base_delay,
        }
    }
}

/// A paginated upstream that yields quotes page by page.
///
/// Pages are 1-based. Implementations must return quotes in the order the
/// source lists them; callers rely on that order for offset arithmetic.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Returns a short identifier for this source (e.g. `"html_quotes"`).
    fn id(&self) -> &str;

    /// Fetches one page: its quotes and whether a next page exists.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError`] if the HTTP request or parsing fails.
    async fn fetch_page(&self, page: u32) -> Result<SourcePage, ScrapeError>;

    /// Returns the quotes on `page`.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError`] if the page cannot be fetched.
    async fn list_items(&self, page: u32) -> Result<Vec<Quote>, ScrapeError> {
        Ok(self.fetch_page(page).await?.quotes)
    }

    /// Returns whether a page follows `page`.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError`] if the page cannot be fetched.
    async fn has_next_page(&self, page: u32) -> Result<bool, ScrapeError> {
        Ok(self.fetch_page(page).await?.has_next)
    }

    /// Looks up a supplementary link for `quote` (e.g. the author's
    /// Goodreads page).
    ///
    /// The default implementation has nothing to add.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError`] if the lookup request fails.
    async fn enrich(&self, quote: &Quote) -> Result<Option<String>, ScrapeError> {
        let _ = quote;
        Ok(None)
    }
}

/// Which concrete source to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    /// HTML pages at `{base}/page/{n}/`.
    #[default]
    Html,
    /// JSON pages at `{base}/api/quotes?page={n}`.
    Json,
}

impl std::str::FromStr for SourceKind {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(Self::Html),
            "json" => Ok(Self::Json),
            other => Err(ScrapeError::Parse(format!("unknown source kind '{other}'"))),
        }
    }
}

/// Builds a boxed source of the requested kind.
#[must_use]
pub fn build_source(
    kind: SourceKind,
    config: ScrapeConfig,
) -> std::sync::Arc<dyn QuoteSource> {
    match kind {
        SourceKind::Html => std::sync::Arc::new(html_quotes::HtmlQuoteScraper::new(config)),
        SourceKind::Json => std::sync::Arc::new(json_api::JsonQuoteScraper::new(config)),
    }
}

/// A Goodreads search link for `author`, used when no author page could be
/// resolved.
#[must_use]
pub fn author_search_url(author: &str) -> String {
    reqwest::Url::parse_with_params("https://www.goodreads.com/search", [("q", author.trim())])
        .map_or_else(
            |_| format!("https://www.goodreads.com/search?q={}", author.trim().replace(' ', "+")),
            String::from,
        )
}

/// Joins a base URL and a path, tolerating a missing or doubled slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
