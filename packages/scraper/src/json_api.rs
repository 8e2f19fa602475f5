//! Paginated JSON quote API client.
//!
//! Handles APIs that answer `GET {base}/api/quotes?page={n}` with a wrapped
//! object carrying a `quotes` array and a `has_next` flag.

use async_trait::async_trait;
use quote_grid_quote_models::Quote;
use serde::Deserialize;

use crate::{QuoteSource, ScrapeConfig, ScrapeError, SourcePage, join_url, retry};

/// Host that relative Goodreads author links are resolved against.
const GOODREADS_BASE: &str = "https://www.goodreads.com";

#[derive(Debug, Deserialize)]
struct ApiPage {
    #[serde(default)]
    has_next: bool,
    #[serde(default)]
    quotes: Vec<ApiQuote>,
}

#[derive(Debug, Deserialize)]
struct ApiQuote {
    text: String,
    #[serde(default)]
    tags: Vec<String>,
    author: ApiAuthor,
}

#[derive(Debug, Deserialize)]
struct ApiAuthor {
    name: String,
    #[serde(default)]
    goodreads_link: Option<String>,
}

/// Client for a paginated JSON quote API.
#[derive(Debug, Clone)]
pub struct JsonQuoteScraper {
    /// Shared scrape configuration.
    config: ScrapeConfig,
    /// Path of the listing endpoint below the base URL.
    endpoint: String,
    /// Query parameter carrying the page number.
    page_param: String,
}

impl JsonQuoteScraper {
    /// Creates a new `JsonQuoteScraper` for `/api/quotes?page=`.
    #[must_use]
    pub fn new(config: ScrapeConfig) -> Self {
        Self {
            config,
            endpoint: "api/quotes".to_owned(),
            page_param: "page".to_owned(),
        }
    }

    /// Sets the listing endpoint path.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        endpoint.clone_into(&mut self.endpoint);
        self
    }

    /// Sets the query parameter name for the page number.
    #[must_use]
    pub fn with_page_param(mut self, param: &str) -> Self {
        param.clone_into(&mut self.page_param);
        self
    }

    /// Builds the full request URL for the given page number.
    #[must_use]
    pub fn page_url(&self, page: u32) -> String {
        let mut url = join_url(&self.config.url, &self.endpoint);
        let separator = if url.contains('?') { '&' } else { '?' };
        url.push(separator);
        url.push_str(&self.page_param);
        url.push('=');
        url.push_str(&page.to_string());
        url
    }

    /// Decodes one API response body into a page of quotes.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Json`] if the body does not match the
    /// expected shape.
    pub fn parse_page(&self, body: &serde_json::Value, page: u32) -> Result<SourcePage, ScrapeError> {
        let api: ApiPage = serde_json::from_value(body.clone())?;
        let source_url = self.page_url(page);

        let quotes = api
            .quotes
            .into_iter()
            .enumerate()
            .map(|(index, quote)| {
                let author_url = quote.author.goodreads_link.map(|link| {
                    if link.starts_with("http") {
                        link
                    } else {
                        join_url(GOODREADS_BASE, &link)
                    }
                });
                Quote::new(
                    &quote.text,
                    &quote.author.name,
                    quote.tags,
                    &source_url,
                    page,
                    u32::try_from(index).unwrap_or(u32::MAX),
                )
                .with_author_url(author_url)
            })
            .collect::<Vec<_>>();

        log::debug!("Page {page}: {} quotes, has_next={}", quotes.len(), api.has_next);

        Ok(SourcePage {
            quotes,
            has_next: api.has_next,
            page_number: page,
        })
    }
}

#[async_trait]
impl QuoteSource for JsonQuoteScraper {
    fn id(&self) -> &'static str {
        "json_quotes"
    }

    async fn fetch_page(&self, page: u32) -> Result<SourcePage, ScrapeError> {
        let client = self.config.build_client()?;
        let url = self.page_url(page);

        log::debug!("Fetching JSON page {page}: {url}");

        let body = retry::send_json(
            || client.get(&url).header("Accept", "application/json"),
            self.config.retry_policy(),
        )
        .await?;
        self.parse_page(&body, page)
    }

    async fn enrich(&self, quote: &Quote) -> Result<Option<String>, ScrapeError> {
        Ok(quote.author_url.clone())
    }
}
