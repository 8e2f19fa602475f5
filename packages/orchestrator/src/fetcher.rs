//! Page fetcher.
//!
//! Every upstream call in a session, page fetches and enrichment lookups
//! alike, goes through [`PageFetcher`]. It applies the timeouts and the
//! session-wide concurrency limit, keeps the fetch counters, and fronts the
//! [`PageCache`].
//!
//! Failed or timed-out fetches are not cached; the page stays retryable.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use quote_grid_orchestrator_models::PageMetadata;
use quote_grid_quote_models::Quote;
use quote_grid_scraper::{QuoteSource, SourcePage};
use tokio::sync::Semaphore;

use crate::OrchestratorError;
use crate::cache::PageCache;

/// The result of one lenient page fetch.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// The page number.
    pub page: u32,
    /// Its quotes; empty when the fetch failed.
    pub quotes: Arc<[Quote]>,
    /// Whether the fetch failed (as opposed to the page being empty).
    pub failed: bool,
}

/// Upstream counters kept over a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchCounters {
    /// Requests sent upstream.
    pub external_fetches: u64,
    /// Quotes received.
    pub items_fetched: u64,
    /// Requests that failed or timed out.
    pub failed_fetches: u64,
}

/// Fetches pages through the cache, one timeout and one concurrency limit.
pub struct PageFetcher {
    source: Arc<dyn QuoteSource>,
    cache: PageCache,
    permits: Semaphore,
    fetch_timeout: Duration,
    expected_min: AtomicU32,
    expected_pages: AtomicU32,
    external_fetches: AtomicU64,
    items_fetched: AtomicU64,
    failed_fetches: AtomicU64,
}

impl std::fmt::Debug for PageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFetcher")
            .field("source", &self.source.id())
            .field("cached_pages", &self.cache.len())
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}

impl PageFetcher {
    /// Creates a fetcher over `source`.
    #[must_use]
    pub fn new(
        source: Arc<dyn QuoteSource>,
        cache: PageCache,
        max_concurrent_fetches: usize,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            cache,
            permits: Semaphore::new(max_concurrent_fetches.max(1)),
            fetch_timeout,
            expected_min: AtomicU32::new(0),
            expected_pages: AtomicU32::new(0),
            external_fetches: AtomicU64::new(0),
            items_fetched: AtomicU64::new(0),
            failed_fetches: AtomicU64::new(0),
        }
    }

    /// The upstream source.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn QuoteSource> {
        &self.source
    }

    /// The page cache.
    #[must_use]
    pub const fn cache(&self) -> &PageCache {
        &self.cache
    }

    /// Records what a normal page looks like, for anomaly warnings.
    pub fn set_expectation(&self, metadata: &PageMetadata) {
        self.expected_min
            .store(metadata.min_items_per_page, Ordering::Relaxed);
        self.expected_pages
            .store(metadata.total_pages, Ordering::Relaxed);
    }

    /// Snapshot of the upstream counters.
    #[must_use]
    pub fn counters(&self) -> FetchCounters {
        FetchCounters {
            external_fetches: self.external_fetches.load(Ordering::Relaxed),
            items_fetched: self.items_fetched.load(Ordering::Relaxed),
            failed_fetches: self.failed_fetches.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting new upstream requests.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Sends one request upstream, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Timeout`] if the source does not answer
    /// in time, [`OrchestratorError::Source`] if it fails, or
    /// [`OrchestratorError::SessionClosed`] after [`PageFetcher::close`].
    pub async fn fetch_source_page(&self, page: u32) -> Result<SourcePage, OrchestratorError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| OrchestratorError::SessionClosed)?;

        self.external_fetches.fetch_add(1, Ordering::Relaxed);
        log::debug!("Fetching page {page} from {}", self.source.id());

        match tokio::time::timeout(self.fetch_timeout, self.source.fetch_page(page)).await {
            Ok(Ok(source_page)) => {
                self.items_fetched
                    .fetch_add(source_page.quotes.len() as u64, Ordering::Relaxed);
                Ok(source_page)
            }
            Ok(Err(e)) => {
                self.failed_fetches.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
            Err(_) => {
                self.failed_fetches.fetch_add(1, Ordering::Relaxed);
                Err(OrchestratorError::Timeout {
                    page,
                    timeout: self.fetch_timeout,
                })
            }
        }
    }

    /// Returns the quotes on `page`, from the cache when possible.
    ///
    /// # Errors
    ///
    /// Returns the upstream error when the page is not cached and the fetch
    /// fails. Nothing is cached in that case.
    pub async fn try_fetch_page(&self, page: u32) -> Result<Arc<[Quote]>, OrchestratorError> {
        if let Some(quotes) = self.cache.get(page) {
            return Ok(quotes);
        }

        let lock = self.cache.page_lock(page);
        let _guard = lock.lock().await;

        if let Some(quotes) = self.cache.get(page) {
            return Ok(quotes);
        }

        let result = self.fetch_source_page(page).await.map(|source_page| {
            self.check_count(page, source_page.quotes.len());
            self.cache.insert(page, source_page.quotes)
        });
        self.cache.release_lock(page);
        result
    }

    /// Looks up the author link for `quote` upstream.
    ///
    /// Counts as an external fetch and waits for a permit like a page
    /// fetch does. Nothing is cached.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Timeout`] if the source does not answer
    /// within `timeout`, [`OrchestratorError::Source`] if it fails, or
    /// [`OrchestratorError::SessionClosed`] after [`PageFetcher::close`].
    pub async fn fetch_author_link(
        &self,
        quote: &Quote,
        timeout: Duration,
    ) -> Result<Option<String>, OrchestratorError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| OrchestratorError::SessionClosed)?;

        self.external_fetches.fetch_add(1, Ordering::Relaxed);
        log::debug!("Enriching '{}' from {}", quote.author, self.source.id());

        match tokio::time::timeout(timeout, self.source.enrich(quote)).await {
            Ok(Ok(link)) => Ok(link),
            Ok(Err(e)) => {
                self.failed_fetches.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
            Err(_) => {
                self.failed_fetches.fetch_add(1, Ordering::Relaxed);
                Err(OrchestratorError::Timeout {
                    page: quote.page_number,
                    timeout,
                })
            }
        }
    }

    /// Returns the quotes on `page`, or an empty list if the fetch fails.
    pub async fn fetch_page(&self, page: u32) -> Arc<[Quote]> {
        self.fetch_lenient(page).await.quotes
    }

    /// Fetches `pages` jointly. Results come back in the order requested,
    /// whatever order the fetches finish in.
    pub async fn fetch_many(&self, pages: impl IntoIterator<Item = u32>) -> Vec<FetchedPage> {
        join_all(pages.into_iter().map(|page| self.fetch_lenient(page))).await
    }

    async fn fetch_lenient(&self, page: u32) -> FetchedPage {
        match self.try_fetch_page(page).await {
            Ok(quotes) => FetchedPage {
                page,
                quotes,
                failed: false,
            },
            Err(e) => {
                log::warn!("Page {page} fetch failed, continuing without it: {e}");
                FetchedPage {
                    page,
                    quotes: Arc::from(Vec::new()),
                    failed: true,
                }
            }
        }
    }

    fn check_count(&self, page: u32, count: usize) {
        let expected_min = self.expected_min.load(Ordering::Relaxed);
        let expected_pages = self.expected_pages.load(Ordering::Relaxed);

        if count == 0 {
            if expected_pages == 0 || page <= expected_pages {
                log::warn!("Page {page} returned no quotes");
            } else {
                log::debug!("Page {page} beyond the walked range is empty");
            }
        } else if count < expected_min as usize {
            log::warn!(
                "Page {page} returned {count} quotes, fewer than the {expected_min} expected per page"
            );
        }
    }
}
