//! The fetch session.
//!
//! A [`QuoteSession`] owns the page cache and the metadata estimate for one
//! upstream source. It is shared across concurrent requests through an
//! [`Arc`]; the cache is append-only and the metadata is computed once, on
//! first need.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use quote_grid_orchestrator_models::{
    MetadataSource, PageMetadata, RangeRequest, SessionFlags, SessionStats,
};
use quote_grid_quote_models::Quote;
use quote_grid_scraper::QuoteSource;
use tokio::sync::OnceCell;

use crate::cache::PageCache;
use crate::fetcher::PageFetcher;
use crate::metadata::compute_metadata;
use crate::range::{self, ResolvedRange};
use crate::{OrchestratorConfig, OrchestratorError};

/// Shared state for fetching quotes from one source.
#[derive(Debug)]
pub struct QuoteSession {
    fetcher: PageFetcher,
    metadata: OnceCell<PageMetadata>,
    config: OrchestratorConfig,
    shut_down: AtomicBool,
    started_at: DateTime<Utc>,
}

impl QuoteSession {
    /// Creates a session. Metadata is computed on first need.
    #[must_use]
    pub fn new(source: Arc<dyn QuoteSource>, config: OrchestratorConfig) -> Self {
        Self::build(source, config, OnceCell::new())
    }

    /// Creates a session with known metadata, skipping the walk.
    #[must_use]
    pub fn with_metadata(
        source: Arc<dyn QuoteSource>,
        config: OrchestratorConfig,
        metadata: PageMetadata,
    ) -> Self {
        let session = Self::build(source, config, OnceCell::new_with(Some(metadata)));
        session.fetcher.set_expectation(&metadata);
        session
    }

    fn build(
        source: Arc<dyn QuoteSource>,
        config: OrchestratorConfig,
        metadata: OnceCell<PageMetadata>,
    ) -> Self {
        let fetcher = PageFetcher::new(
            source,
            PageCache::new(config.max_cached_pages),
            config.max_concurrent_fetches,
            config.fetch_timeout(),
        );
        Self {
            fetcher,
            metadata,
            config,
            shut_down: AtomicBool::new(false),
            started_at: Utc::now(),
        }
    }

    /// Computes the metadata now rather than on first request.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::SessionClosed`] after
    /// [`QuoteSession::shutdown`].
    pub async fn initialize(&self) -> Result<PageMetadata, OrchestratorError> {
        self.ensure_open()?;
        let metadata = self.metadata().await;
        log::info!(
            "Session for {} ready: {} pages, {} per page",
            self.fetcher.source().id(),
            metadata.total_pages,
            metadata.min_items_per_page
        );
        Ok(metadata)
    }

    /// Returns the metadata, walking the source the first time.
    ///
    /// Concurrent first callers share one walk. Pages visited by the walk
    /// are cached.
    pub async fn metadata(&self) -> PageMetadata {
        *self
            .metadata
            .get_or_init(|| async {
                let walk = compute_metadata(&self.fetcher, &self.config).await;
                for page in walk.pages {
                    self.fetcher.cache().insert(page.page_number, page.quotes);
                }
                self.fetcher.set_expectation(&walk.metadata);
                walk.metadata
            })
            .await
    }

    /// Returns the metadata if it has been computed.
    #[must_use]
    pub fn metadata_if_ready(&self) -> Option<PageMetadata> {
        self.metadata.get().copied()
    }

    /// Returns the quotes on `page`, or an empty list if it cannot be
    /// fetched.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidRequest`] for page 0, or
    /// [`OrchestratorError::SessionClosed`] after shutdown.
    pub async fn fetch_page(&self, page: u32) -> Result<Arc<[Quote]>, OrchestratorError> {
        self.ensure_open()?;
        if page == 0 {
            return Err(OrchestratorError::invalid("page numbers start at 1"));
        }
        Ok(self.fetcher.fetch_page(page).await)
    }

    /// Returns the quotes at positions `offset..offset + limit`, or as many
    /// as the source holds.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidRequest`] if the range is out of
    /// bounds, or [`OrchestratorError::SessionClosed`] after shutdown.
    pub async fn resolve_range(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Quote>, OrchestratorError> {
        let request = self.validate_range(offset, limit)?;
        Ok(self.resolve_range_detailed(request).await?.quotes)
    }

    /// Resolves `request` without bounds checks and reports how it went.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::SessionClosed`] after shutdown.
    pub async fn resolve_range_detailed(
        &self,
        request: RangeRequest,
    ) -> Result<ResolvedRange, OrchestratorError> {
        self.ensure_open()?;
        let metadata = self.metadata().await;
        Ok(range::resolve(&self.fetcher, &metadata, &self.config, request).await)
    }

    /// Snapshot of cache and fetch counters.
    #[must_use]
    pub fn get_stats(&self) -> SessionStats {
        let counters = self.fetcher.counters();
        let metadata = self.metadata_if_ready();
        let source = metadata.map(|m| m.source);

        SessionStats {
            cached_pages: self.fetcher.cache().len(),
            cached_items: self.fetcher.cache().item_count(),
            total_fetched: counters.items_fetched,
            external_fetches: counters.external_fetches,
            failed_fetches: counters.failed_fetches,
            metadata,
            flags: SessionFlags {
                metadata_ready: metadata.is_some(),
                metadata_fallback: source == Some(MetadataSource::Fallback),
                walk_capped: source == Some(MetadataSource::Capped),
                shut_down: self.is_shut_down(),
            },
            started_at: self.started_at,
        }
    }

    /// Looks up a quote in the cache by id.
    #[must_use]
    pub fn find_cached(&self, id: &str) -> Option<Quote> {
        self.fetcher.cache().find(id)
    }

    /// Drops `page` from the cache so the next request re-fetches it.
    pub fn invalidate_page(&self, page: u32) -> bool {
        let removed = self.fetcher.cache().invalidate(page);
        if removed {
            log::debug!("Invalidated page {page}");
        }
        removed
    }

    /// Drops every cached page. The metadata is kept.
    pub fn clear_cache(&self) {
        self.fetcher.cache().clear();
        log::info!("Cleared page cache");
    }

    /// Releases the session: clears the cache and refuses further requests.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.fetcher.close();
        self.fetcher.cache().clear();
        log::info!("Session for {} shut down", self.fetcher.source().id());
    }

    /// Whether [`QuoteSession::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// The upstream source.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn QuoteSource> {
        self.fetcher.source()
    }

    /// The session configuration.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub(crate) const fn fetcher(&self) -> &PageFetcher {
        &self.fetcher
    }

    pub(crate) fn ensure_open(&self) -> Result<(), OrchestratorError> {
        if self.is_shut_down() {
            Err(OrchestratorError::SessionClosed)
        } else {
            Ok(())
        }
    }
}
