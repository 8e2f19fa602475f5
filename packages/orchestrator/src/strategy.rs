//! Strategy selection.
//!
//! Small requests sample a few random pages; larger ones resolve the range
//! from offset 0. Bulk fetches that fail outright degrade to one fetch per
//! position, so a caller always gets a cell for every position it can.

use std::collections::BTreeSet;

use futures::StreamExt;
use quote_grid_orchestrator_models::{RangePage, RangeRequest};
use quote_grid_quote_models::{Cell, PlaceholderReason, Quote};
use rand::seq::SliceRandom;

use crate::OrchestratorError;
use crate::range::{self, ResolvedRange};
use crate::session::QuoteSession;

/// Cells from one bulk fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCells {
    /// One cell per resolved position, in position order.
    pub cells: Vec<Cell>,
    /// Whether positions after the batch may hold quotes.
    pub has_more: bool,
    /// Whether the bulk fetch failed and positions were fetched one by one.
    pub degraded: bool,
}

impl QuoteSession {
    /// Returns `count` quotes: a random sample for small counts, the first
    /// `count` quotes otherwise. Positions that could not be fetched come
    /// back as placeholders.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidRequest`] if `count` is out of
    /// bounds, or [`OrchestratorError::SessionClosed`] after shutdown.
    pub async fn get_random_items(&self, count: u64) -> Result<Vec<Cell>, OrchestratorError> {
        self.validate_count(count)?;

        if count <= self.config().small_subset_max {
            let quotes = self.random_subset(count).await?;
            return Ok(quotes.into_iter().map(Cell::Real).collect());
        }

        Ok(self.fetch_batch(RangeRequest::new(0, count)).await?.cells)
    }

    /// Returns `count` quotes chosen by request size, without placeholders.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidRequest`] if `count` is out of
    /// bounds, or [`OrchestratorError::SessionClosed`] after shutdown.
    pub async fn get_items(&self, count: u64) -> Result<Vec<Quote>, OrchestratorError> {
        self.validate_count(count)?;

        if count <= self.config().small_subset_max {
            self.random_subset(count).await
        } else {
            Ok(self.resolve_range_detailed(RangeRequest::new(0, count)).await?.quotes)
        }
    }

    /// Returns the cells at positions `offset..offset + limit` with an
    /// estimated total.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidRequest`] if the range is out of
    /// bounds, or [`OrchestratorError::SessionClosed`] after shutdown.
    pub async fn get_range(&self, offset: u64, limit: u64) -> Result<RangePage, OrchestratorError> {
        let request = self.validate_range(offset, limit)?;
        let batch = self.fetch_batch(request).await?;
        let metadata = self.metadata().await;

        let seen = offset + batch.cells.len() as u64;
        let total = if batch.has_more {
            metadata.estimated_total.max(seen)
        } else {
            seen
        };

        Ok(RangePage {
            items: batch.cells,
            total,
            has_more: batch.has_more,
        })
    }

    /// Fetches `request` in bulk, degrading to per-position fetches when
    /// every page fails or the batch exceeds the bulk timeout.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::SessionClosed`] after shutdown.
    pub async fn fetch_batch(&self, request: RangeRequest) -> Result<BatchCells, OrchestratorError> {
        let timeout = self.config().bulk_timeout();

        match tokio::time::timeout(timeout, self.resolve_range_detailed(request)).await {
            Ok(Ok(resolved)) if !resolved.all_failed() => Ok(Self::bulk_cells(resolved)),
            Ok(Ok(resolved)) => {
                log::warn!(
                    "Bulk fetch of {}..{} failed on pages {:?}, fetching positions one by one",
                    request.offset,
                    request.end(),
                    resolved.failed_pages
                );
                self.fetch_each(request).await
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                log::warn!(
                    "Bulk fetch of {}..{} exceeded {timeout:?}, fetching positions one by one",
                    request.offset,
                    request.end()
                );
                self.fetch_each(request).await
            }
        }
    }

    /// Fetches the quote at a single logical position.
    ///
    /// Never fails: a fetch error, a timeout or the end of the source each
    /// produce a placeholder.
    pub async fn get_item_at(&self, position: u64) -> Cell {
        if self.ensure_open().is_err() {
            return Cell::placeholder(position, PlaceholderReason::FetchFailed);
        }

        let metadata = self.metadata().await;
        let plan = range::plan(RangeRequest::new(position, 1), range::per_page(&metadata, self.config()));
        let horizon = range::horizon(&metadata, self.config());

        let mut page = plan.start_page;
        let mut index = usize::try_from(plan.local_start).unwrap_or(usize::MAX);

        while page <= horizon {
            let quotes = match self.fetcher().try_fetch_page(page).await {
                Ok(quotes) => quotes,
                Err(e) => {
                    log::warn!("Fetch of position {position} failed: {e}");
                    let reason = if e.is_timeout() {
                        PlaceholderReason::TimedOut
                    } else {
                        PlaceholderReason::FetchFailed
                    };
                    return Cell::placeholder(position, reason);
                }
            };

            if let Some(quote) = quotes.get(index) {
                return Cell::Real(quote.clone());
            }
            if quotes.is_empty() && !metadata.is_complete() && page > metadata.total_pages {
                break;
            }
            index -= quotes.len();
            page += 1;
        }

        Cell::placeholder(position, PlaceholderReason::Exhausted)
    }

    async fn fetch_each(&self, request: RangeRequest) -> Result<BatchCells, OrchestratorError> {
        self.ensure_open()?;

        let mut cells: Vec<Cell> = futures::stream::iter(request.positions())
            .map(|position| self.get_item_at(position))
            .buffered(self.config().max_concurrent_fetches)
            .collect()
            .await;

        while matches!(
            cells.last(),
            Some(Cell::Placeholder {
                reason: PlaceholderReason::Exhausted,
                ..
            })
        ) {
            cells.pop();
        }

        let has_more = cells.len() as u64 == request.limit;
        Ok(BatchCells {
            cells,
            has_more,
            degraded: true,
        })
    }

    fn bulk_cells(resolved: ResolvedRange) -> BatchCells {
        let has_more = resolved.has_more();
        BatchCells {
            cells: resolved.quotes.into_iter().map(Cell::Real).collect(),
            has_more,
            degraded: false,
        }
    }

    async fn random_subset(&self, count: u64) -> Result<Vec<Quote>, OrchestratorError> {
        self.ensure_open()?;

        let metadata = self.metadata().await;
        let per_page = u64::from(range::per_page(&metadata, self.config()));
        let total_pages = metadata.total_pages;
        let wanted = usize::try_from(count).unwrap_or(usize::MAX);

        let cap = u64::from((total_pages / 2).max(1));
        let mut pages_needed = count.div_ceil(per_page).min(cap);

        let mut unvisited: Vec<u32> = (1..=total_pages).collect();
        unvisited.shuffle(&mut rand::thread_rng());

        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut pool: Vec<Quote> = Vec::with_capacity(wanted);

        while pool.len() < wanted && !unvisited.is_empty() {
            let take = usize::try_from(pages_needed).unwrap_or(1).clamp(1, unvisited.len());
            let batch: Vec<u32> = unvisited.drain(..take).collect();
            log::debug!("Sampling pages {batch:?} for {count} random quotes");

            for fetched in self.fetcher().fetch_many(batch).await {
                for quote in fetched.quotes.iter() {
                    if seen.insert(quote.id.clone()) {
                        pool.push(quote.clone());
                    }
                }
            }

            let missing = (wanted.saturating_sub(pool.len())) as u64;
            pages_needed = missing.div_ceil(per_page);
        }

        pool.shuffle(&mut rand::thread_rng());
        pool.truncate(wanted);

        if pool.len() < wanted {
            log::warn!("Random sample found {} of {count} quotes", pool.len());
        }
        Ok(pool)
    }

    pub(crate) fn validate_count(&self, count: u64) -> Result<(), OrchestratorError> {
        let max = self.config().max_request_count;
        if count == 0 || count > max {
            return Err(OrchestratorError::invalid(format!(
                "count must be between 1 and {max}, got {count}"
            )));
        }
        Ok(())
    }

    pub(crate) fn validate_range(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<RangeRequest, OrchestratorError> {
        let config = self.config();
        if limit == 0 || limit > config.max_range_limit {
            return Err(OrchestratorError::invalid(format!(
                "limit must be between 1 and {}, got {limit}",
                config.max_range_limit
            )));
        }
        if offset > config.max_offset {
            return Err(OrchestratorError::invalid(format!(
                "offset must be at most {}, got {offset}",
                config.max_offset
            )));
        }
        Ok(RangeRequest::new(offset, limit))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use quote_grid_orchestrator_models::{MetadataSource, PageMetadata};

    use super::*;
    use crate::OrchestratorConfig;
    use crate::test_support::{FakeSource, quote, session_with, walked_metadata};

    fn ids(cells: &[Cell]) -> BTreeSet<String> {
        cells
            .iter()
            .filter_map(Cell::as_quote)
            .map(|q| q.id.clone())
            .collect()
    }

    #[tokio::test]
    async fn small_subset_is_distinct_and_sized() {
        let counts = [10; 6];
        let source = Arc::new(FakeSource::new(&counts));
        let session = session_with(&source, walked_metadata(&counts), OrchestratorConfig::default());

        let cells = session.get_random_items(5).await.unwrap();
        assert_eq!(cells.len(), 5);
        assert_eq!(ids(&cells).len(), 5);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn small_subset_of_a_tiny_source_returns_what_exists() {
        let source = Arc::new(FakeSource::new(&[3]));
        let session = session_with(&source, walked_metadata(&[3]), OrchestratorConfig::default());

        let cells = session.get_random_items(5).await.unwrap();
        assert_eq!(cells.len(), 3);
        assert_eq!(ids(&cells).len(), 3);
    }

    #[tokio::test]
    async fn small_subset_tops_up_from_unvisited_pages() {
        let counts = [10, 10, 10, 10];
        let source = Arc::new(FakeSource::new(&counts).failing(&[1, 2]));
        let session = session_with(&source, walked_metadata(&counts), OrchestratorConfig::default());

        let cells = session.get_random_items(15).await.unwrap();
        assert_eq!(cells.len(), 15);
        assert_eq!(ids(&cells).len(), 15);
    }

    #[tokio::test]
    async fn large_count_resolves_from_the_start() {
        let counts = [20; 5];
        let source = Arc::new(FakeSource::new(&counts));
        let session = session_with(&source, walked_metadata(&counts), OrchestratorConfig::default());

        let quotes = session.get_items(60).await.unwrap();
        assert_eq!(quotes, source.all_quotes()[..60]);
    }

    #[tokio::test]
    async fn rejects_out_of_bounds_counts() {
        let source = Arc::new(FakeSource::new(&[5]));
        let session = session_with(&source, walked_metadata(&[5]), OrchestratorConfig::default());

        assert!(session.get_random_items(0).await.is_err());
        assert!(session.get_random_items(10_001).await.is_err());
        assert!(session.get_range(0, 0).await.is_err());
    }

    #[tokio::test]
    async fn get_range_reports_more() {
        let counts = [10, 10, 10];
        let source = Arc::new(FakeSource::new(&counts));
        let session = session_with(&source, walked_metadata(&counts), OrchestratorConfig::default());

        let page = session.get_range(5, 10).await.unwrap();
        assert_eq!(page.items.len(), 10);
        assert_eq!(page.items[0], Cell::Real(quote(1, 5)));
        assert_eq!(page.total, 30);
        assert!(page.has_more);

        let last = session.get_range(25, 10).await.unwrap();
        assert_eq!(last.items.len(), 5);
        assert_eq!(last.total, 30);
        assert!(!last.has_more);
    }

    #[tokio::test]
    async fn total_failure_degrades_to_placeholders() {
        let counts = [10, 10];
        let source = Arc::new(FakeSource::new(&counts).failing(&[1, 2]));
        let session = session_with(&source, walked_metadata(&counts), OrchestratorConfig::default());

        let batch = session.fetch_batch(RangeRequest::new(0, 20)).await.unwrap();
        assert!(batch.degraded);
        assert_eq!(batch.cells.len(), 20);
        assert!(batch.cells.iter().all(|cell| matches!(
            cell,
            Cell::Placeholder {
                reason: PlaceholderReason::FetchFailed,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn failing_source_under_fallback_metadata_stays_bounded() {
        let every_page: Vec<u32> = (1..=2_000).collect();
        let source = Arc::new(FakeSource::new(&[10; 3]).failing(&every_page));
        let fallback = PageMetadata::new(10, 10, 10, MetadataSource::Fallback);
        let session = session_with(&source, fallback, OrchestratorConfig::default());

        let items = session.get_items(60).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(source.calls(), 6);

        let cells = session.get_random_items(60).await.unwrap();
        assert_eq!(cells.len(), 60);
        assert!(cells.iter().all(|cell| !cell.is_real()));
        assert_eq!(source.calls(), 6 + 6 + 60);
    }

    #[tokio::test]
    async fn degraded_fetch_recovers_healed_pages() {
        let counts = [10, 10];
        let source = Arc::new(FakeSource::new(&counts).failing(&[1, 2]));
        let session = session_with(&source, walked_metadata(&counts), OrchestratorConfig::default());

        let first = session.get_random_items(60).await.unwrap();
        assert!(first.iter().all(|cell| !cell.is_real()));

        source.heal();
        let second = session.get_random_items(60).await.unwrap();
        assert_eq!(second.len(), 20);
        assert!(second.iter().all(Cell::is_real));
    }

    #[tokio::test(start_paused = true)]
    async fn bulk_timeout_degrades_per_position() {
        let counts = [5, 5];
        let source = Arc::new(FakeSource::new(&counts).hanging(&[2]));
        let config = OrchestratorConfig {
            fetch_timeout_ms: 2_000,
            bulk_timeout_ms: 1_000,
            ..OrchestratorConfig::default()
        };
        let session = session_with(&source, walked_metadata(&counts), config);

        let batch = session.fetch_batch(RangeRequest::new(0, 10)).await.unwrap();
        assert!(batch.degraded);
        assert_eq!(batch.cells.len(), 10);
        assert!(batch.cells[..5].iter().all(Cell::is_real));
        assert!(batch.cells[5..].iter().all(|cell| matches!(
            cell,
            Cell::Placeholder {
                reason: PlaceholderReason::TimedOut,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn item_at_walks_past_short_pages() {
        let source = Arc::new(FakeSource::new(&[3, 10]));
        let stale = PageMetadata::new(2, 10, 10, MetadataSource::Walked);
        let session = session_with(&source, stale, OrchestratorConfig::default());

        assert_eq!(session.get_item_at(5).await, Cell::Real(quote(2, 2)));
        assert_eq!(
            session.get_item_at(40).await,
            Cell::placeholder(40, PlaceholderReason::Exhausted)
        );
    }

    #[tokio::test]
    async fn closed_session_refuses_batches() {
        let source = Arc::new(FakeSource::new(&[5]));
        let session = session_with(&source, walked_metadata(&[5]), OrchestratorConfig::default());
        session.shutdown();

        assert!(matches!(
            session.fetch_batch(RangeRequest::new(0, 5)).await,
            Err(OrchestratorError::SessionClosed)
        ));
    }
}
