//! Range resolver.
//!
//! Turns a logical `(offset, limit)` over the flattened quote sequence into
//! a page span, fetches the span jointly, concatenates it in page order into
//! a candidate window and slices the requested positions out of it.
//!
//! The span is planned with the minimum per-page count, which is only an
//! estimate. When pages hold fewer quotes than planned the window comes up
//! short, and the resolver keeps appending the next page until the slice is
//! satisfiable or the horizon is reached. A short result at the end of the
//! source is not an error.
//!
//! Extension also stops at a failed page beyond the walked range, and after
//! `max_consecutive_failures` failed pages in a row.

use quote_grid_orchestrator_models::{PageMetadata, RangeRequest};
use quote_grid_quote_models::Quote;

use crate::OrchestratorConfig;
use crate::fetcher::PageFetcher;

/// The page span planned for one range request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePlan {
    /// Quotes assumed per page.
    pub per_page: u32,
    /// First page of the span.
    pub start_page: u32,
    /// Last page of the span, before capping at the horizon.
    pub end_page: u32,
    /// Position of `offset` within the candidate window.
    pub local_start: u64,
}

/// Plans the page span for `request` assuming `per_page` quotes per page.
#[must_use]
pub fn plan(request: RangeRequest, per_page: u32) -> PagePlan {
    let per_page = per_page.max(1);
    let per = u64::from(per_page);
    let start_page = request.offset / per + 1;
    let end_page = request.end().div_ceil(per).max(start_page);

    PagePlan {
        per_page,
        start_page: u32::try_from(start_page).unwrap_or(u32::MAX),
        end_page: u32::try_from(end_page).unwrap_or(u32::MAX),
        local_start: request.offset % per,
    }
}

/// The per-page denominator for offset arithmetic.
#[must_use]
pub const fn per_page(metadata: &PageMetadata, config: &OrchestratorConfig) -> u32 {
    if metadata.min_items_per_page == 0 {
        config.default_items_per_page
    } else {
        metadata.min_items_per_page
    }
}

/// The last page the resolver may touch.
///
/// A completed walk knows the true last page. Otherwise more pages may
/// exist, and the resolver probes as far as `max_page_horizon`.
#[must_use]
pub fn horizon(metadata: &PageMetadata, config: &OrchestratorConfig) -> u32 {
    if metadata.is_complete() {
        metadata.total_pages
    } else {
        config.max_page_horizon.max(metadata.total_pages)
    }
}

/// A resolved range and what it took to resolve it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedRange {
    /// The sliced quotes, in source order.
    pub quotes: Vec<Quote>,
    /// Pages whose fetch failed.
    pub failed_pages: Vec<u32>,
    /// How many pages were requested.
    pub pages_touched: u32,
    /// The last page requested, or 0 if none was.
    pub last_page: u32,
    /// Quotes fetched past the end of the slice.
    pub trailing: usize,
    /// Whether the resolver saw the end of the source.
    pub source_exhausted: bool,
}

impl ResolvedRange {
    /// Whether every page touched failed, so the result says nothing about
    /// the source.
    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.pages_touched > 0 && self.failed_pages.len() == self.pages_touched as usize
    }

    /// Whether positions after this range may hold quotes.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.trailing > 0 || !self.source_exhausted
    }
}

/// Tracks failed pages to decide when extending a range is hopeless.
#[derive(Debug, Clone, Copy)]
struct FailureRun {
    walked_pages: u32,
    limit: u32,
    consecutive: u32,
    beyond_walk: bool,
}

impl FailureRun {
    const fn new(walked_pages: u32, limit: u32) -> Self {
        Self {
            walked_pages,
            limit,
            consecutive: 0,
            beyond_walk: false,
        }
    }

    const fn record(&mut self, page: u32, failed: bool) {
        if failed {
            self.consecutive += 1;
            self.beyond_walk |= page > self.walked_pages;
        } else {
            self.consecutive = 0;
        }
    }

    const fn should_stop(&self) -> bool {
        self.beyond_walk || self.consecutive >= self.limit
    }
}

/// Resolves `request` against the source behind `fetcher`.
pub async fn resolve(
    fetcher: &PageFetcher,
    metadata: &PageMetadata,
    config: &OrchestratorConfig,
    request: RangeRequest,
) -> ResolvedRange {
    let plan = plan(request, per_page(metadata, config));
    let horizon = horizon(metadata, config);
    let walked_pages = metadata.total_pages;
    let open_ended = !metadata.is_complete();

    if request.limit == 0 || plan.start_page > horizon {
        return ResolvedRange {
            source_exhausted: true,
            ..ResolvedRange::default()
        };
    }

    let needed = usize::try_from(plan.local_start.saturating_add(request.limit)).unwrap_or(usize::MAX);
    let mut resolved = ResolvedRange::default();
    let mut window: Vec<Quote> = Vec::new();
    let mut failures = FailureRun::new(walked_pages, config.max_consecutive_failures);

    let initial_end = plan.end_page.min(horizon);
    for fetched in fetcher.fetch_many(plan.start_page..=initial_end).await {
        resolved.pages_touched += 1;
        resolved.last_page = fetched.page;
        failures.record(fetched.page, fetched.failed);
        if fetched.failed {
            resolved.failed_pages.push(fetched.page);
        } else if fetched.quotes.is_empty() && open_ended && fetched.page > walked_pages {
            resolved.source_exhausted = true;
        }
        window.extend(fetched.quotes.iter().cloned());
    }

    let mut next = initial_end.saturating_add(1);
    while window.len() < needed && !resolved.source_exhausted {
        if failures.should_stop() {
            log::warn!(
                "Stopping range {}..{} after page {} failed",
                request.offset,
                request.end(),
                resolved.last_page
            );
            break;
        }
        if next > horizon {
            resolved.source_exhausted = true;
            break;
        }

        log::debug!(
            "Window holds {} of {needed} quotes, extending to page {next}",
            window.len()
        );

        let Some(fetched) = fetcher.fetch_many([next]).await.pop() else {
            break;
        };
        resolved.pages_touched += 1;
        resolved.last_page = next;
        failures.record(next, fetched.failed);

        if fetched.failed {
            resolved.failed_pages.push(next);
        } else if fetched.quotes.is_empty() && open_ended && next > walked_pages {
            resolved.source_exhausted = true;
        }
        window.extend(fetched.quotes.iter().cloned());
        next = next.saturating_add(1);
    }

    if !resolved.source_exhausted && resolved.last_page >= horizon {
        resolved.source_exhausted = true;
    }

    let local_start = usize::try_from(plan.local_start).unwrap_or(usize::MAX);
    resolved.trailing = window.len().saturating_sub(needed);
    resolved.quotes = window
        .into_iter()
        .skip(local_start)
        .take(needed - local_start)
        .collect();

    if resolved.quotes.len() < needed - local_start {
        log::debug!(
            "Range {}..{} resolved short: {} quotes",
            request.offset,
            request.end(),
            resolved.quotes.len()
        );
    }

    resolved
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use quote_grid_orchestrator_models::MetadataSource;
    use quote_grid_scraper::QuoteSource;

    use super::*;
    use crate::cache::PageCache;
    use crate::test_support::{FakeSource, quote, walked_metadata};

    fn fetcher(source: &Arc<FakeSource>) -> PageFetcher {
        PageFetcher::new(
            Arc::clone(source) as Arc<dyn QuoteSource>,
            PageCache::new(None),
            5,
            std::time::Duration::from_secs(5),
        )
    }

    async fn run(
        source: &Arc<FakeSource>,
        metadata: &PageMetadata,
        offset: u64,
        limit: u64,
    ) -> ResolvedRange {
        resolve(
            &fetcher(source),
            metadata,
            &OrchestratorConfig::default(),
            RangeRequest::new(offset, limit),
        )
        .await
    }

    #[test]
    fn plans_page_span() {
        let plan = plan(RangeRequest::new(15, 10), 7);
        assert_eq!(plan.start_page, 3);
        assert_eq!(plan.end_page, 4);
        assert_eq!(plan.local_start, 1);

        let aligned = super::plan(RangeRequest::new(20, 10), 10);
        assert_eq!((aligned.start_page, aligned.end_page), (3, 3));
    }

    #[test]
    fn zero_minimum_uses_configured_default() {
        let metadata = PageMetadata::new(3, 0, 0, MetadataSource::Walked);
        assert_eq!(per_page(&metadata, &OrchestratorConfig::default()), 10);
    }

    #[tokio::test]
    async fn short_last_page_yields_remaining_quotes() {
        let counts = [10, 10, 7];
        let source = Arc::new(FakeSource::new(&counts));
        let resolved = run(&source, &walked_metadata(&counts), 15, 10).await;

        let expected: Vec<Quote> = (1..7).map(|i| quote(3, i)).collect();
        assert_eq!(resolved.quotes, expected);
        assert_eq!(resolved.pages_touched, 1);
        assert!(resolved.source_exhausted);
        assert!(!resolved.has_more());
        assert_eq!(source.calls_for(4), 0);
    }

    #[tokio::test]
    async fn uniform_source_returns_exact_slices() {
        let counts = [5; 6];
        let source = Arc::new(FakeSource::new(&counts));
        let metadata = walked_metadata(&counts);
        let fetcher = fetcher(&source);
        let config = OrchestratorConfig::default();
        let all = source.all_quotes();

        for offset in 0..30_u64 {
            for limit in 1..=(30 - offset) {
                let resolved =
                    resolve(&fetcher, &metadata, &config, RangeRequest::new(offset, limit)).await;
                let start = usize::try_from(offset).unwrap();
                let end = usize::try_from(offset + limit).unwrap();
                assert_eq!(resolved.quotes, all[start..end], "offset {offset} limit {limit}");
            }
        }

        for page in 1..=6 {
            assert_eq!(source.calls_for(page), 1);
        }
    }

    #[tokio::test]
    async fn whole_source_in_order() {
        let counts = [4, 4, 4, 4];
        let source = Arc::new(FakeSource::new(&counts));
        let resolved = run(&source, &walked_metadata(&counts), 0, 16).await;
        assert_eq!(resolved.quotes, source.all_quotes());
    }

    #[tokio::test]
    async fn extends_past_pages_shorter_than_estimated() {
        let source = Arc::new(FakeSource::new(&[6, 6, 10]));
        let stale = PageMetadata::new(3, 10, 10, MetadataSource::Walked);
        let resolved = run(&source, &stale, 5, 10).await;

        assert_eq!(resolved.quotes.len(), 10);
        assert_eq!(resolved.quotes[0], quote(1, 5));
        assert_eq!(resolved.quotes[1], quote(2, 0));
        assert_eq!(resolved.quotes[9], quote(3, 2));
        assert_eq!(source.calls_for(3), 1);
        assert!(resolved.has_more());
    }

    #[tokio::test]
    async fn offset_past_the_end_is_empty() {
        let counts = [5, 5, 5];
        let source = Arc::new(FakeSource::new(&counts));
        let resolved = run(&source, &walked_metadata(&counts), 15, 10).await;

        assert!(resolved.quotes.is_empty());
        assert!(resolved.source_exhausted);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn capped_metadata_reaches_past_the_walk() {
        let source = Arc::new(FakeSource::new(&[10; 8]));
        let capped = PageMetadata::new(3, 10, 10, MetadataSource::Capped);
        let resolved = run(&source, &capped, 40, 20).await;

        assert_eq!(resolved.quotes.len(), 20);
        assert_eq!(resolved.quotes[0], quote(5, 0));
        assert!(resolved.has_more());
    }

    #[tokio::test]
    async fn capped_metadata_stops_at_first_empty_page() {
        let source = Arc::new(FakeSource::new(&[10; 5]));
        let capped = PageMetadata::new(3, 10, 10, MetadataSource::Capped);
        let resolved = run(&source, &capped, 45, 10).await;

        assert_eq!(resolved.quotes.len(), 5);
        assert!(resolved.source_exhausted);
        assert_eq!(source.calls_for(7), 0);
    }

    #[tokio::test]
    async fn failed_page_is_skipped_and_reported() {
        let counts = [10, 10, 10];
        let source = Arc::new(FakeSource::new(&counts).failing(&[2]));
        let resolved = run(&source, &walked_metadata(&counts), 0, 25).await;

        assert_eq!(resolved.quotes.len(), 20);
        assert_eq!(resolved.failed_pages, vec![2]);
        assert!(!resolved.all_failed());
    }

    #[tokio::test]
    async fn failing_source_stops_after_consecutive_failures() {
        let every_page: Vec<u32> = (1..=2_000).collect();
        let source = Arc::new(FakeSource::new(&[10; 3]).failing(&every_page));
        let fallback = PageMetadata::new(10, 10, 10, MetadataSource::Fallback);
        let resolved = run(&source, &fallback, 0, 20).await;

        assert!(resolved.quotes.is_empty());
        assert!(resolved.all_failed());
        assert!(resolved.has_more());
        assert_eq!(resolved.failed_pages, vec![1, 2, 3]);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn failure_past_the_walk_stops_extension() {
        let source = Arc::new(FakeSource::new(&[10, 10, 6, 10, 10]).failing(&[4]));
        let capped = PageMetadata::new(3, 10, 10, MetadataSource::Capped);
        let resolved = run(&source, &capped, 20, 10).await;

        assert_eq!(resolved.quotes, (0..6).map(|i| quote(3, i)).collect::<Vec<_>>());
        assert_eq!(resolved.failed_pages, vec![4]);
        assert!(resolved.has_more());
        assert_eq!(source.calls_for(5), 0);
    }

    #[tokio::test]
    async fn isolated_failure_inside_the_walk_keeps_extending() {
        let source = Arc::new(FakeSource::new(&[10, 4, 10, 10]).failing(&[3]));
        let stale = PageMetadata::new(4, 10, 10, MetadataSource::Walked);
        let resolved = run(&source, &stale, 10, 10).await;

        assert_eq!(resolved.quotes.len(), 10);
        assert_eq!(resolved.quotes[4], quote(4, 0));
        assert_eq!(resolved.failed_pages, vec![3]);
    }

    #[tokio::test]
    async fn every_page_failing_is_detected() {
        let counts = [10, 10];
        let source = Arc::new(FakeSource::new(&counts).failing(&[1, 2]));
        let resolved = run(&source, &walked_metadata(&counts), 0, 20).await;

        assert!(resolved.quotes.is_empty());
        assert!(resolved.all_failed());
    }
}
