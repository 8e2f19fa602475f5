//! Metadata estimator.
//!
//! Walks the source from page 1 to learn how many pages exist and the
//! smallest number of quotes any page holds. The minimum, not the first
//! page's count, is the denominator for offset arithmetic: overestimating
//! it makes the range resolver under-fetch.
//!
//! The walk never fails. A failure on page 1 yields the configured
//! fallback estimate; a failure further on ends the walk where it is.

use quote_grid_orchestrator_models::{MetadataSource, PageMetadata};
use quote_grid_scraper::SourcePage;

use crate::OrchestratorConfig;
use crate::fetcher::PageFetcher;

/// The outcome of a metadata walk.
#[derive(Debug, Clone)]
pub struct MetadataWalk {
    /// The estimate.
    pub metadata: PageMetadata,
    /// Pages fetched along the way, in page order, for seeding the cache.
    pub pages: Vec<SourcePage>,
}

/// The estimate used when the walk cannot start.
#[must_use]
pub fn fallback_metadata(config: &OrchestratorConfig) -> PageMetadata {
    PageMetadata::new(
        config.fallback_total_pages,
        config.fallback_items_per_page,
        config.fallback_items_per_page,
        MetadataSource::Fallback,
    )
}

/// Walks the source through `fetcher` and estimates its pagination.
pub async fn compute_metadata(fetcher: &PageFetcher, config: &OrchestratorConfig) -> MetadataWalk {
    let mut pages: Vec<SourcePage> = Vec::new();
    let mut source = MetadataSource::Capped;

    for page in 1..=config.walk_limit {
        let source_page = match fetcher.fetch_source_page(page).await {
            Ok(source_page) => source_page,
            Err(e) if page == 1 => {
                log::warn!("Metadata walk failed on page 1, using fallback estimate: {e}");
                return MetadataWalk {
                    metadata: fallback_metadata(config),
                    pages: Vec::new(),
                };
            }
            Err(e) => {
                log::warn!("Metadata walk stopped at page {page}: {e}");
                break;
            }
        };

        if source_page.quotes.is_empty() {
            if page == 1 {
                pages.push(source_page);
            } else {
                log::debug!("Page {page} is empty, treating page {} as the last", page - 1);
            }
            source = MetadataSource::Walked;
            break;
        }

        let has_next = source_page.has_next;
        pages.push(source_page);

        if !has_next {
            source = MetadataSource::Walked;
            break;
        }
    }

    if source == MetadataSource::Capped && pages.len() == config.walk_limit as usize {
        log::info!(
            "Metadata walk reached its limit of {} pages",
            config.walk_limit
        );
    }

    let metadata = summarize(&pages, source);
    log::info!(
        "Source has {} pages ({}), at least {} quotes per page, about {} in total",
        metadata.total_pages,
        metadata.source,
        metadata.min_items_per_page,
        metadata.estimated_total,
    );

    MetadataWalk { metadata, pages }
}

fn summarize(pages: &[SourcePage], source: MetadataSource) -> PageMetadata {
    let counts: Vec<u64> = pages.iter().map(|p| p.quotes.len() as u64).collect();
    let visited = counts.len() as u64;
    let min = counts.iter().copied().min().unwrap_or(0);
    let avg = if visited == 0 {
        0
    } else {
        (counts.iter().sum::<u64>() + visited / 2) / visited
    };

    PageMetadata::new(
        u32::try_from(visited).unwrap_or(u32::MAX),
        u32::try_from(min).unwrap_or(u32::MAX),
        u32::try_from(avg).unwrap_or(u32::MAX),
        source,
    )
}
