//! Scripted in-memory quote source for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use quote_grid_orchestrator_models::{MetadataSource, PageMetadata};
use quote_grid_quote_models::Quote;
use quote_grid_scraper::{QuoteSource, ScrapeError, SourcePage};

use crate::{OrchestratorConfig, QuoteSession};

/// The quote at `index` on `page` of every [`FakeSource`].
pub fn quote(page: u32, index: u32) -> Quote {
    Quote::new(
        &format!("quote {page}-{index}"),
        &format!("author {page}"),
        vec![format!("page-{page}")],
        &format!("https://quotes.test/page/{page}/"),
        page,
        index,
    )
}

/// A source whose pages hold `counts[page - 1]` quotes.
#[derive(Debug, Default)]
pub struct FakeSource {
    counts: Vec<u32>,
    failing: Mutex<BTreeSet<u32>>,
    hanging: BTreeSet<u32>,
    calls: AtomicU64,
    enrich_calls: AtomicU64,
    in_flight: AtomicU64,
    max_in_flight: AtomicU64,
    calls_per_page: Mutex<BTreeMap<u32, u64>>,
    latency: Option<Duration>,
    enrich_link: Option<String>,
}

impl FakeSource {
    pub fn new(counts: &[u32]) -> Self {
        Self {
            counts: counts.to_vec(),
            ..Self::default()
        }
    }

    /// Makes `pages` fail until [`FakeSource::heal`] is called.
    pub fn failing(self, pages: &[u32]) -> Self {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(pages.iter().copied());
        self
    }

    /// Makes `pages` never answer.
    pub fn hanging(mut self, pages: &[u32]) -> Self {
        self.hanging.extend(pages.iter().copied());
        self
    }

    /// Delays every answer.
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_enrich_link(mut self, link: &str) -> Self {
        self.enrich_link = Some(link.to_owned());
        self
    }

    /// Stops every scripted failure.
    pub fn heal(&self) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn enrich_calls(&self) -> u64 {
        self.enrich_calls.load(Ordering::SeqCst)
    }

    /// Most page fetches that were ever running at once.
    pub fn max_in_flight(&self) -> u64 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, page: u32) -> u64 {
        self.calls_per_page
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&page)
            .copied()
            .unwrap_or(0)
    }

    /// Every quote the source holds, in source order.
    pub fn all_quotes(&self) -> Vec<Quote> {
        (1..=u32::try_from(self.counts.len()).unwrap())
            .flat_map(|page| (0..self.count(page)).map(move |i| quote(page, i)))
            .collect()
    }

    fn count(&self, page: u32) -> u32 {
        page.checked_sub(1)
            .and_then(|i| self.counts.get(i as usize))
            .copied()
            .unwrap_or(0)
    }
}

/// Decrements the running-fetch gauge when a fetch ends, including by
/// timeout cancellation.
struct InFlight<'a>(&'a AtomicU64);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl QuoteSource for FakeSource {
    fn id(&self) -> &'static str {
        "fake"
    }

    async fn fetch_page(&self, page: u32) -> Result<SourcePage, ScrapeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls_per_page
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(page)
            .or_default() += 1;

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let _running = InFlight(&self.in_flight);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.hanging.contains(&page) {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&page);
        if failing {
            return Err(ScrapeError::Parse(format!("scripted failure on page {page}")));
        }

        Ok(SourcePage {
            quotes: (0..self.count(page)).map(|i| quote(page, i)).collect(),
            has_next: (page as usize) < self.counts.len(),
            page_number: page,
        })
    }

    async fn enrich(&self, quote: &Quote) -> Result<Option<String>, ScrapeError> {
        self.enrich_calls.fetch_add(1, Ordering::SeqCst);
        if quote.author.ends_with(" 13") {
            return Err(ScrapeError::Parse("scripted enrich failure".to_owned()));
        }
        Ok(self.enrich_link.clone())
    }
}

/// Metadata as a completed walk over `counts` would report it.
pub fn walked_metadata(counts: &[u32]) -> PageMetadata {
    let min = counts.iter().copied().min().unwrap_or(0);
    let sum: u32 = counts.iter().sum();
    let pages = u32::try_from(counts.len()).unwrap();
    PageMetadata::new(pages, min, sum / pages.max(1), MetadataSource::Walked)
}

/// A session over `source` with metadata fixed to `metadata`.
pub fn session_with(
    source: &Arc<FakeSource>,
    metadata: PageMetadata,
    config: OrchestratorConfig,
) -> Arc<QuoteSession> {
    let source: Arc<dyn QuoteSource> = Arc::clone(source) as Arc<dyn QuoteSource>;
    Arc::new(QuoteSession::with_metadata(source, config, metadata))
}
