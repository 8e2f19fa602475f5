//! Session page cache.
//!
//! Maps page numbers to the quotes fetched from them. An entry is never
//! replaced once written; a page is re-fetched only after an explicit
//! [`PageCache::invalidate`]. An optional page bound evicts the oldest
//! entries first.
//!
//! The cache also hands out per-page in-flight locks so concurrent requests
//! for the same uncached page issue one upstream call between them.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use quote_grid_quote_models::Quote;

#[derive(Debug, Default)]
struct CacheInner {
    pages: BTreeMap<u32, Arc<[Quote]>>,
    insertion_order: VecDeque<u32>,
    items: usize,
}

/// Page number → immutable list of quotes.
#[derive(Debug, Default)]
pub struct PageCache {
    inner: RwLock<CacheInner>,
    in_flight: Mutex<BTreeMap<u32, Arc<tokio::sync::Mutex<()>>>>,
    max_pages: Option<usize>,
}

impl PageCache {
    /// Creates a cache holding at most `max_pages` pages (`None` for no
    /// bound).
    #[must_use]
    pub fn new(max_pages: Option<usize>) -> Self {
        Self {
            inner: RwLock::new(CacheInner::default()),
            in_flight: Mutex::new(BTreeMap::new()),
            max_pages,
        }
    }

    /// Returns the cached quotes for `page`.
    #[must_use]
    pub fn get(&self, page: u32) -> Option<Arc<[Quote]>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.pages.get(&page).cloned()
    }

    /// Whether `page` is cached.
    #[must_use]
    pub fn contains(&self, page: u32) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.pages.contains_key(&page)
    }

    /// Stores `quotes` for `page` and returns the stored entry.
    ///
    /// If the page is already cached the existing entry wins and `quotes`
    /// is discarded, so a raced double fetch never changes what earlier
    /// readers saw.
    pub fn insert(&self, page: u32, quotes: Vec<Quote>) -> Arc<[Quote]> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = inner.pages.get(&page) {
            return Arc::clone(existing);
        }

        let entry: Arc<[Quote]> = Arc::from(quotes);
        inner.items += entry.len();
        inner.pages.insert(page, Arc::clone(&entry));
        inner.insertion_order.push_back(page);

        if let Some(max) = self.max_pages {
            while inner.pages.len() > max {
                let Some(oldest) = inner.insertion_order.pop_front() else {
                    break;
                };
                if let Some(evicted) = inner.pages.remove(&oldest) {
                    inner.items -= evicted.len();
                    log::debug!("Evicted page {oldest} from cache");
                }
            }
        }

        entry
    }

    /// Drops `page` from the cache. Returns whether it was cached.
    pub fn invalidate(&self, page: u32) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Some(removed) = inner.pages.remove(&page) else {
            return false;
        };
        inner.items -= removed.len();
        inner.insertion_order.retain(|p| *p != page);
        true
    }

    /// Drops every page.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *inner = CacheInner::default();
        drop(inner);
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of cached pages.
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.pages.len()
    }

    /// Whether no pages are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of quotes across all cached pages.
    #[must_use]
    pub fn item_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.items
    }

    /// Looks up a cached quote by id.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<Quote> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .pages
            .values()
            .flat_map(|quotes| quotes.iter())
            .find(|quote| quote.id == id)
            .cloned()
    }

    /// Returns the in-flight lock for `page`.
    pub(crate) fn page_lock(&self, page: u32) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(page).or_default())
    }

    /// Forgets the in-flight lock for a page whose fetch has settled.
    pub(crate) fn release_lock(&self, page: u32) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&page);
    }

    #[cfg(test)]
    pub(crate) fn in_flight_len(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
