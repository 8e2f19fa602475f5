//! Author-link enrichment.
//!
//! Looks up a supplementary author link for a quote through the source.
//! The lookup is opportunistic: it never holds up quote delivery and any
//! failure or timeout falls back to a Goodreads search link.

use quote_grid_quote_models::{AuthorLink, Quote};
use quote_grid_scraper::author_search_url;

use crate::OrchestratorError;
use crate::session::QuoteSession;

impl QuoteSession {
    /// Resolves an author link for `quote`.
    ///
    /// The lookup shares the session's concurrency limit and counters.
    /// After shutdown no lookup is made and the search link is returned.
    pub async fn enrich(&self, quote: &Quote) -> AuthorLink {
        let timeout = self.config().enrich_timeout();

        match self.fetcher().fetch_author_link(quote, timeout).await {
            Ok(Some(url)) => AuthorLink::Resolved(url),
            Ok(None) => AuthorLink::Fallback(author_search_url(&quote.author)),
            Err(OrchestratorError::SessionClosed) => {
                log::debug!("Session closed, not enriching '{}'", quote.author);
                AuthorLink::Fallback(author_search_url(&quote.author))
            }
            Err(e) if e.is_timeout() => {
                log::warn!(
                    "Enrichment for '{}' timed out after {timeout:?}",
                    quote.author
                );
                AuthorLink::Fallback(author_search_url(&quote.author))
            }
            Err(e) => {
                log::warn!("Enrichment for '{}' failed: {e}", quote.author);
                AuthorLink::Fallback(author_search_url(&quote.author))
            }
        }
    }

    /// Resolves an author link for the cached quote with id `id`.
    ///
    /// Returns `Ok(None)` if no cached quote has that id.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::SessionClosed`] after shutdown.
    pub async fn enrich_cached(&self, id: &str) -> Result<Option<AuthorLink>, OrchestratorError> {
        self.ensure_open()?;
        let Some(quote) = self.find_cached(id) else {
            return Ok(None);
        };
        Ok(Some(self.enrich(&quote).await))
    }
}
