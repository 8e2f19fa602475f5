#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Pagination-aware fetch orchestrator for the quote grid.
//!
//! Maps logical `(offset, limit)` ranges over the flattened quote sequence
//! onto page fetches against a [`QuoteSource`] whose per-page item count is
//! not reliably uniform.
//!
//! The pieces, leaves first:
//!
//! - [`cache::PageCache`] holds fetched pages for the session.
//! - [`metadata`] walks the source once to estimate page count and the
//!   minimum items per page.
//! - [`fetcher::PageFetcher`] funnels every upstream call through one
//!   timeout, one concurrency limit and the cache.
//! - [`range`] resolves a logical range to a page span, fetches it, slices
//!   it, and extends it page by page when pages come up short.
//! - [`strategy`] picks between a random small subset, a paginated bulk
//!   fetch, and per-item degradation.
//! - [`selection`] schedules large client selections in tiers, handing the
//!   tail to a [`frontier::VirtualScrollFrontier`].
//!
//! [`session::QuoteSession`] owns the cache and metadata and exposes the
//! operations callers use.

pub mod cache;
pub mod config;
pub mod enrich;
pub mod fetcher;
pub mod frontier;
pub mod metadata;
pub mod range;
pub mod selection;
pub mod session;
pub mod strategy;

#[cfg(test)]
pub(crate) mod test_support;

use std::time::Duration;

pub use config::{ConfigError, OrchestratorConfig, ScheduleConfig};
pub use quote_grid_scraper::QuoteSource;
pub use selection::GridSelection;
pub use session::QuoteSession;

/// Errors surfaced by the orchestrator.
///
/// Only [`OrchestratorError::InvalidRequest`] and
/// [`OrchestratorError::SessionClosed`] reach callers of the public range
/// and item operations; the other variants are recovered internally.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Caller input is outside the allowed bounds.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// What was wrong with the input.
        message: String,
    },

    /// The upstream source failed.
    #[error("Source error: {0}")]
    Source(#[from] quote_grid_scraper::ScrapeError),

    /// An upstream fetch did not finish in time.
    #[error("Fetch of page {page} timed out after {timeout:?}")]
    Timeout {
        /// The page being fetched.
        page: u32,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The session has been shut down.
    #[error("Session has been shut down")]
    SessionClosed,

    /// A background batch task panicked or was cancelled.
    #[error("Batch task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl OrchestratorError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Whether the error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
