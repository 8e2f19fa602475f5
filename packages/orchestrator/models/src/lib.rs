#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Types shared between the fetch orchestrator and its callers.
//!
//! [`PageMetadata`] is the session's advisory estimate of the upstream's
//! shape. [`RangeRequest`] and [`RangePage`] describe one logical slice of
//! the flattened quote sequence. [`SessionStats`] is the snapshot handed to
//! monitoring callers.

use chrono::{DateTime, Utc};
use quote_grid_quote_models::Cell;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// How a [`PageMetadata`] estimate was obtained.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MetadataSource {
    /// The walk reached the true last page.
    Walked,
    /// The walk stopped early (walk limit or a mid-walk failure), so more
    /// pages may exist beyond `total_pages`.
    Capped,
    /// The walk failed outright; the numbers are configured defaults.
    Fallback,
}

/// Advisory estimate of the upstream's pagination.
///
/// `min_items_per_page` is the safe denominator for offset arithmetic;
/// `avg_items_per_page` is for reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    /// Number of pages known to exist. Always at least 1.
    pub total_pages: u32,
    /// Smallest item count observed on any visited page.
    pub min_items_per_page: u32,
    /// Rounded mean item count over visited pages.
    pub avg_items_per_page: u32,
    /// `min_items_per_page * total_pages`, a planning heuristic.
    pub estimated_total: u64,
    /// How the estimate was obtained.
    pub source: MetadataSource,
}

impl PageMetadata {
    /// Builds metadata, deriving `estimated_total` and clamping
    /// `total_pages` to at least 1.
    #[must_use]
    pub fn new(
        total_pages: u32,
        min_items_per_page: u32,
        avg_items_per_page: u32,
        source: MetadataSource,
    ) -> Self {
        let total_pages = total_pages.max(1);
        Self {
            total_pages,
            min_items_per_page,
            avg_items_per_page,
            estimated_total: u64::from(min_items_per_page) * u64::from(total_pages),
            source,
        }
    }

    /// Whether `total_pages` is the true page count.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self.source, MetadataSource::Walked)
    }
}

/// A logical slice of the flattened quote sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeRequest {
    /// First logical position.
    pub offset: u64,
    /// Number of positions.
    pub limit: u64,
}

impl RangeRequest {
    /// Creates a range request.
    #[must_use]
    pub const fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    /// One past the last position covered.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset.saturating_add(self.limit)
    }

    /// Iterates the positions covered.
    pub fn positions(&self) -> std::ops::Range<u64> {
        self.offset..self.end()
    }
}

/// One resolved slice, as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangePage {
    /// Cells for the requested positions; may be shorter than requested
    /// when the source is exhausted.
    pub items: Vec<Cell>,
    /// Estimated total number of quotes.
    pub total: u64,
    /// Whether positions after this slice may hold quotes.
    pub has_more: bool,
}

/// Flags describing the session's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFlags {
    /// Whether metadata has been computed.
    pub metadata_ready: bool,
    /// Whether the metadata is the configured fallback.
    pub metadata_fallback: bool,
    /// Whether the metadata walk stopped before the true end.
    pub walk_capped: bool,
    /// Whether the session has been shut down.
    pub shut_down: bool,
}

/// A snapshot of session counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    /// Pages currently held in the cache.
    pub cached_pages: usize,
    /// Quotes currently held in the cache.
    pub cached_items: usize,
    /// Quotes received from the upstream over the session.
    pub total_fetched: u64,
    /// Page requests sent to the upstream.
    pub external_fetches: u64,
    /// Page requests that failed or timed out.
    pub failed_fetches: u64,
    /// Current metadata, if computed.
    pub metadata: Option<PageMetadata>,
    /// Lifecycle flags.
    pub flags: SessionFlags,
    /// When the session was created.
    pub started_at: DateTime<Utc>,
}

/// How a large grid selection is being filled.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionMode {
    /// Everything fits in the immediate batch.
    Immediate,
    /// The rest arrives in batches on a fixed stagger.
    Staggered,
    /// The rest arrives batch by batch as the client scrolls.
    VirtualScroll,
}

/// What a scroll signal did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ScrollOutcome {
    /// A batch was fetched.
    Loaded {
        /// The positions that were fetched.
        range: RangeRequest,
    },
    /// The signal arrived too soon after the previous one.
    Debounced,
    /// A batch is already in flight.
    Busy,
    /// Every position is loaded.
    Complete,
    /// The selection does not scroll.
    NotScrollable,
}

/// A point-in-time view of a grid selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionSnapshot {
    /// Number of positions in the selection.
    pub total: u64,
    /// How the selection is being filled.
    pub mode: SelectionMode,
    /// Positions holding a real quote or a placeholder.
    pub settled: u64,
    /// Whether every position has settled.
    pub complete: bool,
    /// One cell per position.
    pub cells: Vec<Cell>,
}
