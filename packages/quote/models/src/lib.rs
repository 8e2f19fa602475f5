#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Quote record and grid cell types.
//!
//! A [`Quote`] is one item scraped from a page of the upstream source. A
//! [`Cell`] is what a grid position holds at any moment: a real quote, a
//! placeholder standing in for a quote that could not be obtained, or a
//! loading marker for a position whose batch has not arrived yet.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use strum_macros::{AsRefStr, Display, EnumString};

/// Number of hex characters kept from the identity digest.
const ID_LEN: usize = 16;

/// A single quote fetched from the upstream source.
///
/// Immutable once fetched. `page_number` is 1-based, `index_within_page`
/// is 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Stable identity derived from the author and the quote text.
    pub id: String,
    /// The quote body.
    pub text: String,
    /// Who the quote is attributed to.
    pub author: String,
    /// Topic tags attached by the source.
    pub tags: Vec<String>,
    /// URL of the page the quote was scraped from.
    pub source_url: String,
    /// Link to the author's page, when the source publishes one.
    pub author_url: Option<String>,
    /// Upstream page the quote came from.
    pub page_number: u32,
    /// Position of the quote within its page.
    pub index_within_page: u32,
}

impl Quote {
    /// Creates a quote, deriving its identity from `author` and `text`.
    ///
    /// A `page_number` of 0 is clamped to 1.
    #[must_use]
    pub fn new(
        text: &str,
        author: &str,
        tags: Vec<String>,
        source_url: &str,
        page_number: u32,
        index_within_page: u32,
    ) -> Self {
        Self {
            id: quote_id(author, text),
            text: text.to_owned(),
            author: author.to_owned(),
            tags,
            source_url: source_url.to_owned(),
            author_url: None,
            page_number: page_number.max(1),
            index_within_page,
        }
    }

    /// Sets the author link.
    #[must_use]
    pub fn with_author_url(mut self, url: Option<String>) -> Self {
        self.author_url = url;
        self
    }
}

/// Computes the stable identity for a quote.
///
/// Whitespace at either end of `author` and `text` is ignored so the same
/// quote scraped from differently-formatted markup keeps its identity.
#[must_use]
pub fn quote_id(author: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(author.trim().as_bytes());
    hasher.update([0x1f]);
    hasher.update(text.trim().as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(ID_LEN);
    id
}

/// Why a grid position holds a placeholder instead of a quote.
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
pub enum PlaceholderReason {
    /// The fetch for this position failed.
    FetchFailed,
    /// The source has no item at this position.
    Exhausted,
    /// The fetch for this position did not finish in time.
    TimedOut,
}

/// How far along a loading position is.
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
pub enum LoadingStage {
    /// Waiting for a scroll signal before it is requested.
    Queued,
    /// Assigned to a batch with a scheduled start time.
    Scheduled,
    /// Its batch is in flight.
    Fetching,
}

/// The content of one grid position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Cell {
    /// A fetched quote.
    Real(Quote),
    /// A degraded stand-in for a quote that could not be obtained.
    #[serde(rename_all = "camelCase")]
    Placeholder {
        /// Logical grid position.
        position: u64,
        /// Why the quote is missing.
        reason: PlaceholderReason,
    },
    /// A position whose quote has not arrived yet.
    #[serde(rename_all = "camelCase")]
    Loading {
        /// Logical grid position.
        position: u64,
        /// Loading progress.
        stage: LoadingStage,
    },
}

impl Cell {
    /// A placeholder for `position`.
    #[must_use]
    pub const fn placeholder(position: u64, reason: PlaceholderReason) -> Self {
        Self::Placeholder { position, reason }
    }

    /// A loading marker for `position`.
    #[must_use]
    pub const fn loading(position: u64, stage: LoadingStage) -> Self {
        Self::Loading { position, stage }
    }

    /// Returns the quote if this cell holds one.
    #[must_use]
    pub const fn as_quote(&self) -> Option<&Quote> {
        match self {
            Self::Real(quote) => Some(quote),
            Self::Placeholder { .. } | Self::Loading { .. } => None,
        }
    }

    /// Whether this cell holds a real quote.
    #[must_use]
    pub const fn is_real(&self) -> bool {
        matches!(self, Self::Real(_))
    }

    /// Whether this cell is still waiting for its batch.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }
}

impl From<Quote> for Cell {
    fn from(quote: Quote) -> Self {
        Self::Real(quote)
    }
}

/// A supplementary link for a quote's author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "url", rename_all = "camelCase")]
pub enum AuthorLink {
    /// Link found by the source.
    Resolved(String),
    /// Generated search link used when the lookup failed or found nothing.
    Fallback(String),
}

impl AuthorLink {
    /// Returns the URL regardless of how it was obtained.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Resolved(url) | Self::Fallback(url) => url,
        }
    }
}
