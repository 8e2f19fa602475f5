#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the quote grid server.
//!
//! These types are serialized to JSON for the REST API. Cells, range pages
//! and selection snapshots are passed through from the orchestrator models
//! unchanged; this crate adds query parameters and envelopes.

use quote_grid_orchestrator_models::{ScrollOutcome, SelectionSnapshot};
use quote_grid_quote_models::{AuthorLink, Cell};
use serde::{Deserialize, Serialize};

/// Number of quotes returned by `/quotes/random` when no count is given.
pub const DEFAULT_RANDOM_COUNT: u64 = 10;

/// Number of quotes returned by `/quotes/range` when no limit is given.
pub const DEFAULT_RANGE_LIMIT: u64 = 100;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
    /// Identifier of the upstream quote source.
    pub source: String,
}

/// Error body for rejected requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// What went wrong.
    pub error: String,
}

impl ApiError {
    /// Creates an error body.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Query parameters for the random quotes endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomQueryParams {
    /// Number of quotes.
    pub count: Option<u64>,
}

/// Query parameters for the range endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeQueryParams {
    /// First logical position.
    pub offset: Option<u64>,
    /// Number of positions.
    pub limit: Option<u64>,
}

/// Quotes returned by the random endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiQuotes {
    /// Number of cells returned.
    pub count: usize,
    /// The cells.
    pub items: Vec<Cell>,
}

impl From<Vec<Cell>> for ApiQuotes {
    fn from(items: Vec<Cell>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

/// Author link for a cached quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAuthorLink {
    /// Quote id.
    pub id: String,
    /// The resolved or fallback link.
    pub link: AuthorLink,
}

/// Body of `POST /selections`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSelectionRequest {
    /// Number of grid positions selected.
    pub total: u64,
}

/// Body of `POST /selections/{id}/scroll`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollRequest {
    /// First position visible in the client's viewport.
    pub viewport_start: Option<u64>,
}

/// A selection and its current cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSelection {
    /// Selection id, used in follow-up requests.
    pub id: String,
    /// Current state.
    #[serde(flatten)]
    pub snapshot: SelectionSnapshot,
}

/// Result of a scroll signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiScroll {
    /// What the signal did.
    #[serde(flatten)]
    pub outcome: ScrollOutcome,
    /// Positions settled after the signal.
    pub settled: u64,
    /// Whether the selection is fully settled.
    pub complete: bool,
}

#[cfg(test)]
mod tests {
    use quote_grid_orchestrator_models::{RangeRequest, SelectionMode};

    use super::*;

    #[test]
    fn selection_flattens_snapshot() {
        let selection = ApiSelection {
            id: "abc".to_owned(),
            snapshot: SelectionSnapshot {
                total: 2,
                mode: SelectionMode::Immediate,
                settled: 2,
                complete: true,
                cells: Vec::new(),
            },
        };
        let json = serde_json::to_value(&selection).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["mode"], "IMMEDIATE");
        assert_eq!(json["settled"], 2);
    }

    #[test]
    fn scroll_flattens_outcome() {
        let scroll = ApiScroll {
            outcome: ScrollOutcome::Loaded {
                range: RangeRequest::new(100, 100),
            },
            settled: 200,
            complete: false,
        };
        let json = serde_json::to_value(&scroll).unwrap();
        assert_eq!(json["outcome"], "loaded");
        assert_eq!(json["range"]["offset"], 100);
        assert_eq!(json["settled"], 200);
    }

    #[test]
    fn scroll_request_accepts_empty_body() {
        let request: ScrollRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.viewport_start, None);

        let request: ScrollRequest = serde_json::from_str(r#"{"viewportStart":640}"#).unwrap();
        assert_eq!(request.viewport_start, Some(640));
    }
}
