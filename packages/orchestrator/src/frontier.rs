//! Virtual-scroll frontier.
//!
//! Tracks which positions of a large selection are loaded and hands out
//! the next unloaded batch on demand. At most one batch is in flight at a
//! time, and signals arriving within the debounce window of the last
//! accepted one are dropped.

use std::time::Duration;

use quote_grid_orchestrator_models::RangeRequest;
use tokio::time::Instant;

/// What a scroll signal asks the caller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Fetch this batch, then call [`VirtualScrollFrontier::complete_batch`].
    Load(RangeRequest),
    /// Too soon after the last accepted signal.
    Debounced,
    /// A batch is already in flight.
    Busy,
    /// Every position is loaded.
    Complete,
}

/// Loaded/unloaded state of a virtually scrolled selection.
#[derive(Debug, Clone)]
pub struct VirtualScrollFrontier {
    loaded: Vec<bool>,
    loaded_count: u64,
    batch_size: u64,
    is_loading: bool,
    last_signal: Option<Instant>,
    debounce: Duration,
}

impl VirtualScrollFrontier {
    /// Creates a frontier over `total` positions, the first `preloaded` of
    /// which are already loaded.
    #[must_use]
    pub fn new(total: u64, preloaded: u64, batch_size: u64, debounce: Duration) -> Self {
        let total = usize::try_from(total).unwrap_or(usize::MAX);
        let preloaded = usize::try_from(preloaded).unwrap_or(usize::MAX).min(total);
        let mut loaded = vec![false; total];
        loaded[..preloaded].fill(true);

        Self {
            loaded,
            loaded_count: preloaded as u64,
            batch_size: batch_size.max(1),
            is_loading: false,
            last_signal: None,
            debounce,
        }
    }

    /// Number of positions.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.loaded.len() as u64
    }

    /// Number of loaded positions.
    #[must_use]
    pub const fn loaded_count(&self) -> u64 {
        self.loaded_count
    }

    /// Whether a batch is in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// Whether every position is loaded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.loaded_count == self.total()
    }

    /// Whether `position` is loaded.
    #[must_use]
    pub fn is_loaded(&self, position: u64) -> bool {
        usize::try_from(position)
            .ok()
            .and_then(|i| self.loaded.get(i))
            .copied()
            .unwrap_or(false)
    }

    /// Handles a scroll signal received at `now`.
    ///
    /// `viewport_start` is the first position the client shows; the next
    /// batch starts at the first unloaded position at or after it.
    pub fn signal(&mut self, now: Instant, viewport_start: Option<u64>) -> Signal {
        if self.is_complete() {
            return Signal::Complete;
        }
        if self.is_loading {
            return Signal::Busy;
        }
        if self
            .last_signal
            .is_some_and(|last| now.saturating_duration_since(last) < self.debounce)
        {
            return Signal::Debounced;
        }

        self.last_signal = Some(now);
        self.load_next(viewport_start)
            .map_or(Signal::Complete, Signal::Load)
    }

    /// Claims the next unloaded batch and marks the frontier busy.
    ///
    /// Returns `None` while a batch is in flight or when nothing is left.
    pub fn load_next(&mut self, from: Option<u64>) -> Option<RangeRequest> {
        if self.is_loading {
            return None;
        }

        let from = from
            .and_then(|p| usize::try_from(p).ok())
            .unwrap_or(0)
            .min(self.loaded.len());
        let start = self.first_unloaded(from).or_else(|| self.first_unloaded(0))?;

        let max_len = usize::try_from(self.batch_size).unwrap_or(usize::MAX);
        let len = self.loaded[start..]
            .iter()
            .take(max_len)
            .take_while(|loaded| !**loaded)
            .count();

        self.is_loading = true;
        Some(RangeRequest::new(start as u64, len as u64))
    }

    /// Marks `range` loaded and clears the busy flag.
    pub fn complete_batch(&mut self, range: RangeRequest) {
        let end = usize::try_from(range.end()).unwrap_or(usize::MAX).min(self.loaded.len());
        let start = usize::try_from(range.offset).unwrap_or(usize::MAX).min(end);

        for loaded in &mut self.loaded[start..end] {
            if !*loaded {
                *loaded = true;
                self.loaded_count += 1;
            }
        }
        self.is_loading = false;
    }

    /// Clears the busy flag without marking anything loaded.
    pub fn abort_batch(&mut self) {
        self.is_loading = false;
    }

    fn first_unloaded(&self, from: usize) -> Option<usize> {
        self.loaded[from..]
            .iter()
            .position(|loaded| !loaded)
            .map(|i| i + from)
    }
}
