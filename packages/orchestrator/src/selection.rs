//! Tiered scheduling for large grid selections.
//!
//! A selection of `total` positions is filled in up to three tiers:
//!
//! 1. The first `immediate_count` positions are fetched before
//!    [`GridSelection::start`] returns.
//! 2. If at most `staggered_max` positions remain, they are split into
//!    batches of `batch_size` and batch `k` starts `(k + 1) *
//!    stagger_interval` after the immediate fetch finished.
//! 3. Otherwise the rest is loaded on demand, one batch per accepted
//!    scroll signal, through a [`VirtualScrollFrontier`].
//!
//! Batch tasks hold only a weak reference to the selection. A staggered
//! batch whose selection has been dropped never starts; one already in
//! flight finishes and writes into state nobody reads.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use quote_grid_orchestrator_models::{
    RangeRequest, ScrollOutcome, SelectionMode, SelectionSnapshot,
};
use quote_grid_quote_models::{Cell, LoadingStage, PlaceholderReason};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::frontier::{Signal, VirtualScrollFrontier};
use crate::session::QuoteSession;
use crate::{OrchestratorError, ScheduleConfig};

/// One delayed batch of a staggered selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaggeredBatch {
    /// Positions in the batch.
    pub range: RangeRequest,
    /// Delay after the immediate fetch before the batch starts.
    pub delay: Duration,
}

/// What follows the immediate fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    /// Nothing; the immediate fetch covers the selection.
    Done,
    /// Fixed batches on a stagger.
    Staggered(Vec<StaggeredBatch>),
    /// Scroll-driven batches.
    VirtualScroll,
}

/// The tiers planned for a selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPlan {
    /// Positions fetched immediately.
    pub immediate: RangeRequest,
    /// How the rest is fetched.
    pub follow_up: FollowUp,
}

impl TierPlan {
    /// The selection mode this plan implies.
    #[must_use]
    pub const fn mode(&self) -> SelectionMode {
        match self.follow_up {
            FollowUp::Done => SelectionMode::Immediate,
            FollowUp::Staggered(_) => SelectionMode::Staggered,
            FollowUp::VirtualScroll => SelectionMode::VirtualScroll,
        }
    }
}

/// Splits a selection of `total` positions into tiers.
#[must_use]
pub fn plan_tiers(total: u64, schedule: &ScheduleConfig) -> TierPlan {
    let immediate = RangeRequest::new(0, total.min(schedule.immediate_count));
    let remaining = total - immediate.limit;

    let follow_up = if remaining == 0 {
        FollowUp::Done
    } else if remaining <= schedule.staggered_max {
        let batch_size = schedule.batch_size.max(1);
        let batches = (0..remaining.div_ceil(batch_size))
            .map(|k| {
                let offset = immediate.limit + k * batch_size;
                StaggeredBatch {
                    range: RangeRequest::new(offset, batch_size.min(total - offset)),
                    delay: schedule
                        .stagger_interval()
                        .saturating_mul(u32::try_from(k + 1).unwrap_or(u32::MAX)),
                }
            })
            .collect();
        FollowUp::Staggered(batches)
    } else {
        FollowUp::VirtualScroll
    };

    TierPlan {
        immediate,
        follow_up,
    }
}

#[derive(Debug)]
struct SelectionState {
    cells: Mutex<Vec<Cell>>,
    frontier: Option<Mutex<VirtualScrollFrontier>>,
}

impl SelectionState {
    fn new(total: u64, plan: &TierPlan, schedule: &ScheduleConfig) -> Self {
        let pending = match plan.follow_up {
            FollowUp::VirtualScroll => LoadingStage::Queued,
            FollowUp::Done | FollowUp::Staggered(_) => LoadingStage::Scheduled,
        };
        let cells = (0..total)
            .map(|position| {
                let stage = if position < plan.immediate.end() {
                    LoadingStage::Fetching
                } else {
                    pending
                };
                Cell::loading(position, stage)
            })
            .collect();

        let frontier = matches!(plan.follow_up, FollowUp::VirtualScroll).then(|| {
            Mutex::new(VirtualScrollFrontier::new(
                total,
                plan.immediate.limit,
                schedule.batch_size,
                schedule.scroll_debounce(),
            ))
        });

        Self {
            cells: Mutex::new(cells),
            frontier,
        }
    }

    fn cells(&self) -> std::sync::MutexGuard<'_, Vec<Cell>> {
        self.cells.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark(&self, range: RangeRequest, stage: LoadingStage) {
        let mut cells = self.cells();
        for position in range.positions() {
            if let Some(slot) = slot(&mut cells, position) {
                *slot = Cell::loading(position, stage);
            }
        }
    }

    fn settle(&self, range: RangeRequest, fetched: Vec<Cell>) {
        let mut fetched = fetched.into_iter();
        let mut cells = self.cells();
        for position in range.positions() {
            let cell = fetched
                .next()
                .unwrap_or_else(|| Cell::placeholder(position, PlaceholderReason::Exhausted));
            if let Some(slot) = slot(&mut cells, position) {
                *slot = cell;
            }
        }
    }

    fn fail(&self, range: RangeRequest) {
        let mut cells = self.cells();
        for position in range.positions() {
            if let Some(slot) = slot(&mut cells, position) {
                *slot = Cell::placeholder(position, PlaceholderReason::FetchFailed);
            }
        }
    }

    fn with_frontier<T>(&self, f: impl FnOnce(&mut VirtualScrollFrontier) -> T) -> Option<T> {
        self.frontier
            .as_ref()
            .map(|frontier| f(&mut frontier.lock().unwrap_or_else(PoisonError::into_inner)))
    }
}

fn slot(cells: &mut [Cell], position: u64) -> Option<&mut Cell> {
    usize::try_from(position).ok().and_then(|i| cells.get_mut(i))
}

/// A large client selection being filled in tiers.
#[derive(Debug)]
pub struct GridSelection {
    session: Arc<QuoteSession>,
    state: Arc<SelectionState>,
    total: u64,
    mode: SelectionMode,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl GridSelection {
    /// Fetches the immediate tier and schedules the rest.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidRequest`] if `total` is out of
    /// bounds, or [`OrchestratorError::SessionClosed`] after shutdown.
    pub async fn start(session: Arc<QuoteSession>, total: u64) -> Result<Self, OrchestratorError> {
        session.validate_count(total)?;
        session.ensure_open()?;

        let schedule = session.config().schedule.clone();
        let plan = plan_tiers(total, &schedule);
        let mode = plan.mode();
        let state = Arc::new(SelectionState::new(total, &plan, &schedule));

        let batch = session.fetch_batch(plan.immediate).await?;
        state.settle(plan.immediate, batch.cells);
        let started = Instant::now();

        let tasks = match plan.follow_up {
            FollowUp::Staggered(batches) => batches
                .into_iter()
                .map(|batch| {
                    spawn_staggered(Arc::clone(&session), Arc::downgrade(&state), batch, started)
                })
                .collect(),
            FollowUp::Done | FollowUp::VirtualScroll => Vec::new(),
        };

        log::info!(
            "Started {mode} selection of {total} positions, {} immediate",
            plan.immediate.limit
        );

        Ok(Self {
            session,
            state,
            total,
            mode,
            tasks: Mutex::new(tasks),
        })
    }

    /// Number of positions.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// How the selection is being filled.
    #[must_use]
    pub const fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// A copy of the current cells.
    #[must_use]
    pub fn snapshot(&self) -> SelectionSnapshot {
        let cells = self.state.cells().clone();
        let settled = cells.iter().filter(|cell| !cell.is_loading()).count() as u64;

        SelectionSnapshot {
            total: self.total,
            mode: self.mode,
            settled,
            complete: settled == self.total,
            cells,
        }
    }

    /// Handles a scroll signal, loading the next batch if the signal is
    /// accepted.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::SessionClosed`] if the session shut
    /// down, or [`OrchestratorError::Task`] if the batch task died.
    pub async fn on_scroll(
        &self,
        viewport_start: Option<u64>,
    ) -> Result<ScrollOutcome, OrchestratorError> {
        let Some(signal) = self
            .state
            .with_frontier(|frontier| frontier.signal(Instant::now(), viewport_start))
        else {
            return Ok(ScrollOutcome::NotScrollable);
        };

        let range = match signal {
            Signal::Load(range) => range,
            Signal::Debounced => return Ok(ScrollOutcome::Debounced),
            Signal::Busy => return Ok(ScrollOutcome::Busy),
            Signal::Complete => return Ok(ScrollOutcome::Complete),
        };

        log::debug!("Scroll loading positions {}..{}", range.offset, range.end());
        self.state.mark(range, LoadingStage::Fetching);

        let session = Arc::clone(&self.session);
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            match session.fetch_batch(range).await {
                Ok(batch) => {
                    state.settle(range, batch.cells);
                    state.with_frontier(|frontier| frontier.complete_batch(range));
                    Ok(())
                }
                Err(e) => {
                    state.mark(range, LoadingStage::Queued);
                    state.with_frontier(VirtualScrollFrontier::abort_batch);
                    Err(e)
                }
            }
        });

        match handle.await {
            Ok(result) => result.map(|()| ScrollOutcome::Loaded { range }),
            Err(e) => {
                self.state.with_frontier(VirtualScrollFrontier::abort_batch);
                Err(e.into())
            }
        }
    }

    /// Waits for every staggered batch to finish.
    pub async fn wait_staggered(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                log::error!("Staggered batch task failed: {e}");
            }
        }
    }
}

fn spawn_staggered(
    session: Arc<QuoteSession>,
    state: Weak<SelectionState>,
    batch: StaggeredBatch,
    started: Instant,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep_until(started + batch.delay).await;

        let Some(state) = state.upgrade() else {
            log::debug!(
                "Selection dropped, skipping batch {}..{}",
                batch.range.offset,
                batch.range.end()
            );
            return;
        };

        state.mark(batch.range, LoadingStage::Fetching);
        match session.fetch_batch(batch.range).await {
            Ok(fetched) => state.settle(batch.range, fetched.cells),
            Err(e) => {
                log::warn!(
                    "Staggered batch {}..{} failed: {e}",
                    batch.range.offset,
                    batch.range.end()
                );
                state.fail(batch.range);
            }
        }
    })
}
