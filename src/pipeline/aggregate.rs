//! Aggregator: the single owner of run-wide state.
//!
//! Outcomes arrive in completion order. For each one the aggregator bumps
//! the completed counter, sends a [`ProgressState`] and, when the page has
//! records, a [`RecordBatch`]. It keeps every outcome keyed by page index so
//! [`Aggregator::finish`] can rebuild page order regardless of arrival
//! order. Only one task drives it, so no locking is needed.
//!
//! Records are never deduplicated: the same code on two pages is two
//! records.

use crate::output::{PageOutcome, PageReport, RunResult, RunStats};
use crate::progress::{ProgressState, RecordBatch};
use crate::prompts::Brand;
use std::collections::BTreeMap;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

pub struct Aggregator {
    total_pages: usize,
    completed: usize,
    outcomes: BTreeMap<usize, PageOutcome>,
    progress: Option<UnboundedSender<ProgressState>>,
    batches: Option<UnboundedSender<RecordBatch>>,
}

impl Aggregator {
    /// `total_pages` is the number of pages selected for the run.
    pub fn new(total_pages: usize) -> Self {
        Self {
            total_pages,
            completed: 0,
            outcomes: BTreeMap::new(),
            progress: None,
            batches: None,
        }
    }

    pub fn with_progress(mut self, tx: UnboundedSender<ProgressState>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn with_batches(mut self, tx: UnboundedSender<RecordBatch>) -> Self {
        self.batches = Some(tx);
        self
    }

    pub fn completed_pages(&self) -> usize {
        self.completed
    }

    /// Record one finished page and emit its events.
    ///
    /// A second outcome for the same page replaces the first without a
    /// second progress event.
    pub fn accept(&mut self, outcome: PageOutcome) {
        let page_index = outcome.page_index;
        let is_new = !self.outcomes.contains_key(&page_index);

        if is_new {
            self.completed += 1;
            let state = ProgressState {
                completed_pages: self.completed,
                total_pages: self.total_pages,
            };
            debug!(
                "Page {} done ({}/{})",
                outcome.page_num(),
                state.completed_pages,
                state.total_pages
            );
            // A dropped receiver only means nobody is listening.
            if let Some(tx) = &self.progress {
                let _ = tx.send(state);
            }
            if !outcome.records.is_empty() {
                if let Some(tx) = &self.batches {
                    let _ = tx.send(RecordBatch {
                        page_number: outcome.page_num(),
                        records: outcome.records.clone(),
                    });
                }
            }
        }

        self.outcomes.insert(page_index, outcome);
    }

    /// Build the final result.
    ///
    /// `selected` lists every page index chosen for the run; any without an
    /// outcome is reported as not dispatched.
    pub fn finish(mut self, selected: &[usize], brand: Brand, started: Instant) -> RunResult {
        for &idx in selected {
            self.outcomes
                .entry(idx)
                .or_insert_with(|| PageOutcome::not_dispatched(idx));
        }

        let mut stats = RunStats {
            brand,
            total_pages: self.total_pages,
            ..Default::default()
        };
        let mut records = Vec::new();
        let mut pages = Vec::with_capacity(self.outcomes.len());

        // BTreeMap iterates in ascending page index.
        for outcome in self.outcomes.into_values() {
            if outcome.attempted {
                stats.attempted_pages += 1;
            } else {
                stats.skipped_pages += 1;
            }
            if outcome.failed {
                stats.failed_pages += 1;
            }
            if !outcome.records.is_empty() {
                stats.pages_with_records += 1;
            }
            stats.total_input_tokens += outcome.input_tokens as u64;
            stats.total_output_tokens += outcome.output_tokens as u64;

            pages.push(PageReport::from(&outcome));
            records.extend(outcome.records);
        }

        stats.total_records = records.len();
        stats.total_duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "Run complete: {} record(s) from {}/{} page(s), {} failed, {} skipped, {}ms",
            stats.total_records,
            stats.pages_with_records,
            stats.total_pages,
            stats.failed_pages,
            stats.skipped_pages,
            stats.total_duration_ms
        );

        RunResult {
            records,
            pages,
            stats,
        }
    }
}
