//! Caller-facing entry point for a streaming run.
//!
//! [`start_run`] validates the document, spawns the scheduler and aggregator
//! on the current tokio runtime and returns a [`RunHandle`] with three
//! outputs:
//!
//! * `progress`: one [`ProgressState`] per completed page
//! * `batches`: the records of each page as soon as it completes
//! * [`RunHandle::finish`]: the page-ordered [`RunResult`]
//!
//! Both channels close when the run ends. Neither has to be drained; events
//! buffer until the handle is dropped.
//!
//! Dropping the handle cancels the run: pages already in flight finish, no
//! further page is dispatched.
//!
//! ```rust,no_run
//! # use edgequake_catalog::*;
//! # use std::sync::Arc;
//! # async fn demo(doc: Arc<dyn Document>, svc: Arc<dyn InferenceService>) -> Result<(), ExtractError> {
//! let config = ExtractionConfig::default();
//! let mut run = start_run(doc, svc, config.brand_instructions(), &config)?;
//! while let Some(p) = run.progress.recv().await {
//!     eprintln!("{}/{}", p.completed_pages, p.total_pages);
//! }
//! let result = run.finish().await?;
//! # Ok(()) }
//! ```

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::output::RunResult;
use crate::pipeline::aggregate::Aggregator;
use crate::pipeline::llm::InferenceService;
use crate::pipeline::render::Document;
use crate::pipeline::scheduler::schedule;
use crate::pipeline::worker::PageContext;
use crate::progress::{ProgressState, RecordBatch};
use crate::prompts::BrandInstructions;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::info;

/// A run in progress. Cancelled when dropped.
#[derive(Debug)]
pub struct RunHandle {
    pub progress: UnboundedReceiver<ProgressState>,
    pub batches: UnboundedReceiver<RecordBatch>,
    cancel: CancellationToken,
    task: JoinHandle<RunResult>,
    total_pages: usize,
    _cancel_on_drop: DropGuard,
}

impl RunHandle {
    /// Number of pages selected for this run.
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Stop dispatching new pages. In-flight pages still finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this run, for use from another task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for every dispatched page and return the ordered result.
    pub async fn finish(self) -> Result<RunResult, ExtractError> {
        self.task
            .await
            .map_err(|e| ExtractError::Internal(format!("Run task failed: {}", e)))
    }
}

/// Start extracting `document` with `service`.
///
/// Fails before anything is dispatched when the document has no pages or
/// the page selection in `config` matches none of them. Must be called from
/// within a tokio runtime.
pub fn start_run(
    document: Arc<dyn Document>,
    service: Arc<dyn InferenceService>,
    instructions: BrandInstructions,
    config: &ExtractionConfig,
) -> Result<RunHandle, ExtractError> {
    let page_count = document.page_count();
    if page_count == 0 {
        return Err(ExtractError::EmptyDocument);
    }

    let selected = config.pages.to_indices(page_count);
    if selected.is_empty() {
        return Err(ExtractError::NoPagesSelected { total: page_count });
    }
    let total_pages = selected.len();

    info!(
        "Starting run: {} of {} page(s), brand {}, concurrency {}",
        total_pages, page_count, instructions.brand, config.concurrency
    );

    let (progress_tx, progress_rx) = unbounded_channel();
    let (batch_tx, batch_rx) = unbounded_channel();
    let cancel = CancellationToken::new();

    let brand = instructions.brand;
    let ctx = PageContext {
        document,
        service,
        instructions: Arc::new(instructions),
        retry: config.retry_policy(),
        render: config.render_options(),
    };
    let concurrency = config.concurrency;
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        let started = Instant::now();
        let mut aggregator = Aggregator::new(total_pages)
            .with_progress(progress_tx)
            .with_batches(batch_tx);

        let mut outcomes = schedule(ctx, selected.clone(), concurrency, token);
        while let Some(outcome) = outcomes.next().await {
            aggregator.accept(outcome);
        }

        aggregator.finish(&selected, brand, started)
    });

    Ok(RunHandle {
        progress: progress_rx,
        batches: batch_rx,
        _cancel_on_drop: cancel.clone().drop_guard(),
        cancel,
        task,
        total_pages,
    })
}
