//! Output types: records, per-page outcomes and the final run result.

use crate::error::{ExtractError, PageError};
use crate::prompts::Brand;
use serde::{Deserialize, Serialize};

/// One product listing extracted from a catalog page.
///
/// Serialises with the camelCase field names used by the response schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRecord {
    pub code: String,
    pub name: String,
    /// Unit of `content` ("ml", "gr", …); empty when not shown.
    pub presentation: String,
    pub content: f64,
    /// 0 means "no offer price shown".
    pub offer_price: f64,
    /// 0 means "no validated price".
    pub regular_price: f64,
    pub brand: String,
    pub campaign: String,
    /// 1-indexed page the record was read from.
    pub page_number: usize,
}

/// Everything one page worker produced.
///
/// `failed = true` always comes with empty `records`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageOutcome {
    /// 0-indexed page.
    pub page_index: usize,
    pub records: Vec<ExtractionRecord>,
    /// False only for pages that were never dispatched.
    pub attempted: bool,
    pub failed: bool,
    pub error: Option<PageError>,
    /// Inference calls made for this page (0 if rendering failed).
    pub attempts: u32,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
}

impl PageOutcome {
    /// 1-indexed page number.
    pub fn page_num(&self) -> usize {
        self.page_index + 1
    }

    /// Outcome for a page the worker gave up on.
    pub fn failure(page_index: usize, error: PageError, attempts: u32, duration_ms: u64) -> Self {
        Self {
            page_index,
            records: Vec::new(),
            attempted: true,
            failed: true,
            error: Some(error),
            attempts,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms,
        }
    }

    /// Placeholder for a page the scheduler never handed to a worker.
    pub fn not_dispatched(page_index: usize) -> Self {
        Self {
            page_index,
            records: Vec::new(),
            attempted: false,
            failed: false,
            error: Some(PageError::NotDispatched {
                page: page_index + 1,
            }),
            attempts: 0,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
        }
    }
}

/// Per-page status kept in the final result (the records themselves live in
/// [`RunResult::records`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageReport {
    pub page_num: usize,
    pub attempted: bool,
    pub failed: bool,
    pub record_count: usize,
    pub attempts: u32,
    pub duration_ms: u64,
    pub error: Option<PageError>,
}

impl From<&PageOutcome> for PageReport {
    fn from(o: &PageOutcome) -> Self {
        Self {
            page_num: o.page_num(),
            attempted: o.attempted,
            failed: o.failed,
            record_count: o.records.len(),
            attempts: o.attempts,
            duration_ms: o.duration_ms,
            error: o.error.clone(),
        }
    }
}

/// Run-level counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub brand: Brand,
    /// Pages selected for this run.
    pub total_pages: usize,
    /// Pages handed to a worker.
    pub attempted_pages: usize,
    /// Pages that contributed at least one record.
    pub pages_with_records: usize,
    pub failed_pages: usize,
    /// Pages never dispatched (cancelled run).
    pub skipped_pages: usize,
    pub total_records: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
}

/// PDF metadata read when the document is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub producer: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

/// Final result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// All records, ordered by page number then by order within the page.
    pub records: Vec<ExtractionRecord>,
    /// One report per selected page, in page order.
    pub pages: Vec<PageReport>,
    pub stats: RunStats,
}

impl RunResult {
    /// Turn any failed or skipped page into an error.
    pub fn ensure_complete(self) -> Result<Self, ExtractError> {
        let s = &self.stats;
        if s.failed_pages > 0 || s.skipped_pages > 0 {
            return Err(ExtractError::PartialFailure {
                failed: s.failed_pages,
                skipped: s.skipped_pages,
                total: s.total_pages,
            });
        }
        Ok(self)
    }
}
