//! Events a run emits while pages complete.
//!
//! Two independent streams leave a running extraction (see
//! [`crate::run::RunHandle`]):
//!
//! * [`ProgressState`]: one snapshot per completed page, in completion order.
//!   `completed_pages` counts pages, it does not name the page that just
//!   finished; pages finish out of order under concurrency.
//! * [`RecordBatch`]: the records of one page, sent as soon as that page
//!   finishes, for callers that want partial results before the run ends.
//!
//! Both are sent at most once per page.

use crate::output::ExtractionRecord;
use serde::{Deserialize, Serialize};

/// Progress snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub completed_pages: usize,
    pub total_pages: usize,
}

impl ProgressState {
    pub fn is_complete(&self) -> bool {
        self.completed_pages >= self.total_pages
    }

    /// Completion ratio in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.total_pages == 0 {
            return 1.0;
        }
        self.completed_pages as f64 / self.total_pages as f64
    }
}

/// Records of one completed page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordBatch {
    /// 1-indexed page the records came from.
    pub page_number: usize,
    pub records: Vec<ExtractionRecord>,
}
