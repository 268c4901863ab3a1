//! Pipeline integration tests with stub collaborators.
//!
//! No network, no pdfium: `StubCatalog` renders a one-byte "image" holding
//! the page index, and `StubService` answers per page from a script. The
//! tokio clock is paused, so backoff sleeps and simulated latency cost no
//! wall time.

use async_trait::async_trait;
use edgequake_catalog::{
    extract_document, start_run, Brand, BrandInstructions, Document, ErrorClass, ExtractError,
    ExtractionConfig, InferenceReply, InferenceService, PageError, PageImage, PageSelection,
    ProgressState, RecordBatch, RenderError, RenderOptions, RunHandle, RunResult, ServiceError,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

// ── Stubs ────────────────────────────────────────────────────────────────────

struct StubCatalog {
    pages: usize,
    broken: HashSet<usize>,
}

impl StubCatalog {
    fn new(pages: usize) -> Self {
        Self {
            pages,
            broken: HashSet::new(),
        }
    }

    fn with_broken_page(mut self, page_index: usize) -> Self {
        self.broken.insert(page_index);
        self
    }
}

#[async_trait]
impl Document for StubCatalog {
    fn page_count(&self) -> usize {
        self.pages
    }

    async fn render_page(
        &self,
        page_index: usize,
        _options: RenderOptions,
    ) -> Result<PageImage, RenderError> {
        if page_index >= self.pages {
            return Err(RenderError::OutOfRange {
                page: page_index + 1,
                total: self.pages,
            });
        }
        if self.broken.contains(&page_index) {
            return Err(RenderError::Failed("unsupported shading type".into()));
        }
        Ok(PageImage {
            bytes: vec![page_index as u8],
            mime_type: "image/jpeg",
            width: 1,
            height: 1,
        })
    }
}

type Reply = Result<String, ServiceError>;

/// Answers each page from its script, falling back to one product per page.
#[derive(Default)]
struct StubService {
    scripts: Mutex<HashMap<usize, VecDeque<Reply>>>,
    latency_ms: HashMap<usize, u64>,
    calls: Mutex<Vec<(usize, Instant)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl StubService {
    fn script(self, page_index: usize, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(page_index, replies.into());
        self
    }

    fn latency(mut self, page_index: usize, ms: u64) -> Self {
        self.latency_ms.insert(page_index, ms);
        self
    }

    fn calls_for(&self, page_index: usize) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == page_index)
            .map(|(_, t)| *t)
            .collect()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

fn one_product(page_index: usize) -> String {
    format!(
        r#"[{{"code":"P{n}","name":"Product {n}","regularPrice":10}}]"#,
        n = page_index + 1
    )
}

#[async_trait]
impl InferenceService for StubService {
    async fn infer(
        &self,
        image: &PageImage,
        _instructions: &BrandInstructions,
    ) -> Result<InferenceReply, ServiceError> {
        let page = image.bytes[0] as usize;
        self.calls.lock().unwrap().push((page, Instant::now()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let latency = self.latency_ms.get(&page).copied().unwrap_or(50);
        tokio::time::sleep(Duration::from_millis(latency)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&page)
            .and_then(|q| q.pop_front());
        let text = match scripted {
            Some(reply) => reply?,
            None => one_product(page),
        };
        Ok(InferenceReply {
            text,
            input_tokens: 1000,
            output_tokens: 100,
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn config(concurrency: usize) -> ExtractionConfig {
    ExtractionConfig::builder()
        .concurrency(concurrency)
        .max_attempts(3)
        .base_delay_ms(1000)
        .build()
        .unwrap()
}

fn start(
    doc: StubCatalog,
    service: &Arc<StubService>,
    config: &ExtractionConfig,
) -> Result<RunHandle, ExtractError> {
    let service: Arc<dyn InferenceService> = service.clone();
    start_run(Arc::new(doc), service, config.brand_instructions(), config)
}

/// Drain both channels, then wait for the result.
async fn drive(mut run: RunHandle) -> (Vec<ProgressState>, Vec<RecordBatch>, RunResult) {
    let mut progress = Vec::new();
    while let Some(p) = run.progress.recv().await {
        progress.push(p);
    }
    let mut batches = Vec::new();
    while let Some(b) = run.batches.recv().await {
        batches.push(b);
    }
    let result = tokio_test::assert_ok!(run.finish().await);
    (progress, batches, result)
}

fn page_numbers(result: &RunResult) -> Vec<usize> {
    result.records.iter().map(|r| r.page_number).collect()
}

fn assert_close(actual: Duration, expected: Duration) {
    let diff = actual.abs_diff(expected);
    assert!(
        diff <= Duration::from_millis(5),
        "expected ~{expected:?}, got {actual:?}"
    );
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn five_pages_all_succeed() {
    let service = Arc::new(StubService::default());
    let run = start(StubCatalog::new(5), &service, &config(2)).unwrap();
    assert_eq!(run.total_pages(), 5);

    let (progress, batches, result) = drive(run).await;

    assert_eq!(result.records.len(), 5);
    assert_eq!(page_numbers(&result), vec![1, 2, 3, 4, 5]);
    assert_eq!(
        progress.last(),
        Some(&ProgressState {
            completed_pages: 5,
            total_pages: 5
        })
    );
    assert_eq!(batches.len(), 5);
    assert_eq!(result.stats.total_records, 5);
    assert_eq!(result.stats.attempted_pages, 5);
    assert_eq!(result.stats.pages_with_records, 5);
    assert_eq!(result.stats.total_input_tokens, 5000);
    assert!(result.clone().ensure_complete().is_ok());
}

#[tokio::test(start_paused = true)]
async fn result_is_in_page_order_when_pages_finish_out_of_order() {
    // Later pages answer faster, so completion order is reversed.
    let mut service = StubService::default();
    for page in 0..6 {
        service = service.latency(page, 600 - page as u64 * 100);
    }
    let service = Arc::new(service);
    let (_, batches, result) = drive(start(StubCatalog::new(6), &service, &config(6)).unwrap()).await;

    let arrival: Vec<usize> = batches.iter().map(|b| b.page_number).collect();
    assert_eq!(arrival, vec![6, 5, 4, 3, 2, 1]);
    assert_eq!(page_numbers(&result), vec![1, 2, 3, 4, 5, 6]);
    let report_pages: Vec<usize> = result.pages.iter().map(|p| p.page_num).collect();
    assert_eq!(report_pages, vec![1, 2, 3, 4, 5, 6]);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_page_backs_off_then_succeeds() {
    let service = Arc::new(StubService::default().script(
        2,
        vec![
            Err(ServiceError::from_message("HTTP 429 Too Many Requests")),
            Err(ServiceError::from_message("HTTP 429 Too Many Requests")),
        ],
    ));
    let (_, _, result) = drive(start(StubCatalog::new(5), &service, &config(2)).unwrap()).await;

    let calls = service.calls_for(2);
    assert_eq!(calls.len(), 3);
    // Each gap is the backoff plus the stub's 50 ms latency.
    let latency = Duration::from_millis(50);
    let first_gap = calls[1] - calls[0] - latency;
    let second_gap = calls[2] - calls[1] - latency;
    assert_close(first_gap, Duration::from_secs(2));
    assert_close(second_gap, Duration::from_secs(4));
    assert!(second_gap > first_gap);

    let page3 = &result.pages[2];
    assert!(!page3.failed);
    assert_eq!(page3.attempts, 3);
    assert_eq!(result.records.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn malformed_reply_fails_only_that_page() {
    let service = Arc::new(
        StubService::default().script(1, vec![Ok("I am sorry, I can't read this page.".into())]),
    );
    let (progress, _, result) =
        drive(start(StubCatalog::new(5), &service, &config(2)).unwrap()).await;

    assert_eq!(page_numbers(&result), vec![1, 3, 4, 5]);
    let page2 = &result.pages[1];
    assert!(page2.failed);
    assert_eq!(page2.record_count, 0);
    assert_eq!(page2.attempts, 1, "parse failures are not retried");
    assert!(matches!(page2.error, Some(PageError::ParseFailed { page: 2, .. })));

    assert_eq!(result.stats.failed_pages, 1);
    assert_eq!(result.stats.pages_with_records, 4);
    assert_eq!(progress.len(), 5, "failed pages still count as completed");
    assert_eq!(service.total_calls(), 5);

    let err = result.ensure_complete().unwrap_err();
    assert!(matches!(
        err,
        ExtractError::PartialFailure {
            failed: 1,
            skipped: 0,
            total: 5
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn render_failure_is_isolated() {
    let service = Arc::new(StubService::default());
    let doc = StubCatalog::new(4).with_broken_page(0);
    let (_, _, result) = drive(start(doc, &service, &config(2)).unwrap()).await;

    assert_eq!(page_numbers(&result), vec![2, 3, 4]);
    assert!(matches!(
        result.pages[0].error,
        Some(PageError::RenderFailed { page: 1, .. })
    ));
    assert!(service.calls_for(0).is_empty());
}

#[tokio::test(start_paused = true)]
async fn permanent_error_is_not_retried() {
    let service = Arc::new(StubService::default().script(
        0,
        vec![Err(ServiceError::from_message(
            "400 Bad Request: image could not be decoded",
        ))],
    ));
    let (_, _, result) = drive(start(StubCatalog::new(2), &service, &config(1)).unwrap()).await;

    assert_eq!(service.calls_for(0).len(), 1);
    match &result.pages[0].error {
        Some(PageError::ServiceFailed {
            class, attempts, ..
        }) => {
            assert_eq!(*class, ErrorClass::Permanent);
            assert_eq!(*attempts, 1);
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(page_numbers(&result), vec![2]);
}

#[tokio::test(start_paused = true)]
async fn exhausted_transient_errors_fail_the_page() {
    let overloaded = || Err(ServiceError::from_message("503 Service Unavailable"));
    let service = Arc::new(
        StubService::default().script(0, vec![overloaded(), overloaded(), overloaded()]),
    );
    let (_, _, result) = drive(start(StubCatalog::new(1), &service, &config(1)).unwrap()).await;

    assert_eq!(service.calls_for(0).len(), 3);
    let page = &result.pages[0];
    assert!(page.failed);
    assert!(matches!(
        page.error,
        Some(PageError::ServiceFailed {
            class: ErrorClass::Transient,
            attempts: 3,
            ..
        })
    ));
    assert!(result.records.is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrency_limit_is_never_exceeded() {
    let service = Arc::new(StubService::default());
    let (_, _, result) = drive(start(StubCatalog::new(10), &service, &config(3)).unwrap()).await;

    assert_eq!(result.records.len(), 10);
    assert_eq!(service.peak.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn progress_is_monotonic_and_completes_once() {
    let mut service = StubService::default();
    for (page, ms) in [(0, 300), (1, 20), (2, 150), (3, 80), (4, 10), (5, 200), (6, 40)] {
        service = service.latency(page, ms);
    }
    let service = Arc::new(service);
    let (progress, _, _) = drive(start(StubCatalog::new(7), &service, &config(3)).unwrap()).await;

    assert_eq!(progress.len(), 7);
    assert!(progress.windows(2).all(|w| w[0].completed_pages < w[1].completed_pages));
    assert!(progress.iter().all(|p| p.total_pages == 7));
    assert_eq!(progress.iter().filter(|p| p.is_complete()).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn invalid_records_are_filtered_and_defaults_applied() {
    let reply = r#"```json
[
  {"code": "", "name": "Lipstick", "regularPrice": 10},
  {"code": "A1", "name": "Lipstick", "regularPrice": 10},
  {"code": "A2", "name": "", "regularPrice": 12}
]
```"#;
    let service = Arc::new(StubService::default().script(0, vec![Ok(reply.into())]));
    let (_, batches, result) = drive(start(StubCatalog::new(1), &service, &config(1)).unwrap()).await;

    assert_eq!(result.records.len(), 1);
    let r = &result.records[0];
    assert_eq!(r.code, "A1");
    assert_eq!(r.offer_price, 0.0);
    assert_eq!(r.regular_price, 10.0);
    assert_eq!(r.presentation, "");
    assert!(batches
        .iter()
        .flat_map(|b| &b.records)
        .all(|r| !r.code.is_empty() && !r.name.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn zero_pages_fails_before_dispatch() {
    let service = Arc::new(StubService::default());
    let err = tokio_test::assert_err!(start(StubCatalog::new(0), &service, &config(2)));
    assert!(matches!(err, ExtractError::EmptyDocument));
    assert_eq!(service.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn empty_selection_fails_before_dispatch() {
    let service = Arc::new(StubService::default());
    let mut cfg = config(2);
    cfg.pages = PageSelection::Range(9, 12);
    let err = tokio_test::assert_err!(start(StubCatalog::new(4), &service, &cfg));
    assert!(matches!(err, ExtractError::NoPagesSelected { total: 4 }));
    assert_eq!(service.total_calls(), 0);
}

// ── Supplementary behaviour ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn page_selection_limits_the_run() {
    let service = Arc::new(StubService::default());
    let mut cfg = config(2);
    cfg.pages = PageSelection::Set(vec![4, 2]);
    let run = start(StubCatalog::new(6), &service, &cfg).unwrap();
    assert_eq!(run.total_pages(), 2);

    let (progress, _, result) = drive(run).await;
    assert_eq!(page_numbers(&result), vec![2, 4]);
    assert_eq!(result.pages.len(), 2);
    assert_eq!(result.stats.total_pages, 2);
    assert_eq!(progress.last().map(|p| p.total_pages), Some(2));
    assert_eq!(service.total_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_dispatch_and_reports_skipped_pages() {
    let service = Arc::new(StubService::default().latency(0, 10));
    let mut run = start(StubCatalog::new(8), &service, &config(2)).unwrap();

    let first = run.progress.recv().await.unwrap();
    assert_eq!(first.completed_pages, 1);
    run.cancel();

    let (progress, batches, result) = drive(run).await;
    let s = &result.stats;

    assert!(s.skipped_pages >= 1, "stats: {s:?}");
    assert_eq!(s.attempted_pages + s.skipped_pages, 8);
    assert_eq!(result.pages.len(), 8);
    assert_eq!(1 + progress.len(), s.attempted_pages);
    assert_eq!(batches.len(), s.attempted_pages);
    assert_eq!(service.total_calls(), s.attempted_pages);
    assert_eq!(result.records.len(), s.attempted_pages);

    // Pages are dispatched in order, so the skipped ones are a suffix.
    let skipped: Vec<usize> = result
        .pages
        .iter()
        .filter(|p| !p.attempted)
        .map(|p| p.page_num)
        .collect();
    assert_eq!(skipped.last(), Some(&8));
    assert!(skipped.windows(2).all(|w| w[1] == w[0] + 1));
    for page in result.pages.iter().filter(|p| !p.attempted) {
        assert!(!page.failed);
        assert_eq!(
            page.error,
            Some(PageError::NotDispatched {
                page: page.page_num
            })
        );
    }

    assert!(matches!(
        result.ensure_complete(),
        Err(ExtractError::PartialFailure { failed: 0, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_stops_dispatch() {
    let service = Arc::new(StubService::default());
    let run = start(StubCatalog::new(20), &service, &config(2)).unwrap();

    tokio::time::sleep(Duration::from_millis(1)).await;
    let dispatched = service.total_calls();
    drop(run);
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(dispatched <= 2, "dispatched before drop: {dispatched}");
    assert_eq!(service.total_calls(), dispatched);
}

#[tokio::test(start_paused = true)]
async fn configured_brand_and_campaign_fill_missing_fields() {
    let service = Arc::new(StubService::default().script(
        0,
        vec![Ok(r#"[
            {"code":"1","name":"Essencial","regularPrice":"S/ 189,90"},
            {"code":"2","name":"Ekos","regularPrice":45,"campaign":"202510"}
        ]"#
        .into())],
    ));
    let cfg = ExtractionConfig::builder()
        .brand(Brand::Natura)
        .campaign("202509")
        .concurrency(1)
        .build()
        .unwrap();
    let doc: Arc<dyn Document> = Arc::new(StubCatalog::new(1));
    let svc: Arc<dyn InferenceService> = service.clone();
    let result = extract_document(doc, svc, &cfg).await.unwrap();

    assert_eq!(result.stats.brand, Brand::Natura);
    assert_eq!(result.records[0].brand, "Natura");
    assert_eq!(result.records[0].campaign, "202509");
    assert_eq!(result.records[0].regular_price, 189.9);
    assert_eq!(result.records[1].campaign, "202510");
}

#[tokio::test(start_paused = true)]
async fn same_code_on_two_pages_is_kept_twice() {
    let same = r#"[{"code":"X1","name":"Shampoo","regularPrice":20}]"#;
    let service = Arc::new(
        StubService::default()
            .script(0, vec![Ok(same.into())])
            .script(1, vec![Ok(same.into())]),
    );
    let (_, _, result) = drive(start(StubCatalog::new(2), &service, &config(2)).unwrap()).await;
    assert_eq!(result.records.len(), 2);
    assert_eq!(page_numbers(&result), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn result_serialises_camel_case_records() {
    let service = Arc::new(StubService::default());
    let (_, _, result) = drive(start(StubCatalog::new(1), &service, &config(1)).unwrap()).await;
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["records"][0]["pageNumber"], 1);
    assert_eq!(json["records"][0]["regularPrice"], 10.0);
    assert_eq!(json["stats"]["total_records"], 1);
}
