//! Scheduler: a bounded, continuously refilled pool of page workers.
//!
//! Pages are dispatched in index order, but with at most `concurrency`
//! in flight at once; as soon as one finishes the next is started
//! (`buffer_unordered`). Outcomes are yielded in completion order. Ordering
//! the final result is the aggregator's job.
//!
//! Cancellation only stops *dispatch*. Pages already in flight run to
//! completion (or failure) and are still yielded.

use crate::output::PageOutcome;
use crate::pipeline::worker::PageContext;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Outcomes in completion order.
pub type PageStream = Pin<Box<dyn Stream<Item = PageOutcome> + Send>>;

/// Start workers for `page_indices` with at most `concurrency` in flight.
///
/// The stream ends when every dispatched page has an outcome. Pages not
/// dispatched because `cancel` fired produce no item.
pub fn schedule(
    ctx: PageContext,
    page_indices: Vec<usize>,
    concurrency: usize,
    cancel: CancellationToken,
) -> PageStream {
    let concurrency = concurrency.max(1);
    info!(
        "Scheduling {} page(s) with concurrency {}",
        page_indices.len(),
        concurrency
    );

    let outcomes = stream::iter(page_indices)
        .take_while(move |_| {
            let stop = cancel.is_cancelled();
            if stop {
                info!("Cancellation requested; no further pages will be dispatched");
            }
            std::future::ready(!stop)
        })
        .map(move |page_index| {
            let ctx = ctx.clone();
            async move { ctx.run_page(page_index).await }
        })
        .buffer_unordered(concurrency);

    Box::pin(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::pipeline::encode::PageImage;
    use crate::pipeline::llm::{InferenceReply, InferenceService};
    use crate::pipeline::render::{Document, RenderError, RenderOptions};
    use crate::pipeline::retry::RetryPolicy;
    use crate::prompts::{Brand, BrandInstructions};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Blank(usize);

    #[async_trait]
    impl Document for Blank {
        fn page_count(&self) -> usize {
            self.0
        }

        async fn render_page(
            &self,
            page_index: usize,
            _options: RenderOptions,
        ) -> Result<PageImage, RenderError> {
            Ok(PageImage {
                bytes: vec![page_index as u8],
                mime_type: "image/jpeg",
                width: 1,
                height: 1,
            })
        }
    }

    /// Counts concurrent calls; later pages answer faster.
    #[derive(Default)]
    struct Gauge {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InferenceService for Gauge {
        async fn infer(
            &self,
            image: &PageImage,
            _instructions: &BrandInstructions,
        ) -> Result<InferenceReply, ServiceError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            let page = image.bytes[0] as u64;
            tokio::time::sleep(Duration::from_millis(100 - page * 10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(InferenceReply {
                text: format!(r#"[{{"code":"P{page}","name":"Item"}}]"#),
                ..Default::default()
            })
        }
    }

    fn ctx(pages: usize, service: Arc<Gauge>) -> PageContext {
        PageContext {
            document: Arc::new(Blank(pages)),
            service,
            instructions: Arc::new(BrandInstructions::for_brand(Brand::Generic)),
            retry: RetryPolicy::default(),
            render: RenderOptions::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_concurrency() {
        let gauge = Arc::new(Gauge::default());
        let outcomes: Vec<PageOutcome> = schedule(
            ctx(7, gauge.clone()),
            (0..7).collect(),
            3,
            CancellationToken::new(),
        )
        .collect()
        .await;

        assert_eq!(outcomes.len(), 7);
        assert_eq!(gauge.calls.load(Ordering::SeqCst), 7);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
        assert!(outcomes.iter().all(|o| !o.failed));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_dispatches_nothing() {
        let gauge = Arc::new(Gauge::default());
        let token = CancellationToken::new();
        token.cancel();
        let outcomes: Vec<PageOutcome> =
            schedule(ctx(4, gauge.clone()), (0..4).collect(), 2, token)
                .collect()
                .await;
        assert!(outcomes.is_empty());
        assert_eq!(gauge.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_run_lets_in_flight_pages_finish() {
        let gauge = Arc::new(Gauge::default());
        let token = CancellationToken::new();
        let mut stream = schedule(ctx(6, gauge.clone()), (0..6).collect(), 2, token.clone());

        let first = stream.next().await.unwrap();
        token.cancel();
        let rest: Vec<PageOutcome> = stream.collect().await;

        // One page finished, one was in flight, and at most one more had
        // been pulled into the pool when the first completed.
        let total = 1 + rest.len();
        assert!(total < 6, "got {total} outcomes");
        assert!(!first.failed);
        assert!(rest.iter().all(|o| o.attempted && !o.failed));
        assert_eq!(gauge.calls.load(Ordering::SeqCst), total);
    }
}
