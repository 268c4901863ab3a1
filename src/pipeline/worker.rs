//! Page worker: one page from render to validated records.
//!
//! Steps run strictly in order: render → infer (through the retry policy) →
//! parse → normalise. A failure at any step ends the page with
//! `failed = true` and no records; nothing is propagated to the caller, so a
//! bad page costs completeness, never the run.

use crate::error::PageError;
use crate::output::PageOutcome;
use crate::pipeline::llm::InferenceService;
use crate::pipeline::parse::parse_records;
use crate::pipeline::render::{Document, RenderOptions};
use crate::pipeline::retry::{Attempted, RetryPolicy};
use crate::prompts::BrandInstructions;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Everything a worker shares with the other workers of the same run.
///
/// Cheap to clone: every field is an `Arc` or `Copy`.
#[derive(Clone)]
pub struct PageContext {
    pub document: Arc<dyn Document>,
    pub service: Arc<dyn InferenceService>,
    pub instructions: Arc<BrandInstructions>,
    pub retry: RetryPolicy,
    pub render: RenderOptions,
}

impl PageContext {
    /// Process the page at `page_index` (0-based). Never fails.
    pub async fn run_page(&self, page_index: usize) -> PageOutcome {
        let start = Instant::now();
        let page_num = page_index + 1;
        let elapsed_ms = |start: Instant| start.elapsed().as_millis() as u64;

        let image = match self.document.render_page(page_index, self.render).await {
            Ok(image) => image,
            Err(e) => {
                warn!("Page {}: render failed: {}", page_num, e);
                return PageOutcome::failure(
                    page_index,
                    PageError::RenderFailed {
                        page: page_num,
                        detail: e.to_string(),
                    },
                    0,
                    elapsed_ms(start),
                );
            }
        };
        debug!("Page {}: rendered {:?}", page_num, image);

        let service = &self.service;
        let instructions = &self.instructions;
        let image = &image;
        let reply = self
            .retry
            .execute(|attempt| async move {
                debug!("Page {}: inference attempt {}", page_num, attempt);
                service.infer(image, instructions).await
            })
            .await;

        let Attempted {
            value: reply,
            attempts,
        } = match reply {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    "Page {}: giving up after {} attempt(s): {}",
                    page_num, e.attempts, e.error
                );
                return PageOutcome::failure(
                    page_index,
                    PageError::ServiceFailed {
                        page: page_num,
                        class: e.class,
                        attempts: e.attempts,
                        detail: e.error.to_string(),
                    },
                    e.attempts,
                    elapsed_ms(start),
                );
            }
        };

        let records = match parse_records(&reply.text, page_num, instructions) {
            Ok(records) => records,
            Err(e) => {
                warn!("Page {}: {}", page_num, e);
                let mut outcome = PageOutcome::failure(
                    page_index,
                    PageError::ParseFailed {
                        page: page_num,
                        detail: e.to_string(),
                    },
                    attempts,
                    elapsed_ms(start),
                );
                outcome.input_tokens = reply.input_tokens;
                outcome.output_tokens = reply.output_tokens;
                return outcome;
            }
        };

        debug!(
            "Page {}: {} record(s) after {} attempt(s)",
            page_num,
            records.len(),
            attempts
        );

        PageOutcome {
            page_index,
            records,
            attempted: true,
            failed: false,
            error: None,
            attempts,
            input_tokens: reply.input_tokens,
            output_tokens: reply.output_tokens,
            duration_ms: elapsed_ms(start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::pipeline::classify::ErrorClass;
    use crate::pipeline::encode::PageImage;
    use crate::pipeline::llm::InferenceReply;
    use crate::pipeline::render::RenderError;
    use crate::prompts::Brand;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct OnePage {
        fail_render: bool,
    }

    #[async_trait]
    impl Document for OnePage {
        fn page_count(&self) -> usize {
            1
        }

        async fn render_page(
            &self,
            page_index: usize,
            _options: RenderOptions,
        ) -> Result<PageImage, RenderError> {
            if self.fail_render {
                return Err(RenderError::Failed("broken content stream".into()));
            }
            Ok(PageImage {
                bytes: vec![page_index as u8],
                mime_type: "image/jpeg",
                width: 1,
                height: 1,
            })
        }
    }

    /// Replays a script of replies, one per call.
    struct Scripted(Mutex<Vec<Result<InferenceReply, ServiceError>>>);

    impl Scripted {
        fn new(mut script: Vec<Result<InferenceReply, ServiceError>>) -> Self {
            script.reverse();
            Self(Mutex::new(script))
        }
    }

    #[async_trait]
    impl InferenceService for Scripted {
        async fn infer(
            &self,
            _image: &PageImage,
            _instructions: &BrandInstructions,
        ) -> Result<InferenceReply, ServiceError> {
            self.0
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ServiceError::Other("script exhausted".into())))
        }
    }

    fn reply(text: &str) -> Result<InferenceReply, ServiceError> {
        Ok(InferenceReply {
            text: text.into(),
            input_tokens: 100,
            output_tokens: 20,
        })
    }

    fn ctx(fail_render: bool, script: Vec<Result<InferenceReply, ServiceError>>) -> PageContext {
        PageContext {
            document: Arc::new(OnePage { fail_render }),
            service: Arc::new(Scripted::new(script)),
            instructions: Arc::new(BrandInstructions::for_brand(Brand::Natura)),
            retry: RetryPolicy::new(3, Duration::from_millis(10)),
            render: RenderOptions::default(),
        }
    }

    #[tokio::test]
    async fn successful_page_stamps_page_number() {
        let c = ctx(
            false,
            vec![reply(r#"[{"code":"A1","name":"Kaiak","regularPrice":"99,90"}]"#)],
        );
        let o = c.run_page(2).await;
        assert!(o.attempted);
        assert!(!o.failed);
        assert_eq!(o.attempts, 1);
        assert_eq!(o.records.len(), 1);
        assert_eq!(o.records[0].page_number, 3);
        assert_eq!(o.records[0].brand, "Natura");
        assert_eq!(o.input_tokens, 100);
    }

    #[tokio::test]
    async fn render_failure_makes_no_call() {
        let c = ctx(true, vec![]);
        let o = c.run_page(0).await;
        assert!(o.failed);
        assert!(o.records.is_empty());
        assert_eq!(o.attempts, 0);
        assert!(matches!(o.error, Some(PageError::RenderFailed { page: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let c = ctx(
            false,
            vec![
                Err(ServiceError::Status {
                    code: 503,
                    detail: "overloaded".into(),
                }),
                reply(r#"{"code":"B2","name":"Ekos"}"#),
            ],
        );
        let o = c.run_page(0).await;
        assert!(!o.failed);
        assert_eq!(o.attempts, 2);
        assert_eq!(o.records[0].code, "B2");
    }

    #[tokio::test]
    async fn permanent_error_fails_page_after_one_call() {
        let c = ctx(
            false,
            vec![Err(ServiceError::Status {
                code: 400,
                detail: "invalid image".into(),
            })],
        );
        let o = c.run_page(0).await;
        assert!(o.failed);
        assert_eq!(o.attempts, 1);
        match o.error {
            Some(PageError::ServiceFailed {
                class, attempts, ..
            }) => {
                assert_eq!(class, ErrorClass::Permanent);
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unparseable_reply_fails_page_but_keeps_usage() {
        let c = ctx(false, vec![reply("Sorry, I cannot help with that.")]);
        let o = c.run_page(0).await;
        assert!(o.failed);
        assert!(o.records.is_empty());
        assert_eq!(o.output_tokens, 20);
        assert!(matches!(o.error, Some(PageError::ParseFailed { .. })));
    }
}
