//! # edgequake-catalog
//!
//! Extract product listings from PDF catalogs using Vision Language Models.
//!
//! Each catalog page is rendered to an image and sent to a multimodal model
//! with brand-specific instructions and a JSON schema. The replies are
//! parsed into [`ExtractionRecord`]s (code, name, prices, content) and
//! assembled in page order.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      resolve local file, URL download or in-memory bytes
//!  ├─ 2. Schedule   at most `concurrency` pages in flight
//!  ├─ 3. Worker     render (pdfium) → JPEG → VLM call with retry → parse
//!  ├─ 4. Aggregate  progress + partial batches as pages finish
//!  └─ 5. Output     records ordered by page, per-page reports, stats
//! ```
//!
//! A page that fails (render error, rejected request, unparseable reply,
//! retries exhausted) is reported on its own and never aborts the run. Only
//! problems with the document as a whole (missing file, zero pages) are
//! returned as `Err`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_catalog::{extract, Brand, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ExtractionConfig::builder()
//!         .brand(Brand::Belcorp)
//!         .campaign("202512")
//!         .build()?;
//!     let result = extract("esika-c12.pdf", &config).await?;
//!     eprintln!(
//!         "{} products from {}/{} pages",
//!         result.stats.total_records,
//!         result.stats.pages_with_records,
//!         result.stats.total_pages
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `catalog2json` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-catalog = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod run;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, PageSelection};
pub use error::{ExtractError, PageError, ServiceError};
pub use extract::{extract, extract_document, extract_from_bytes, extract_sync, extract_to_file, inspect};
pub use output::{DocumentInfo, ExtractionRecord, PageOutcome, PageReport, RunResult, RunStats};
pub use pipeline::classify::ErrorClass;
pub use pipeline::encode::PageImage;
pub use pipeline::llm::{InferenceReply, InferenceService, LlmInference};
pub use pipeline::render::{Document, PdfDocument, RenderError, RenderOptions};
pub use pipeline::retry::RetryPolicy;
pub use progress::{ProgressState, RecordBatch};
pub use prompts::{Brand, BrandInstructions};
pub use run::{start_run, RunHandle};
