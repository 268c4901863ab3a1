//! Pipeline stages for catalog extraction.
//!
//! Each submodule implements one step. The two external collaborators sit
//! behind traits ([`render::Document`], [`llm::InferenceService`]) so the
//! concurrency and failure handling can be tested with stubs.
//!
//! ## Data Flow
//!
//! ```text
//!              ┌──────────── worker (per page) ─────────────┐
//! scheduler ─▶ │ render ─▶ encode ─▶ llm+retry ─▶ parse     │ ─▶ aggregate
//! (≤ N pages)  │ (pdfium)  (JPEG)    (classify)   (records) │    (progress, order)
//!              └────────────────────────────────────────────┘
//! ```
//!
//! 1. [`input`]: canonicalise the path, URL or byte buffer to a local file
//! 2. [`render`] + [`encode`]: rasterise one page in `spawn_blocking`
//! 3. [`llm`]: one inference call; [`retry`] wraps it, asking [`classify`]
//!    whether a failure is worth another attempt
//! 4. [`parse`]: reply text to validated records
//! 5. [`worker`]: steps 2-4 for one page, folding every failure into the
//!    page's outcome
//! 6. [`scheduler`]: bounded pool of workers
//! 7. [`aggregate`]: progress events, partial batches, final page order

pub mod aggregate;
pub mod classify;
pub mod encode;
pub mod input;
pub mod llm;
pub mod parse;
pub mod render;
pub mod retry;
pub mod scheduler;
pub mod worker;
