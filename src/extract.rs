//! Eager (whole-document) extraction entry points.
//!
//! These wrap [`crate::run::start_run`] for callers that only want the final
//! [`RunResult`]: resolve the input, resolve the provider, open the PDF, run,
//! wait. Use [`crate::run::start_run`] directly to watch progress or consume
//! records page by page.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::output::{DocumentInfo, RunResult, RunStats};
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::llm::{InferenceService, LlmInference};
use crate::pipeline::render::{Document, PdfDocument};
use crate::run::start_run;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Extract every product listing from a PDF file or URL.
///
/// # Returns
/// `Ok(RunResult)` once every selected page has an outcome, even if some
/// pages failed (see `result.stats.failed_pages`, or call
/// [`RunResult::ensure_complete`]).
///
/// # Errors
/// Only for problems that stop the run from starting: missing or invalid
/// file, wrong password, zero pages, no provider configured.
///
/// # Example
/// ```rust,no_run
/// use edgequake_catalog::{extract, Brand, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExtractionConfig::builder().brand(Brand::Natura).build()?;
/// let result = extract("natura-c09.pdf", &config).await?;
/// println!("{}", serde_json::to_string_pretty(&result.records)?);
/// # Ok(())
/// # }
/// ```
pub async fn extract(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<RunResult, ExtractError> {
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    extract_resolved(resolved, config).await
}

/// Extract from PDF bytes held in memory.
///
/// The bytes are written to a managed temp file that is removed when the
/// run ends.
pub async fn extract_from_bytes(
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<RunResult, ExtractError> {
    let resolved = input::resolve_bytes(bytes)?;
    extract_resolved(resolved, config).await
}

/// Run an already opened document against an already built service.
///
/// This is the seam for custom renderers and inference back-ends.
pub async fn extract_document(
    document: Arc<dyn Document>,
    service: Arc<dyn InferenceService>,
    config: &ExtractionConfig,
) -> Result<RunResult, ExtractError> {
    start_run(document, service, config.brand_instructions(), config)?
        .finish()
        .await
}

/// Extract and write the records to `output_path` as a JSON array.
///
/// Uses atomic write (temp file + rename) so a crash never leaves a
/// truncated file behind.
pub async fn extract_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<RunStats, ExtractError> {
    let result = extract(input_str, config).await?;
    let json = serde_json::to_vec_pretty(&result.records)
        .map_err(|e| ExtractError::Internal(format!("Failed to serialise records: {}", e)))?;
    write_atomic(output_path.as_ref(), &json).await?;
    Ok(result.stats)
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<RunResult, ExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(input_str, config))
}

/// Read page count and metadata without calling the inference service.
///
/// `download_timeout_secs` only applies when `input_str` is a URL.
pub async fn inspect(
    input_str: impl AsRef<str>,
    password: Option<String>,
    download_timeout_secs: u64,
) -> Result<DocumentInfo, ExtractError> {
    let resolved = input::resolve_input(input_str.as_ref(), download_timeout_secs).await?;
    let document = PdfDocument::open(resolved, password).await?;
    Ok(document.info().clone())
}

/// Write `bytes` to `path` via a sibling temp file and a rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ExtractError> {
    let write_failed = |source| ExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, bytes).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)?;
    Ok(())
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn extract_resolved(
    resolved: ResolvedInput,
    config: &ExtractionConfig,
) -> Result<RunResult, ExtractError> {
    let service = LlmInference::from_config(config)?;
    let document = PdfDocument::open(resolved, config.password.clone()).await?;
    extract_document(Arc::new(document), Arc::new(service), config).await
}
