//! Error types for the edgequake-catalog library.
//!
//! Three error types, one per failure scope:
//!
//! * [`ExtractError`]: **fatal**, the run cannot start at all (bad input
//!   file, wrong password, zero pages, provider not configured). Returned as
//!   `Err(ExtractError)` from the top-level entry points, always before any
//!   page is dispatched.
//!
//! * [`PageError`]: **non-fatal**, one page failed (render glitch, rejected
//!   request, unparseable reply). Stored on the page's
//!   [`crate::output::PageOutcome`]; every other page still runs.
//!
//! * [`ServiceError`]: what the inference collaborator reports for a single
//!   call. The [`crate::pipeline::classify`] module labels it transient or
//!   permanent, and the retry policy acts on that label.

use crate::pipeline::classify::ErrorClass;
use edgequake_llm::LlmError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors returned by the edgequake-catalog library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Document errors ───────────────────────────────────────────────────
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The document opened but has no pages; there is nothing to dispatch.
    #[error("Document has no pages")]
    EmptyDocument,

    /// The page selection matched none of the document's pages.
    #[error("No pages selected (document has {total} pages)")]
    NoPagesSelected { total: usize },

    // ── Service errors ────────────────────────────────────────────────────
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Some pages failed or were never dispatched.
    ///
    /// Only returned by [`crate::output::RunResult::ensure_complete`], for
    /// callers that treat any incomplete page as an error.
    #[error("{failed} failed and {skipped} skipped out of {total} pages")]
    PartialFailure {
        failed: usize,
        skipped: usize,
        total: usize,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install pdfium system-wide, or set PDFIUM_LIB_PATH=/path/to/libpdfium."
    )]
    PdfiumBindingFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Stored on [`crate::output::PageOutcome`] and [`crate::output::PageReport`].
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    #[error("Page {page}: {class} service error after {attempts} attempt(s): {detail}")]
    ServiceFailed {
        page: usize,
        class: ErrorClass,
        attempts: u32,
        detail: String,
    },

    #[error("Page {page}: response could not be parsed: {detail}")]
    ParseFailed { page: usize, detail: String },

    #[error("Page {page}: not dispatched (run cancelled)")]
    NotDispatched { page: usize },
}

/// Failure of one call to the inference service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    /// HTTP 429 / RESOURCE_EXHAUSTED: the service wants us to slow down.
    #[error("rate limited: {detail}")]
    RateLimited {
        retry_after: Option<Duration>,
        detail: String,
    },

    /// Billing or hard quota exhausted; waiting will not help.
    #[error("quota exhausted: {detail}")]
    QuotaExhausted { detail: String },

    /// The service answered with an HTTP error status.
    #[error("HTTP {code}: {detail}")]
    Status { code: u16, detail: String },

    #[error("call timed out: {detail}")]
    Timeout { detail: String },

    /// Connection refused, reset or dropped mid-response.
    #[error("network error: {detail}")]
    Network { detail: String },

    /// The provider failed on its side without a usable status.
    #[error("provider unavailable: {detail}")]
    Unavailable { detail: String },

    /// The request itself was refused: credentials, model name, input size.
    #[error("request rejected: {detail}")]
    Rejected { detail: String },

    #[error("{0}")]
    Other(String),
}

static RE_HTTP_STATUS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([45]\d\d)\b").unwrap());

static RE_RETRY_AFTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)retry(?:[ _-]?after|[ _-]?delay)?[^0-9]{0,16}(\d+(?:\.\d+)?)\s*s")
        .unwrap()
});

impl ServiceError {
    /// Build a structured error from a provider's error message.
    ///
    /// Providers report failures as free text ("429 Too Many Requests",
    /// "RESOURCE_EXHAUSTED", "503 Service Unavailable"), so the message is the
    /// only stable thing to inspect across providers.
    pub fn from_message(message: impl Into<String>) -> Self {
        let detail = message.into();
        let lower = detail.to_lowercase();

        if lower.contains("insufficient_quota") {
            return ServiceError::QuotaExhausted { detail };
        }

        if lower.contains("rate limit")
            || lower.contains("rate_limit")
            || lower.contains("ratelimit")
            || lower.contains("too many requests")
            || lower.contains("resource_exhausted")
            || lower.contains("quota exceeded")
            || lower.contains("quota_exceeded")
            || RE_HTTP_STATUS
                .captures_iter(&detail)
                .any(|c| &c[1] == "429")
        {
            return ServiceError::RateLimited {
                retry_after: retry_after_hint(&detail),
                detail,
            };
        }

        if let Some(code) = RE_HTTP_STATUS
            .captures(&detail)
            .and_then(|c| c[1].parse::<u16>().ok())
        {
            return ServiceError::Status { code, detail };
        }

        if lower.contains("overloaded") || lower.contains("service unavailable") {
            return ServiceError::Status { code: 503, detail };
        }

        if lower.contains("timed out") || lower.contains("timeout") {
            return ServiceError::Timeout { detail };
        }

        ServiceError::Other(detail)
    }
}

fn retry_after_hint(detail: &str) -> Option<Duration> {
    RE_RETRY_AFTER
        .captures(detail)
        .and_then(|c| c[1].parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

impl From<LlmError> for ServiceError {
    /// Map on the provider's own variant; only free-form API errors fall back
    /// to message inspection.
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::RateLimited(detail) => ServiceError::RateLimited {
                retry_after: retry_after_hint(&detail),
                detail,
            },
            LlmError::Timeout => ServiceError::Timeout {
                detail: "provider request timed out".to_string(),
            },
            LlmError::NetworkError(detail) => ServiceError::Network { detail },
            LlmError::ProviderError(detail) => match ServiceError::from_message(detail) {
                ServiceError::Other(detail) => ServiceError::Unavailable { detail },
                known => known,
            },
            e @ (LlmError::AuthError(_)
            | LlmError::InvalidRequest(_)
            | LlmError::ModelNotFound(_)
            | LlmError::TokenLimitExceeded { .. }
            | LlmError::ConfigError(_)
            | LlmError::NotSupported(_)) => ServiceError::Rejected {
                detail: e.to_string(),
            },
            LlmError::ApiError(detail) => ServiceError::from_message(detail),
            e @ (LlmError::SerializationError(_) | LlmError::Unknown(_)) => {
                ServiceError::from_message(e.to_string())
            }
        }
    }
}
