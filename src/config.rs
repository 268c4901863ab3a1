//! Configuration types for catalog extraction.
//!
//! All run behaviour is controlled through [`ExtractionConfig`], built via its
//! [`ExtractionConfigBuilder`]. The three knobs that govern load on the
//! inference service (`concurrency`, `max_attempts`, `base_delay_ms`) are
//! explicit fields rather than constants so each run can be tuned to the
//! provider's rate-limit headroom.

use crate::error::ExtractError;
use crate::pipeline::render::RenderOptions;
use crate::pipeline::retry::RetryPolicy;
use crate::prompts::{Brand, BrandInstructions};
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for one extraction run.
///
/// # Example
/// ```rust
/// use edgequake_catalog::{Brand, ExtractionConfig};
///
/// let config = ExtractionConfig::builder()
///     .brand(Brand::Natura)
///     .campaign("202509")
///     .concurrency(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Maximum pages in flight at once. Default: 3.
    ///
    /// Every in-flight page holds one inference call (or one backoff sleep).
    /// Keep this under the provider's per-minute request allowance; a few
    /// concurrent calls already hide most network latency.
    pub concurrency: usize,

    /// Attempts per page, including the first. Default: 3.
    pub max_attempts: u32,

    /// Backoff unit in milliseconds. Default: 1000.
    ///
    /// Retry *k* waits `base_delay_ms * 2^k`: 2 s → 4 s with the default.
    pub base_delay_ms: u64,

    /// Page render scale relative to the PDF's natural size. Range: 0.5–4.0. Default: 1.5.
    ///
    /// Catalog prices are often set in small type next to large photos; 1.5×
    /// keeps them legible without producing multi-megabyte uploads.
    pub scale: f32,

    /// Cap on the longest edge of a rendered page, in pixels. Default: 2400.
    pub max_rendered_pixels: u32,

    /// JPEG quality of the page image (1–100). Default: 85.
    pub jpeg_quality: u8,

    /// Per-call timeout in seconds. Default: 120. A timeout counts as transient.
    pub api_timeout_secs: u64,

    /// LLM model identifier. If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "gemini", "anthropic").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 8192.
    ///
    /// Dense catalog pages list 20+ products; the JSON for those easily
    /// passes 4 000 tokens and a truncated array is unparseable.
    pub max_tokens: usize,

    /// Catalog family selecting the built-in instructions. Default: Generic.
    pub brand: Brand,

    /// Campaign stamped on records that do not report one.
    pub campaign: Option<String>,

    /// Custom instruction text replacing the brand's built-in text.
    pub instructions: Option<String>,

    /// Page selection. Default: All pages.
    pub pages: PageSelection,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            max_attempts: 3,
            base_delay_ms: 1000,
            scale: 1.5,
            max_rendered_pixels: 2400,
            jpeg_quality: 85,
            api_timeout_secs: 120,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 8192,
            brand: Brand::default(),
            campaign: None,
            instructions: None,
            pages: PageSelection::default(),
            password: None,
            download_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("concurrency", &self.concurrency)
            .field("max_attempts", &self.max_attempts)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("scale", &self.scale)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("brand", &self.brand)
            .field("campaign", &self.campaign)
            .field("pages", &self.pages)
            .finish()
    }
}

impl ExtractionConfig {
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            scale: self.scale,
            max_pixels: self.max_rendered_pixels,
            jpeg_quality: self.jpeg_quality,
        }
    }

    /// Instructions for this run: brand text (or override) plus campaign default.
    pub fn brand_instructions(&self) -> BrandInstructions {
        let inst = match self.instructions.as_deref() {
            Some(text) => BrandInstructions::with_text(self.brand, text),
            None => BrandInstructions::for_brand(self.brand),
        };
        match self.campaign.as_deref() {
            Some(c) => inst.with_campaign(c),
            None => inst,
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn base_delay_ms(mut self, ms: u64) -> Self {
        self.config.base_delay_ms = ms;
        self
    }

    pub fn scale(mut self, scale: f32) -> Self {
        self.config.scale = scale.clamp(0.5, 4.0);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn brand(mut self, brand: Brand) -> Self {
        self.config.brand = brand;
        self
    }

    pub fn campaign(mut self, campaign: impl Into<String>) -> Self {
        self.config.campaign = Some(campaign.into());
        self
    }

    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.config.instructions = Some(text.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(ExtractError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_attempts == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if !(0.5..=4.0).contains(&c.scale) {
            return Err(ExtractError::InvalidConfig(format!(
                "Scale must be 0.5–4.0, got {}",
                c.scale
            )));
        }
        if c.max_tokens == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Specifies which pages of the PDF to extract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// All pages (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed pages.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}
