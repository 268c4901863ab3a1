//! Inference collaborator: send one page image plus instructions, get text back.
//!
//! [`InferenceService`] is the seam the page worker calls through. The
//! production implementation, [`LlmInference`], wraps an edgequake-llm
//! provider; tests substitute a stub. All prompt text lives in
//! [`crate::prompts`]; this module only assembles messages and maps failures
//! onto [`ServiceError`] so the classifier can label them.

use crate::config::ExtractionConfig;
use crate::error::{ExtractError, ServiceError};
use crate::pipeline::encode::PageImage;
use crate::prompts::BrandInstructions;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// User turn sent next to the page image.
const PAGE_REQUEST: &str = "Extract every product listed on this catalog page.";

/// Raw reply text plus token usage for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferenceReply {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// `Infer(image, instructions) -> text | error`.
///
/// Implementations must be shareable across concurrently running pages and
/// must report failures as [`ServiceError`] so rate limits can be told apart
/// from rejected requests.
#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn infer(
        &self,
        image: &PageImage,
        instructions: &BrandInstructions,
    ) -> Result<InferenceReply, ServiceError>;
}

/// [`InferenceService`] backed by an edgequake-llm vision provider.
pub struct LlmInference {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    timeout: Duration,
}

impl LlmInference {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
            timeout: Duration::from_secs(config.api_timeout_secs.max(1)),
        }
    }

    /// Resolve the provider from `config` and wrap it.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ExtractError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }
}

#[async_trait]
impl InferenceService for LlmInference {
    async fn infer(
        &self,
        image: &PageImage,
        instructions: &BrandInstructions,
    ) -> Result<InferenceReply, ServiceError> {
        let image_data = ImageData::new(image.to_base64(), image.mime_type).with_detail("high");
        let messages = vec![
            ChatMessage::system(&instructions.prompt),
            ChatMessage::user_with_images(PAGE_REQUEST, vec![image_data]),
        ];

        let call = self.provider.chat(&messages, Some(&self.options));
        let response = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(ServiceError::from(e)),
            Err(_) => {
                return Err(ServiceError::Timeout {
                    detail: format!("no response within {}s", self.timeout.as_secs()),
                })
            }
        };

        debug!(
            "{} input tokens, {} output tokens, {} chars",
            response.prompt_tokens,
            response.completion_tokens,
            response.content.len()
        );

        Ok(InferenceReply {
            text: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        response_format: Some("json_object".to_string()),
        ..Default::default()
    }
}

const DEFAULT_MODEL: &str = "gpt-4.1-mini";

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ExtractError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the provider, from most to least specific:
///
/// 1. `config.provider`, used as-is.
/// 2. `config.provider_name` with `config.model` (or the default model).
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set.
/// 4. OpenAI when `OPENAI_API_KEY` is set.
/// 5. [`ProviderFactory::from_env`] auto-detection.
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, &env_model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_vision_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ExtractError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, GEMINI_API_KEY or ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
