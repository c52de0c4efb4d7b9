//! The model seam: "given an image or JSON blob and a prompt, return JSON text or fail".
//!
//! Extraction and transformation only see [`JsonCapability`]. The production
//! implementation, [`LlmCapability`], wraps an `edgequake-llm` provider and
//! requests JSON-object responses; tests substitute stubs that return fixed
//! JSON so golden behaviour never depends on a live model.

use crate::config::{PipelineConfig, DEFAULT_MODEL};
use crate::error::{CapabilityError, InvoiceError};
use crate::output::PageImage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tracing::{debug, warn};

/// One JSON-returning model call.
#[derive(Debug, Clone)]
pub struct JsonRequest {
    pub system_prompt: String,
    pub user_text: String,
    /// Page image attached to the user turn, for extraction calls.
    pub image: Option<PageImage>,
}

/// A model capability that answers with JSON text.
#[async_trait]
pub trait JsonCapability: Send + Sync {
    /// Label used in error markers, e.g. `"openai"` → `"openai Error: ..."`.
    fn name(&self) -> &str;

    /// Send the request and return the raw response text.
    async fn complete_json(&self, request: &JsonRequest) -> Result<String, CapabilityError>;
}

/// [`JsonCapability`] backed by an `edgequake-llm` chat provider.
pub struct LlmCapability {
    provider: Arc<dyn LLMProvider>,
    label: String,
    options: CompletionOptions,
}

impl LlmCapability {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        let label = provider.name().to_string();
        Self {
            provider,
            label,
            options: build_options(config),
        }
    }
}

#[async_trait]
impl JsonCapability for LlmCapability {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete_json(&self, request: &JsonRequest) -> Result<String, CapabilityError> {
        let mut messages = vec![ChatMessage::system(request.system_prompt.as_str())];
        match &request.image {
            Some(page) => messages.push(ChatMessage::user_with_images(
                request.user_text.as_str(),
                vec![to_image_data(page)],
            )),
            None => messages.push(ChatMessage::user(request.user_text.as_str())),
        }

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| CapabilityError::Provider(e.to_string()))?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.label, response.prompt_tokens, response.completion_tokens
        );

        if response.content.trim().is_empty() {
            return Err(CapabilityError::EmptyResponse);
        }
        Ok(response.content)
    }
}

/// `detail: "high"` keeps fine print (tax lines, folio numbers) readable.
fn to_image_data(page: &PageImage) -> ImageData {
    ImageData::new(page.png_base64.clone(), "image/png").with_detail("high")
}

/// Sampling temperature for every call. Not configurable.
const TEMPERATURE: f32 = 0.0;

/// Build `CompletionOptions` from the pipeline config: JSON-object mode,
/// always at temperature zero.
fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(TEMPERATURE),
        max_tokens: Some(config.max_tokens),
        response_format: Some("json_object".to_string()),
        ..Default::default()
    }
}

/// Build the extraction and transformation capabilities from the config.
///
/// When no separate transform model is configured both calls share one provider.
pub fn resolve_capabilities(
    config: &PipelineConfig,
) -> Result<(Arc<dyn JsonCapability>, Arc<dyn JsonCapability>), InvoiceError> {
    let extraction_provider = resolve_provider(config, config.model.as_deref())?;
    let transform_provider = match config.transform_model {
        Some(_) => resolve_provider(config, config.effective_transform_model())?,
        None => Arc::clone(&extraction_provider),
    };

    let extraction: Arc<dyn JsonCapability> =
        Arc::new(LlmCapability::new(extraction_provider, config));
    let transform: Arc<dyn JsonCapability> =
        Arc::new(LlmCapability::new(transform_provider, config));
    Ok((extraction, transform))
}

/// Resolve an LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`): used as-is.
/// 2. **Named provider** (`config.provider_name`) with `model`
///    (or [`DEFAULT_MODEL`]); the API key is read from the environment.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`
///    (an explicit `model` still wins over `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_provider(
    config: &PipelineConfig,
    model: Option<&str>,
) -> Result<Arc<dyn LLMProvider>, InvoiceError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_provider(name, model.unwrap_or(DEFAULT_MODEL));
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, model.unwrap_or(&env_model));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", model.unwrap_or(DEFAULT_MODEL));
        }
    }

    if let Some(model) = model {
        warn!(
            "Model '{}' ignored: no provider named, falling back to auto-detection",
            model
        );
    }
    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| InvoiceError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, InvoiceError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        InvoiceError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
