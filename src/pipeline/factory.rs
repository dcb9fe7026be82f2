//! Provider selection.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{LlmConfig, PipelineConfig};
use crate::error::FactoryError;
use crate::llm::{ChatCompletionsDriver, LlmSettings, Provider, ToolLoopModel};
use crate::tools::ToolLifecycle;

use super::ProviderPipeline;

/// Per-request provider selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiConfig {
    /// `openai`, `google`/`gemini`, `ollama`, or `generic`. Defaults to the
    /// configured provider.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Builds a [`ProviderPipeline`] for a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderFactory;

impl ProviderFactory {
    /// Resolve the provider and bind it to `tools`.
    ///
    /// Endpoint and credentials from `llm` apply only when the request uses
    /// the configured provider; other providers use their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError`] for unknown providers, unusable base URLs, or
    /// when no model can be determined.
    pub fn create(
        ai: &AiConfig,
        llm: &LlmConfig,
        settings: &PipelineConfig,
        tools: Arc<dyn ToolLifecycle>,
    ) -> Result<ProviderPipeline, FactoryError> {
        let configured = Provider::from_name(&llm.provider);
        let name = ai.provider.as_deref().unwrap_or(&llm.provider);
        let provider =
            Provider::from_name(name).ok_or_else(|| FactoryError::UnsupportedProvider(name.to_string()))?;
        let same_provider = configured == Some(provider);

        let base_url = llm
            .base_url
            .clone()
            .filter(|_| same_provider)
            .or_else(|| provider.default_base_url().map(str::to_string))
            .ok_or_else(|| FactoryError::InvalidBaseUrl {
                url: String::new(),
                reason: format!("provider '{provider}' has no default endpoint"),
            })?;
        url::Url::parse(&base_url).map_err(|e| FactoryError::InvalidBaseUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;

        let model = ai
            .model
            .clone()
            .or_else(|| llm.model.clone().filter(|_| same_provider))
            .or_else(|| provider.default_model().map(str::to_string))
            .ok_or_else(|| FactoryError::MissingModel(provider.to_string()))?;

        let api_key = llm.api_key.clone().filter(|_| same_provider);
        if api_key.is_none() && provider.requires_api_key() {
            tracing::warn!(provider = %provider, "No API key configured; requests will likely be rejected");
        }

        tracing::info!(provider = %provider, model = %model, base_url = %base_url, "Selected provider");

        let driver = ChatCompletionsDriver::new(LlmSettings {
            base_url,
            api_key,
            model,
            provider,
        });
        let model = Arc::new(ToolLoopModel::new(Arc::new(driver)));

        Ok(
            ProviderPipeline::new(model, tools, provider.intermediate_policy(), settings.clone())
                .with_label(provider.as_str()),
        )
    }
}
