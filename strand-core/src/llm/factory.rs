//! Factory for creating LLM providers from configuration

use crate::config::{LLMProvider as LLMProviderType, LLMProviderConfig};
use crate::error::Result;
use crate::llm::{LLMProvider, StubLLMProvider};
use std::sync::Arc;

#[cfg(feature = "llm-openai")]
use crate::llm::providers::openai::OpenAIProvider;

/// Factory for creating LLM providers
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    /// Create an LLM provider from configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the provider cannot be created
    /// (missing API key, provider feature not compiled in).
    pub fn create(config: &LLMProviderConfig) -> Result<Arc<dyn LLMProvider>> {
        match config.provider {
            #[cfg(feature = "llm-openai")]
            LLMProviderType::OpenAI => {
                let model = Some(config.model.clone()).filter(|m| !m.trim().is_empty());

                // explicit settings win; anything missing comes from OPENAI_* variables
                let mut provider = match &config.api_key {
                    Some(api_key) => {
                        let model = model
                            .or_else(|| std::env::var("OPENAI_MODEL").ok())
                            .unwrap_or_else(|| "gpt-4o-mini".to_string());
                        OpenAIProvider::new(api_key.clone(), model)
                    }
                    None => OpenAIProvider::from_env(model)?,
                };

                if let Some(base_url) = &config.base_url {
                    provider = provider.with_endpoint(base_url.clone());
                }
                if let Some(timeout) = config.request_timeout {
                    provider = provider.with_request_timeout(timeout)?;
                }

                tracing::debug!(
                    model = provider.model(),
                    base_url = provider.base_url(),
                    "Created OpenAI provider"
                );
                Ok(Arc::new(provider))
            }

            #[cfg(not(feature = "llm-openai"))]
            LLMProviderType::OpenAI => Err(crate::error::StrandError::Configuration(
                "OpenAI provider requires 'llm-openai' feature".to_string(),
            )),

            LLMProviderType::Stub => {
                tracing::warn!("Using stub LLM provider; every generation will fail");
                Ok(Arc::new(StubLLMProvider))
            }
        }
    }
}
