pub mod json;
pub mod ollama;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::models::LlmProviderKind;

use self::ollama::OllamaProvider;
use self::openai::OpenAiCompatibleProvider;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Sampling controls for a single completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            temperature: 0.3,
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(
        &self,
        system_prompt: &str,
        messages: &[Message],
        options: ChatOptions,
    ) -> anyhow::Result<String>;
}

const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const CEREBRAS_BASE_URL: &str = "https://api.cerebras.ai/v1";

/// Builds the completion client for `kind`. Groq and Cerebras speak the
/// OpenAI wire format; Ollama uses its native chat endpoint.
pub fn provider_for(
    kind: LlmProviderKind,
    model: &str,
    config: &AppConfig,
) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match kind {
        LlmProviderKind::OpenAi => {
            anyhow::ensure!(!config.openai_api_key.is_empty(), "OPENAI_API_KEY must be set for the openai provider");
            Arc::new(OpenAiCompatibleProvider::new(
                "OpenAI",
                config.openai_base_url.clone(),
                config.openai_api_key.clone(),
                model.to_string(),
            ))
        }
        LlmProviderKind::Groq => {
            anyhow::ensure!(!config.groq_api_key.is_empty(), "GROQ_API_KEY must be set for the groq provider");
            Arc::new(OpenAiCompatibleProvider::new(
                "Groq",
                GROQ_BASE_URL.to_string(),
                config.groq_api_key.clone(),
                model.to_string(),
            ))
        }
        LlmProviderKind::Cerebras => {
            anyhow::ensure!(!config.cerebras_api_key.is_empty(), "CEREBRAS_API_KEY must be set for the cerebras provider");
            Arc::new(OpenAiCompatibleProvider::new(
                "Cerebras",
                CEREBRAS_BASE_URL.to_string(),
                config.cerebras_api_key.clone(),
                model.to_string(),
            ))
        }
        LlmProviderKind::Ollama => Arc::new(OllamaProvider::new(
            config.ollama_url.clone(),
            model.to_string(),
        )),
    };
    tracing::info!(provider = ?kind, model, "built LLM provider");
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hosted_providers_require_keys() {
        let config = AppConfig::default();
        assert!(provider_for(LlmProviderKind::OpenAi, "gpt-4o-mini", &config).is_err());
        assert!(provider_for(LlmProviderKind::Groq, "llama3-8b-8192", &config).is_err());
        assert!(provider_for(LlmProviderKind::Ollama, "llama3.2", &config).is_ok());

        let config = AppConfig {
            groq_api_key: "gsk".to_string(),
            ..AppConfig::default()
        };
        assert!(provider_for(LlmProviderKind::Groq, "llama3-8b-8192", &config).is_ok());
    }
}
