//! LLM client abstractions and provider selection
//!
//! - **OpenAI**: OpenAI API and compatible gateways (feature `openai`)
//! - **Ollama**: local inference through an Ollama server (feature `ollama`)

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{AppError, Message, Result};
use crate::utils::toml_config::{BonlivreConfig, ConfigManager};

/// Completion provider. Implementations translate [`Message`]s into the
/// provider's wire format and return the assistant's reply.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Complete a conversation. `messages` is sent as-is, in order.
    async fn complete(&self, messages: &[Message]) -> Result<Completion>;

    /// Get the model name/identifier
    fn model_name(&self) -> &str;
}

/// Response from a completion request
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    /// The reason generation stopped (e.g. "stop", "length")
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: Some("stop".to_string()),
            usage: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Generation parameters shared by all providers
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub timeout_secs: u64,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 2000,
            temperature: None,
            timeout_secs: 60,
        }
    }
}

/// Provider selected in `[llm] provider`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    #[serde(rename = "openai")]
    OpenAI,
    Ollama,
}

/// A fully resolved provider, ready to build a client
#[derive(Debug, Clone)]
pub enum Provider {
    /// OpenAI API provider (including compatible APIs)
    OpenAI {
        api_key: String,
        api_base: String,
        model: String,
        options: CompletionOptions,
    },

    /// Ollama local LLM provider
    Ollama {
        base_url: String,
        model: String,
        options: CompletionOptions,
    },
}

const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_BASE: &str = "http://localhost:11434";

impl Provider {
    /// Resolve the `[llm]` section, reading the API key from the environment
    pub fn from_config(config: &BonlivreConfig) -> Result<Self> {
        let llm = &config.llm;
        let options = CompletionOptions {
            max_tokens: llm.max_tokens,
            temperature: llm.temperature,
            timeout_secs: llm.timeout_secs,
        };

        match llm.provider {
            ProviderKind::OpenAI => Ok(Provider::OpenAI {
                api_key: config
                    .llm_api_key()
                    .map_err(|e| AppError::LLM(e.to_string()))?,
                api_base: llm
                    .base_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE.to_string()),
                model: llm.model.clone(),
                options,
            }),
            ProviderKind::Ollama => Ok(Provider::Ollama {
                base_url: llm
                    .base_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OLLAMA_BASE.to_string()),
                model: llm.model.clone(),
                options,
            }),
        }
    }

    /// Create a client instance for this provider
    ///
    /// # Errors
    ///
    /// Fails when the provider's cargo feature is not enabled or its
    /// configuration is unusable.
    pub async fn create_client(&self) -> Result<Box<dyn LLMClient>> {
        match self {
            #[cfg(feature = "openai")]
            Provider::OpenAI {
                api_key,
                api_base,
                model,
                options,
            } => Ok(Box::new(super::openai::OpenAIClient::new(
                api_key.clone(),
                api_base.clone(),
                model.clone(),
                options.clone(),
            )?)),

            #[cfg(feature = "ollama")]
            Provider::Ollama {
                base_url,
                model,
                options,
            } => Ok(Box::new(super::ollama::OllamaClient::new(
                base_url,
                model.clone(),
                options.clone(),
            )?)),

            #[allow(unreachable_patterns)]
            other => Err(AppError::LLM(format!(
                "Provider '{}' is not enabled in this build",
                other.name()
            ))),
        }
    }

    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAI { .. } => "OpenAI",
            Provider::Ollama { .. } => "Ollama",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Provider::OpenAI { model, .. } | Provider::Ollama { model, .. } => model,
        }
    }
}

/// Creates completion clients for request handlers
#[async_trait]
pub trait LLMClientFactoryTrait: Send + Sync {
    /// Create a client for the currently configured provider
    async fn create_default(&self) -> Result<Box<dyn LLMClient>>;
}

/// Builds clients from the live configuration, so provider changes made
/// through hot reload apply to the next request.
pub struct LLMClientFactory {
    config: Arc<ConfigManager>,
}

impl LLMClientFactory {
    pub fn new(config: Arc<ConfigManager>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LLMClientFactoryTrait for LLMClientFactory {
    async fn create_default(&self) -> Result<Box<dyn LLMClient>> {
        let provider = Provider::from_config(&self.config.config())?;
        tracing::debug!(provider = provider.name(), model = provider.model(), "Creating LLM client");
        provider.create_client().await
    }
}
