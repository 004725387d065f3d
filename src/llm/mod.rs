//! LLM Provider Clients and Abstractions
//!
//! Handlers never talk to a provider SDK directly. They ask an
//! [`LLMClientFactoryTrait`] for a client and call [`LLMClient::complete`]
//! with a fully assembled message list.
//!
//! # Supported Providers
//!
//! Enable providers via Cargo features:
//! - `openai` - OpenAI API and compatible gateways (default)
//! - `ollama` - Local Ollama server
//!
//! # Example
//!
//! ```ignore
//! use bonlivre::llm::{LLMClientFactory, LLMClientFactoryTrait};
//!
//! let factory = LLMClientFactory::new(config_manager);
//! let client = factory.create_default().await?;
//! let reply = client.complete(&messages).await?;
//! println!("{}", reply.content);
//! ```

/// Core LLM client trait, provider selection and the client factory.
pub mod client;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

pub use client::{
    Completion, CompletionOptions, LLMClient, LLMClientFactory, LLMClientFactoryTrait, Provider,
    ProviderKind, TokenUsage,
};
