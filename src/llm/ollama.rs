use std::time::Duration;

use async_trait::async_trait;
use ollama_rs::{
    generation::chat::{request::ChatMessageRequest, ChatMessage},
    models::ModelOptions,
    Ollama,
};

use crate::llm::client::{Completion, CompletionOptions, LLMClient};
use crate::types::{AppError, Message, MessageRole, Result};

const DEFAULT_PORT: u16 = 11434;

pub struct OllamaClient {
    client: Ollama,
    model: String,
    options: CompletionOptions,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: String, options: CompletionOptions) -> Result<Self> {
        let url = reqwest::Url::parse(base_url)
            .map_err(|e| AppError::LLM(format!("Invalid Ollama URL '{}': {}", base_url, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| AppError::LLM(format!("Ollama URL '{}' has no host", base_url)))?;
        let port = url.port().unwrap_or(DEFAULT_PORT);

        let client = Ollama::new(format!("{}://{}", url.scheme(), host), port);

        Ok(Self {
            client,
            model,
            options,
        })
    }

    fn model_options(&self) -> ModelOptions {
        let num_predict = i32::try_from(self.options.max_tokens).unwrap_or(i32::MAX);
        let options = ModelOptions::default().num_predict(num_predict);
        match self.options.temperature {
            Some(t) => options.temperature(t),
            None => options,
        }
    }
}

fn to_ollama_message(message: &Message) -> ChatMessage {
    match message.role {
        MessageRole::System => ChatMessage::system(message.content.clone()),
        MessageRole::User => ChatMessage::user(message.content.clone()),
        MessageRole::Assistant => ChatMessage::assistant(message.content.clone()),
    }
}

#[async_trait]
impl LLMClient for OllamaClient {
    async fn complete(&self, messages: &[Message]) -> Result<Completion> {
        let chat_messages: Vec<ChatMessage> = messages.iter().map(to_ollama_message).collect();
        let request = ChatMessageRequest::new(self.model.clone(), chat_messages)
            .options(self.model_options());

        let response = tokio::time::timeout(
            Duration::from_secs(self.options.timeout_secs),
            self.client.send_chat_messages(request),
        )
        .await
        .map_err(|_| AppError::LLM("Ollama request timed out".to_string()))?
        .map_err(|e| AppError::LLM(format!("Ollama error: {}", e)))?;

        Ok(Completion {
            content: response.message.content,
            finish_reason: response.done.then(|| "stop".to_string()),
            usage: None,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
