use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, FinishReason,
    },
    Client,
};
use async_trait::async_trait;

use crate::llm::client::{Completion, CompletionOptions, LLMClient, TokenUsage};
use crate::types::{AppError, Message, MessageRole, Result};

pub struct OpenAIClient {
    client: Client<OpenAIConfig>,
    model: String,
    options: CompletionOptions,
}

impl OpenAIClient {
    pub fn new(
        api_key: String,
        api_base: String,
        model: String,
        options: CompletionOptions,
    ) -> Result<Self> {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()
            .map_err(|e| AppError::LLM(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client: Client::with_config(config).with_http_client(http),
            model,
            options,
        })
    }
}

fn build_err(e: OpenAIError) -> AppError {
    AppError::LLM(format!("Failed to build request: {}", e))
}

fn to_openai_message(message: &Message) -> Result<ChatCompletionRequestMessage> {
    let content = message.content.clone();
    let msg = match message.role {
        MessageRole::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(content)
            .build()
            .map_err(build_err)?
            .into(),
        MessageRole::User => ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()
            .map_err(build_err)?
            .into(),
        MessageRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(content)
            .build()
            .map_err(build_err)?
            .into(),
    };
    Ok(msg)
}

fn finish_reason_str(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::ContentFilter => "content_filter",
        FinishReason::FunctionCall => "function_call",
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn complete(&self, messages: &[Message]) -> Result<Completion> {
        let chat_messages = messages
            .iter()
            .map(to_openai_message)
            .collect::<Result<Vec<_>>>()?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages(chat_messages);
        #[allow(deprecated)]
        args.max_tokens(self.options.max_tokens);
        if let Some(temperature) = self.options.temperature {
            args.temperature(temperature);
        }
        let request = args.build().map_err(build_err)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| AppError::LLM(format!("OpenAI API error: {}", e)))?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| AppError::LLM("No response from OpenAI".to_string()))?;

        let content = choice
            .message
            .content
            .clone()
            .ok_or_else(|| AppError::LLM("No response from OpenAI".to_string()))?;

        Ok(Completion {
            content,
            finish_reason: choice.finish_reason.map(|r| finish_reason_str(r).to_string()),
            usage: response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
