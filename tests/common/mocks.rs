//! Mock implementations shared by the integration tests.

use async_trait::async_trait;
use bonlivre::auth::Mailer;
use bonlivre::llm::{Completion, LLMClient, LLMClientFactoryTrait};
use bonlivre::types::{AppError, Message, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// LLM client with a fixed reply that records every conversation it is sent.
#[derive(Clone)]
pub struct MockLLMClient {
    response: String,
    should_fail: bool,
    calls: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockLLMClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            should_fail: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A client that always returns an error.
    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::new("")
        }
    }

    /// Conversations received so far, oldest first.
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().clone()
    }

    pub fn last_call(&self) -> Vec<Message> {
        self.calls.lock().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl LLMClient for MockLLMClient {
    async fn complete(&self, messages: &[Message]) -> Result<Completion> {
        self.calls.lock().push(messages.to_vec());
        if self.should_fail {
            return Err(AppError::LLM("Mock LLM failure".to_string()));
        }
        Ok(Completion::text(self.response.clone()))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

/// Factory handing out clones of one [`MockLLMClient`], so all requests
/// share its call log.
pub struct MockLLMFactory {
    client: MockLLMClient,
}

impl MockLLMFactory {
    pub fn new(client: MockLLMClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LLMClientFactoryTrait for MockLLMFactory {
    async fn create_default(&self) -> Result<Box<dyn LLMClient>> {
        Ok(Box::new(self.client.clone()))
    }
}

/// What a [`RecordingMailer`] was asked to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMail {
    Verification { email: String, link: String },
    PasswordReset { email: String, link: String },
}

impl SentMail {
    /// The `token` query parameter of the link.
    pub fn token(&self) -> String {
        let link = match self {
            SentMail::Verification { link, .. } | SentMail::PasswordReset { link, .. } => link,
        };
        link.rsplit_once("token=")
            .map(|(_, token)| token.to_string())
            .unwrap_or_default()
    }
}

#[derive(Default, Clone)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<SentMail>>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().clone()
    }

    pub fn last(&self) -> Option<SentMail> {
        self.sent.lock().last().cloned()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_verification(&self, email: &str, link: &str) -> Result<()> {
        self.sent.lock().push(SentMail::Verification {
            email: email.to_string(),
            link: link.to_string(),
        });
        Ok(())
    }

    async fn send_password_reset(&self, email: &str, link: &str) -> Result<()> {
        self.sent.lock().push(SentMail::PasswordReset {
            email: email.to_string(),
            link: link.to_string(),
        });
        Ok(())
    }
}
