use async_trait::async_trait;

use crate::types::Result;

/// Outgoing account e-mails.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, email: &str, link: &str) -> Result<()>;

    async fn send_password_reset(&self, email: &str, link: &str) -> Result<()>;
}

/// Writes the links to the log instead of sending mail. Suitable for
/// development and for deployments where a relay picks up the log stream.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification(&self, email: &str, link: &str) -> Result<()> {
        tracing::info!(to = %email, link = %link, "Verification e-mail");
        Ok(())
    }

    async fn send_password_reset(&self, email: &str, link: &str) -> Result<()> {
        tracing::info!(to = %email, link = %link, "Password reset e-mail");
        Ok(())
    }
}
