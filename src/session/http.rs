//! [`SessionBackend`] talking to a BonlivreChat server over HTTP.

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{RefreshError, SessionBackend};
use crate::types::{LoginRequest, TokenResponse};

#[derive(Debug, Clone)]
pub struct HttpSessionBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSessionBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Obtain an initial token with email and password.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenResponse, RefreshError> {
        let response = self
            .client
            .post(self.url("/api/login"))
            .json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response).await?;
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))
    }
}

fn transport_error(e: reqwest::Error) -> RefreshError {
    RefreshError::Transient(e.to_string())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RefreshError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = format!("{}: {}", status, body);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(RefreshError::Transient(detail))
    } else {
        Err(RefreshError::Rejected(detail))
    }
}

#[async_trait]
impl SessionBackend for HttpSessionBackend {
    async fn refresh(&self, token: &str) -> Result<String, RefreshError> {
        let response = self
            .client
            .get(self.url("/api/refresh-token"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response).await?;
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;
        Ok(body.token)
    }

    async fn verify(&self, token: &str) -> Result<(), RefreshError> {
        let response = self
            .client
            .get(self.url("/api/verify-token"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response).await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        if body.get("user").is_some_and(|u| u.is_object()) {
            Ok(())
        } else {
            Err(RefreshError::InvalidResponse("no user in response".to_string()))
        }
    }
}
