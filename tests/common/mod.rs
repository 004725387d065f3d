//! Shared setup for the integration tests.

#![allow(dead_code)]

pub mod mocks;

use axum_test::TestServer;
use bonlivre::{
    api::build_app,
    auth::AuthService,
    cache::TtlCache,
    commerce::WooCommerceClient,
    utils::toml_config::BonlivreConfig,
    AppState, ConfigManager, TursoClient,
};
use mocks::{MockLLMClient, MockLLMFactory, RecordingMailer};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_SECRET: &str = "test_jwt_secret_key_for_testing_only_32+";
pub const PASSWORD: &str = "geheim123";

pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub llm: MockLLMClient,
    pub mailer: RecordingMailer,
}

pub struct TestAppBuilder {
    config: BonlivreConfig,
    llm: MockLLMClient,
    shop_url: Option<String>,
}

impl TestAppBuilder {
    pub fn new() -> Self {
        let mut config = BonlivreConfig::default();
        config.database.path = ":memory:".to_string();
        config.llm.system_prompt = Some("Du bist der Buchberater von Bonlivre.".to_string());
        Self {
            config,
            llm: MockLLMClient::new("Gerne helfe ich Ihnen weiter."),
            shop_url: None,
        }
    }

    pub fn config(mut self, f: impl FnOnce(&mut BonlivreConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn llm(mut self, llm: MockLLMClient) -> Self {
        self.llm = llm;
        self
    }

    /// Point the WooCommerce client at a mock server.
    pub fn shop(mut self, url: impl Into<String>) -> Self {
        self.shop_url = Some(url.into());
        self
    }

    pub async fn build(self) -> TestApp {
        let db = TursoClient::new_memory()
            .await
            .expect("Failed to create in-memory database");
        let auth = AuthService::new(TEST_SECRET.to_string(), self.config.auth.token_ttl_secs);
        let commerce = self.shop_url.map(|url| {
            Arc::new(
                WooCommerceClient::new(url, "ck_test", "cs_test", 10, Duration::from_secs(5))
                    .expect("Failed to build shop client"),
            )
        });
        let mailer = RecordingMailer::default();

        let state = AppState {
            profile_cache: Arc::new(TtlCache::new(self.config.cache.clone())),
            config: Arc::new(ConfigManager::from_config(self.config)),
            db: Arc::new(db),
            auth: Arc::new(auth),
            llm_factory: Arc::new(MockLLMFactory::new(self.llm.clone())),
            commerce,
            mailer: Arc::new(mailer.clone()),
        };

        let server = TestServer::new(build_app(state.clone())).expect("Failed to create test server");

        TestApp {
            server,
            state,
            llm: self.llm,
            mailer,
        }
    }
}

impl TestApp {
    pub async fn new() -> Self {
        TestAppBuilder::new().build().await
    }

    /// Register an account and return its bearer token.
    pub async fn register(&self, email: &str) -> String {
        let response = self
            .server
            .post("/api/register")
            .json(&json!({ "email": email, "password": PASSWORD, "name": "Leserin" }))
            .await;
        response.assert_status_ok();
        response.json::<serde_json::Value>()["token"]
            .as_str()
            .expect("token in register response")
            .to_string()
    }

    /// Register and follow the verification link.
    pub async fn register_verified(&self, email: &str) -> String {
        let token = self.register(email).await;
        let link_token = self.mailer.last().expect("verification mail").token();
        self.server
            .get("/api/verify-email")
            .add_query_param("token", link_token)
            .await
            .assert_status_ok();
        token
    }
}
