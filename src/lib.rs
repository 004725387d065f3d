//! # BonlivreChat
//!
//! A chat server for the Bonlivre bookshop: authenticated users talk to an
//! LLM assistant that can look up products and orders in the shop's
//! WooCommerce backend.
//!
//! ## Overview
//!
//! BonlivreChat can be used in two ways:
//!
//! 1. **As a standalone server** - Run the `bonlivre-server` binary
//! 2. **As a library** - Reuse the budget trimmer, the session manager or
//!    the HTTP router in your own project
//!
//! ### Trimming a conversation
//!
//! ```rust,ignore
//! use bonlivre::context::budget::{trim, CharRatioEstimator};
//!
//! let estimator = CharRatioEstimator::new(2.5);
//! let kept = trim(&history, 12_000, &estimator);
//! ```
//!
//! ### Keeping a client session fresh
//!
//! ```rust,ignore
//! use bonlivre::session::{HttpSessionBackend, SessionConfig, SessionManager};
//! use std::sync::Arc;
//!
//! let backend = HttpSessionBackend::new("https://chat.bonlivre.ch");
//! let login = backend.login("leser@bonlivre.ch", "geheim123").await?;
//!
//! let session = Arc::new(SessionManager::new(Arc::new(backend), SessionConfig::default()));
//! session.store(login.token)?;
//! let _watchdog = session.spawn_watchdog();
//!
//! let token = session.ensure_fresh().await?;
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `openai` | OpenAI API support (default) |
//! | `ollama` | Ollama local inference |
//! | `swagger-ui` | Interactive API docs at `/swagger-ui/` |
//! | `full` | All of the above |
//!
//! ## Modules
//!
//! - [`api`] - REST API handlers and routes
//! - [`auth`] - JWT authentication, middleware and account e-mails
//! - [`cache`] - TTL + LRU cache used for profiles
//! - [`commerce`] - WooCommerce client
//! - [`context`] - Token-budget trimming and system directives
//! - [`db`] - libsql persistence
//! - [`llm`] - LLM client implementations
//! - [`session`] - Client-side session lifecycle
//! - [`types`] - Common types and error handling
//! - [`utils`] - Configuration

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod api;
pub mod auth;
pub mod cache;
pub mod cli;
pub mod commerce;
pub mod context;
pub mod db;
pub mod llm;
pub mod session;
pub mod types;
pub mod utils;

pub use db::TursoClient;
pub use llm::{LLMClient, LLMClientFactory, LLMClientFactoryTrait, Provider};
pub use types::{AppError, Result};
pub use utils::toml_config::{BonlivreConfig, ConfigManager};

use crate::auth::{AuthService, LogMailer, Mailer};
use crate::cache::TtlCache;
use crate::commerce::WooCommerceClient;
use crate::types::Profile;
use std::sync::Arc;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    /// TOML configuration with hot-reload support
    pub config: Arc<ConfigManager>,
    /// Database client
    pub db: Arc<TursoClient>,
    /// Token issuing and password hashing
    pub auth: Arc<AuthService>,
    /// LLM client factory, reads the live `[llm]` section per request
    pub llm_factory: Arc<dyn LLMClientFactoryTrait>,
    /// Shop client; `None` when `[commerce] base_url` is unset
    pub commerce: Option<Arc<WooCommerceClient>>,
    /// Profiles of verified users, keyed by user id
    pub profile_cache: Arc<TtlCache<String, Profile>>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    /// Wire up the production state from a loaded configuration.
    pub async fn from_config(config: Arc<ConfigManager>) -> Result<Self> {
        let cfg = config.config();

        let db = TursoClient::from_config(&cfg.database).await?;
        let secret = cfg
            .jwt_secret()
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let auth = AuthService::new(secret, cfg.auth.token_ttl_secs);
        let commerce = WooCommerceClient::from_config(&cfg)?.map(Arc::new);
        if commerce.is_none() {
            tracing::warn!("No [commerce] base_url configured; shop lookups are disabled");
        }

        Ok(Self {
            llm_factory: Arc::new(LLMClientFactory::new(Arc::clone(&config))),
            profile_cache: Arc::new(TtlCache::new(cfg.cache.clone())),
            config,
            db: Arc::new(db),
            auth: Arc::new(auth),
            commerce,
            mailer: Arc::new(LogMailer),
        })
    }
}
