//! TOML-based configuration for BonlivreChat
//!
//! All settings live in `bonlivre.toml`. Secrets are never written to the
//! file; the config names the environment variables that hold them.
//!
//! # Hot Reloading
//!
//! Configuration changes are detected and applied at runtime. Use
//! [`ConfigManager`] for thread-safe access to the current configuration.
//! Budget, persona and cache settings take effect on the next request; the
//! listen address and database location only at startup.

use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::cache::CacheConfig;
use crate::context::budget::{BudgetPolicy, DEFAULT_CHARS_PER_TOKEN, DEFAULT_MAX_BUDGET};
use crate::llm::ProviderKind;

/// Root configuration structure loaded from bonlivre.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BonlivreConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub commerce: CommerceConfig,

    /// Profile cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Client-side session lifecycle
    #[serde(default)]
    pub session: SessionSettings,
}

// ============= Server Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// Allowed CORS origins; empty allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_json: false,
            cors_origins: Vec::new(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

// ============= Authentication Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Environment variable name containing the JWT secret
    #[serde(default = "default_jwt_secret_env")]
    pub jwt_secret_env: String,

    /// Lifetime of issued tokens in seconds
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: i64,

    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,

    /// Public URL used in verification and password reset links
    #[serde(default = "default_app_base_url")]
    pub app_base_url: String,

    /// Lifetime of password reset tokens in seconds
    #[serde(default = "default_reset_ttl")]
    pub reset_token_ttl_secs: i64,
}

fn default_jwt_secret_env() -> String {
    "JWT_SECRET".to_string()
}

fn default_token_ttl() -> i64 {
    3600
}

fn default_min_password_length() -> usize {
    8
}

fn default_app_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_reset_ttl() -> i64 {
    3600
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret_env: default_jwt_secret_env(),
            token_ttl_secs: default_token_ttl(),
            min_password_length: default_min_password_length(),
            app_base_url: default_app_base_url(),
            reset_token_ttl_secs: default_reset_ttl(),
        }
    }
}

// ============= Database Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Local database path; `:memory:` for an ephemeral database
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Remote Turso URL (optional cloud config)
    pub turso_url: Option<String>,

    /// Environment variable for the Turso auth token
    pub turso_token_env: Option<String>,
}

fn default_database_path() -> String {
    "./data/bonlivre.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            turso_url: None,
            turso_token_env: None,
        }
    }
}

impl DatabaseConfig {
    pub fn resolve_turso_token(&self) -> Option<String> {
        self.turso_token_env
            .as_deref()
            .and_then(|env| std::env::var(env).ok())
    }
}

// ============= LLM Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: ProviderKind,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable name containing the provider API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Override the provider endpoint (OpenAI-compatible gateways, remote Ollama)
    pub base_url: Option<String>,

    /// Completion length limit
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    pub temperature: Option<f32>,

    /// Persona prepended to every completion
    pub system_prompt: Option<String>,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "gpt-3.5-turbo-16k".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_llm_timeout() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: None,
            system_prompt: None,
            timeout_secs: default_llm_timeout(),
        }
    }
}

// ============= Context Budget Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// History budget in token-equivalent units
    #[serde(default = "default_max_budget")]
    pub max_budget: usize,

    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: f64,

    /// `soft` appends directives on top of the budget, `strict` reserves room for them
    #[serde(default)]
    pub budget_policy: BudgetPolicy,
}

fn default_max_budget() -> usize {
    DEFAULT_MAX_BUDGET
}

fn default_chars_per_token() -> f64 {
    DEFAULT_CHARS_PER_TOKEN
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_budget: default_max_budget(),
            chars_per_token: default_chars_per_token(),
            budget_policy: BudgetPolicy::default(),
        }
    }
}

// ============= Commerce Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommerceConfig {
    /// WordPress site URL; commerce lookups are disabled when unset
    pub base_url: Option<String>,

    #[serde(default = "default_consumer_key_env")]
    pub consumer_key_env: String,

    #[serde(default = "default_consumer_secret_env")]
    pub consumer_secret_env: String,

    /// Products returned per search
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    #[serde(default = "default_commerce_timeout")]
    pub timeout_secs: u64,
}

fn default_consumer_key_env() -> String {
    "WP_CONSUMER_KEY".to_string()
}

fn default_consumer_secret_env() -> String {
    "WP_CONSUMER_SECRET".to_string()
}

fn default_per_page() -> u32 {
    10
}

fn default_commerce_timeout() -> u64 {
    15
}

impl Default for CommerceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            consumer_key_env: default_consumer_key_env(),
            consumer_secret_env: default_consumer_secret_env(),
            per_page: default_per_page(),
            timeout_secs: default_commerce_timeout(),
        }
    }
}

// ============= Session Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Client-side credential lifetime; below the token TTL
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_renewal_window")]
    pub renewal_window_secs: u64,

    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    #[serde(default = "default_renewal_timeout")]
    pub renewal_timeout_secs: u64,

    #[serde(default = "default_max_renewal_attempts")]
    pub max_renewal_attempts: u32,

    /// Retry transient renewal failures instead of signing out immediately
    #[serde(default)]
    pub retry_transient: bool,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

fn default_session_ttl() -> u64 {
    55 * 60
}

fn default_renewal_window() -> u64 {
    5 * 60
}

fn default_check_interval() -> u64 {
    5 * 60
}

fn default_renewal_timeout() -> u64 {
    10
}

fn default_max_renewal_attempts() -> u32 {
    1
}

fn default_retry_backoff() -> u64 {
    500
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
            renewal_window_secs: default_renewal_window(),
            check_interval_secs: default_check_interval(),
            renewal_timeout_secs: default_renewal_timeout(),
            max_renewal_attempts: default_max_renewal_attempts(),
            retry_transient: false,
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

// ============= Configuration Loading & Validation =============

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Environment variable '{0}' referenced in config is not set")]
    MissingEnvVar(String),

    #[error("Watch error: {0}")]
    WatchError(#[from] notify::Error),
}

impl BonlivreConfig {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: BonlivreConfig = toml::from_str(&content)?;

        config.validate()?;

        Ok(config)
    }

    /// Check internal consistency and that referenced env vars are set
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.jwt_secret()?;

        if self.llm.provider == ProviderKind::OpenAI {
            self.llm_api_key()?;
        }

        if self.commerce.base_url.is_some() {
            self.commerce_credentials()?;
        }

        if let Some(env) = &self.database.turso_token_env {
            if self.resolve_env(env).is_none() {
                return Err(ConfigError::MissingEnvVar(env.clone()));
            }
        }

        if self.context.max_budget == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_budget must be greater than 0".to_string(),
            ));
        }

        if !(self.context.chars_per_token.is_finite() && self.context.chars_per_token > 0.0) {
            return Err(ConfigError::ValidationError(
                "context.chars_per_token must be a positive number".to_string(),
            ));
        }

        if self.auth.token_ttl_secs <= 0 {
            return Err(ConfigError::ValidationError(
                "auth.token_ttl_secs must be greater than 0".to_string(),
            ));
        }

        if self.session.renewal_window_secs >= self.session.ttl_secs {
            return Err(ConfigError::ValidationError(
                "session.renewal_window_secs must be shorter than session.ttl_secs".to_string(),
            ));
        }

        if self.session.check_interval_secs == 0 || self.session.renewal_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "session.check_interval_secs and session.renewal_timeout_secs must be greater than 0"
                    .to_string(),
            ));
        }

        if self.session.ttl_secs as i64 > self.auth.token_ttl_secs {
            warn!(
                session_ttl = self.session.ttl_secs,
                token_ttl = self.auth.token_ttl_secs,
                "Session TTL exceeds token TTL; clients may hold expired tokens"
            );
        }

        Ok(())
    }

    /// Get a resolved value from an env var reference
    pub fn resolve_env(&self, env_name: &str) -> Option<String> {
        std::env::var(env_name).ok().filter(|v| !v.is_empty())
    }

    /// Get the JWT secret from the environment
    pub fn jwt_secret(&self) -> Result<String, ConfigError> {
        self.resolve_env(&self.auth.jwt_secret_env)
            .ok_or_else(|| ConfigError::MissingEnvVar(self.auth.jwt_secret_env.clone()))
    }

    /// Get the LLM provider API key from the environment
    pub fn llm_api_key(&self) -> Result<String, ConfigError> {
        self.resolve_env(&self.llm.api_key_env)
            .ok_or_else(|| ConfigError::MissingEnvVar(self.llm.api_key_env.clone()))
    }

    /// WooCommerce consumer key and secret
    pub fn commerce_credentials(&self) -> Result<(String, String), ConfigError> {
        let key = self
            .resolve_env(&self.commerce.consumer_key_env)
            .ok_or_else(|| ConfigError::MissingEnvVar(self.commerce.consumer_key_env.clone()))?;
        let secret = self
            .resolve_env(&self.commerce.consumer_secret_env)
            .ok_or_else(|| ConfigError::MissingEnvVar(self.commerce.consumer_secret_env.clone()))?;
        Ok((key, secret))
    }
}

// ============= Hot Reloading Configuration Manager =============

/// Thread-safe configuration manager with hot reloading support
pub struct ConfigManager {
    config: Arc<ArcSwap<BonlivreConfig>>,
    config_path: PathBuf,
    watcher: RwLock<Option<RecommendedWatcher>>,
}

impl ConfigManager {
    /// Load the initial config from `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        // Absolute path for reliable file watching
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(ConfigError::ReadError)?
                .join(path)
        };

        let config = BonlivreConfig::load(&path)?;

        Ok(Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: path,
            watcher: RwLock::new(None),
        })
    }

    /// Create a config manager directly from a config, without file watching
    pub fn from_config(config: BonlivreConfig) -> Self {
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: PathBuf::from("bonlivre.toml"),
            watcher: RwLock::new(None),
        }
    }

    /// Get the current configuration (lockless read)
    pub fn config(&self) -> Arc<BonlivreConfig> {
        self.config.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Manually reload the configuration from disk
    pub fn reload(&self) -> Result<(), ConfigError> {
        info!("Reloading configuration from {:?}", self.config_path);

        let new_config = BonlivreConfig::load(&self.config_path)?;
        self.config.store(Arc::new(new_config));

        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Start watching the config file. Invalid edits are logged and ignored.
    pub fn start_watching(&self) -> Result<(), ConfigError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let file_name = self.config_path.file_name().map(|n| n.to_os_string());

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    let touches_config = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if touches_config && (event.kind.is_modify() || event.kind.is_create()) {
                        let _ = tx.send(());
                    }
                }
                Err(e) => {
                    error!("Config watcher error: {:?}", e);
                }
            }
        })?;

        // Watch the parent directory so editors that replace the file are seen
        if let Some(parent) = self.config_path.parent() {
            watcher.watch(parent, RecursiveMode::NonRecursive)?;
        }

        *self.watcher.write() = Some(watcher);

        let config_path = self.config_path.clone();
        let config_arc = Arc::clone(&self.config);
        tokio::spawn(async move {
            let debounce = Duration::from_millis(300);

            while rx.recv().await.is_some() {
                // Collapse bursts of events from a single save
                tokio::time::sleep(debounce).await;
                while rx.try_recv().is_ok() {}

                match BonlivreConfig::load(&config_path) {
                    Ok(new_config) => {
                        config_arc.store(Arc::new(new_config));
                        info!("Configuration hot-reloaded successfully");
                    }
                    Err(e) => {
                        warn!("Failed to hot-reload config: {}. Keeping previous config.", e);
                    }
                }
            }
        });

        info!("Configuration hot-reload watcher started");
        Ok(())
    }

    /// Stop watching for configuration changes
    pub fn stop_watching(&self) {
        *self.watcher.write() = None;
        info!("Configuration hot-reload watcher stopped");
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            config_path: self.config_path.clone(),
            // Watcher is not cloned
            watcher: RwLock::new(None),
        }
    }
}
