//! Relational persistence via libsql.
//!
//! - [`TursoClient`]: local file, in-memory or remote Turso database
//! - [`ChatStore`]: user-scoped chat, message and product operations
//! - [`TokenBlacklist`]: revoked bearer tokens

pub mod traits;
pub mod turso;

pub use traits::{ChatStore, TokenBlacklist, CHAT_NOT_FOUND};
pub use turso::{TursoClient, User};

use crate::types::Result;
use crate::utils::toml_config::DatabaseConfig;

impl TursoClient {
    /// Open the database described by `[database]`.
    ///
    /// A configured Turso URL wins; otherwise `path` is opened locally, where
    /// `:memory:` gives an ephemeral database.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        match (&config.turso_url, config.resolve_turso_token()) {
            (Some(url), Some(token)) if !url.is_empty() => {
                tracing::info!(url = %url, "Connecting to remote Turso database");
                Self::new_remote(url.clone(), token).await
            }
            _ => {
                tracing::info!(path = %config.path, "Opening local database");
                Self::new_local(&config.path).await
            }
        }
    }
}
