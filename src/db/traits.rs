//! Persistence traits used by the HTTP handlers.
//!
//! Every chat operation is scoped to the requesting user: a chat that does
//! not exist and a chat that belongs to someone else are indistinguishable
//! and both fail with [`AppError::NotFound`](crate::types::AppError::NotFound).

use async_trait::async_trait;

use crate::types::{Chat, Message, Product, Result};

pub use super::turso::User;

/// Message shown when a chat is missing or owned by another user.
pub const CHAT_NOT_FOUND: &str = "Chat not found or unauthorized";

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_chat(&self, user_id: &str, title: &str) -> Result<Chat>;

    /// The user's chats with their messages, most recently updated first
    async fn list_chats(&self, user_id: &str) -> Result<Vec<Chat>>;

    async fn get_chat(&self, chat_id: &str, user_id: &str) -> Result<Chat>;

    /// Append messages in order and return the updated chat
    async fn append_messages(
        &self,
        chat_id: &str,
        user_id: &str,
        messages: &[Message],
    ) -> Result<Chat>;

    /// Delete a chat together with its messages and products
    async fn delete_chat(&self, chat_id: &str, user_id: &str) -> Result<()>;

    /// Replace the chat's product set; the previous set is removed first
    async fn replace_products(
        &self,
        chat_id: &str,
        user_id: &str,
        products: &[Product],
    ) -> Result<()>;

    async fn list_products(&self, chat_id: &str, user_id: &str) -> Result<Vec<Product>>;
}

/// Hashes of revoked bearer tokens.
#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    async fn blacklist_token(&self, token_hash: &str, expires_at: i64) -> Result<()>;

    async fn is_token_blacklisted(&self, token_hash: &str) -> Result<bool>;

    /// Drop entries whose token has expired anyway; returns how many were removed
    async fn purge_expired_tokens(&self, now: i64) -> Result<u64>;
}
