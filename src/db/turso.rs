use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database, Row};

use super::traits::{ChatStore, TokenBlacklist, CHAT_NOT_FOUND};
use crate::types::{AppError, Chat, Message, MessageRole, Product, Result, UpdateProfileRequest};

/// libsql-backed store for users, chats, messages, products and revoked tokens.
///
/// One connection is opened at construction and shared by all clones, so an
/// in-memory database keeps its contents for the lifetime of the client.
#[derive(Clone)]
pub struct TursoClient {
    // Keeps the database alive as long as the connection is in use
    _db: std::sync::Arc<Database>,
    conn: Connection,
}

fn db_err(context: &'static str) -> impl Fn(libsql::Error) -> AppError {
    move |e| AppError::Database(format!("{}: {}", context, e))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl TursoClient {
    pub async fn new_remote(url: String, auth_token: String) -> Result<Self> {
        let db = Builder::new_remote(url, auth_token)
            .build()
            .await
            .map_err(db_err("Failed to connect to Turso"))?;
        Self::from_database(db).await
    }

    pub async fn new_local(path: &str) -> Result<Self> {
        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(db_err("Failed to open local database"))?;
        Self::from_database(db).await
    }

    pub async fn new_memory() -> Result<Self> {
        Self::new_local(":memory:").await
    }

    async fn from_database(db: Database) -> Result<Self> {
        let conn = db.connect().map_err(db_err("Failed to get connection"))?;
        let client = Self {
            _db: std::sync::Arc::new(db),
            conn,
        };
        client.initialize_schema().await?;
        Ok(client)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    async fn initialize_schema(&self) -> Result<()> {
        let conn = &self.conn;

        // Users table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                name TEXT,
                bio TEXT,
                avatar TEXT,
                is_verified INTEGER NOT NULL DEFAULT 0,
                verification_token TEXT,
                reset_token_hash TEXT,
                reset_expires_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            (),
        )
        .await
        .map_err(db_err("Failed to create users table"))?;

        // Revoked bearer tokens, stored as SHA-256 hashes
        conn.execute(
            "CREATE TABLE IF NOT EXISTS blacklisted_tokens (
                token_hash TEXT PRIMARY KEY,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )",
            (),
        )
        .await
        .map_err(db_err("Failed to create blacklisted_tokens table"))?;

        // Chats table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            )",
            (),
        )
        .await
        .map_err(db_err("Failed to create chats table"))?;

        // Messages table; seq preserves insertion order
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT UNIQUE NOT NULL,
                chat_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (chat_id) REFERENCES chats(id)
            )",
            (),
        )
        .await
        .map_err(db_err("Failed to create messages table"))?;

        // Product annotations, one current set per chat
        conn.execute(
            "CREATE TABLE IF NOT EXISTS products (
                chat_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                product_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                price TEXT NOT NULL,
                description TEXT,
                permalink TEXT,
                image_url TEXT,
                categories TEXT NOT NULL,
                PRIMARY KEY (chat_id, position),
                UNIQUE (chat_id, product_id),
                FOREIGN KEY (chat_id) REFERENCES chats(id)
            )",
            (),
        )
        .await
        .map_err(db_err("Failed to create products table"))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chats_user ON chats(user_id, updated_at)",
            (),
        )
        .await
        .map_err(db_err("Failed to create chats index"))?;

        Ok(())
    }

    // User operations

    pub async fn create_user(
        &self,
        id: &str,
        email: &str,
        password_hash: &str,
        name: Option<&str>,
        verification_token: Option<&str>,
    ) -> Result<()> {
        let now = now_millis();

        self.conn
            .execute(
                "INSERT INTO users (id, email, password_hash, name, verification_token, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                (id, email, password_hash, name, verification_token, now, now),
            )
            .await
            .map_err(db_err("Failed to create user"))?;

        Ok(())
    }

    async fn query_user(&self, condition: &str, value: &str) -> Result<Option<User>> {
        let sql = format!(
            "SELECT id, email, password_hash, name, bio, avatar, is_verified, verification_token,
                    created_at, updated_at
             FROM users WHERE {} = ?",
            condition
        );
        let mut rows = self
            .conn
            .query(&sql, [value])
            .await
            .map_err(db_err("Failed to query user"))?;

        match rows.next().await.map_err(db_err("Failed to read user"))? {
            Some(row) => Ok(Some(User::from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.query_user("email", email).await
    }

    pub async fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        self.query_user("id", id).await
    }

    pub async fn get_user_by_verification_token(&self, token: &str) -> Result<Option<User>> {
        self.query_user("verification_token", token).await
    }

    pub async fn mark_verified(&self, user_id: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET is_verified = 1, updated_at = ? WHERE id = ?",
                (now_millis(), user_id),
            )
            .await
            .map_err(db_err("Failed to verify user"))?;
        Ok(())
    }

    pub async fn set_verification_token(&self, user_id: &str, token: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET verification_token = ?, updated_at = ? WHERE id = ?",
                (token, now_millis(), user_id),
            )
            .await
            .map_err(db_err("Failed to store verification token"))?;
        Ok(())
    }

    /// Apply the fields present in `update`; absent fields keep their value.
    pub async fn update_profile(&self, user_id: &str, update: &UpdateProfileRequest) -> Result<User> {
        let changed = self
            .conn
            .execute(
                "UPDATE users SET
                    name = COALESCE(?, name),
                    email = COALESCE(?, email),
                    bio = COALESCE(?, bio),
                    avatar = COALESCE(?, avatar),
                    updated_at = ?
                 WHERE id = ?",
                (
                    update.name.as_deref(),
                    update.email.as_deref(),
                    update.bio.as_deref(),
                    update.avatar.as_deref(),
                    now_millis(),
                    user_id,
                ),
            )
            .await
            .map_err(db_err("Failed to update profile"))?;

        if changed == 0 {
            return Err(AppError::NotFound("User not found".to_string()));
        }

        self.get_user_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    pub async fn set_reset_token(&self, user_id: &str, token_hash: &str, expires_at: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET reset_token_hash = ?, reset_expires_at = ?, updated_at = ? WHERE id = ?",
                (token_hash, expires_at, now_millis(), user_id),
            )
            .await
            .map_err(db_err("Failed to store reset token"))?;
        Ok(())
    }

    /// Id of the user holding an unexpired reset token with this hash
    pub async fn find_reset_user(&self, token_hash: &str, now: i64) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM users WHERE reset_token_hash = ? AND reset_expires_at > ?",
                (token_hash, now),
            )
            .await
            .map_err(db_err("Failed to query reset token"))?;

        match rows.next().await.map_err(db_err("Failed to read reset token"))? {
            Some(row) => Ok(Some(row.get(0).map_err(db_err("Failed to read user id"))?)),
            None => Ok(None),
        }
    }

    /// Set a new password hash and consume the reset token.
    pub async fn update_password(&self, user_id: &str, password_hash: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET password_hash = ?, reset_token_hash = NULL, reset_expires_at = NULL,
                    updated_at = ?
                 WHERE id = ?",
                (password_hash, now_millis(), user_id),
            )
            .await
            .map_err(db_err("Failed to update password"))?;
        Ok(())
    }

    // Chat helpers

    async fn owned_chat_row(&self, chat_id: &str, user_id: &str) -> Result<Chat> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, user_id, title, created_at, updated_at FROM chats
                 WHERE id = ? AND user_id = ?",
                (chat_id, user_id),
            )
            .await
            .map_err(db_err("Failed to query chat"))?;

        match rows.next().await.map_err(db_err("Failed to read chat"))? {
            Some(row) => chat_from_row(&row),
            None => Err(AppError::NotFound(CHAT_NOT_FOUND.to_string())),
        }
    }

    async fn messages_for(&self, chat_id: &str) -> Result<Vec<Message>> {
        let mut rows = self
            .conn
            .query(
                "SELECT role, content, created_at FROM messages WHERE chat_id = ? ORDER BY seq ASC",
                [chat_id],
            )
            .await
            .map_err(db_err("Failed to query messages"))?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err("Failed to read message"))? {
            messages.push(message_from_row(&row, 0)?);
        }
        Ok(messages)
    }
}

#[async_trait]
impl ChatStore for TursoClient {
    async fn create_chat(&self, user_id: &str, title: &str) -> Result<Chat> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_millis();

        self.conn
            .execute(
                "INSERT INTO chats (id, user_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
                (id.as_str(), user_id, title, now, now),
            )
            .await
            .map_err(db_err("Failed to create chat"))?;

        Ok(Chat {
            id,
            user_id: user_id.to_string(),
            title: title.to_string(),
            messages: Vec::new(),
            created_at: from_millis(now),
            updated_at: from_millis(now),
        })
    }

    async fn list_chats(&self, user_id: &str) -> Result<Vec<Chat>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, user_id, title, created_at, updated_at FROM chats
                 WHERE user_id = ? ORDER BY updated_at DESC, rowid DESC",
                [user_id],
            )
            .await
            .map_err(db_err("Failed to query chats"))?;

        let mut chats = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err("Failed to read chat"))? {
            chats.push(chat_from_row(&row)?);
        }

        let mut rows = self
            .conn
            .query(
                "SELECT m.chat_id, m.role, m.content, m.created_at FROM messages m
                 JOIN chats c ON c.id = m.chat_id
                 WHERE c.user_id = ? ORDER BY m.seq ASC",
                [user_id],
            )
            .await
            .map_err(db_err("Failed to query messages"))?;

        while let Some(row) = rows.next().await.map_err(db_err("Failed to read message"))? {
            let chat_id: String = row.get(0).map_err(db_err("Failed to read chat id"))?;
            let message = message_from_row(&row, 1)?;
            if let Some(chat) = chats.iter_mut().find(|c| c.id == chat_id) {
                chat.messages.push(message);
            }
        }

        Ok(chats)
    }

    async fn get_chat(&self, chat_id: &str, user_id: &str) -> Result<Chat> {
        let mut chat = self.owned_chat_row(chat_id, user_id).await?;
        chat.messages = self.messages_for(chat_id).await?;
        Ok(chat)
    }

    async fn append_messages(
        &self,
        chat_id: &str,
        user_id: &str,
        messages: &[Message],
    ) -> Result<Chat> {
        self.owned_chat_row(chat_id, user_id).await?;

        for message in messages {
            self.conn
                .execute(
                    "INSERT INTO messages (id, chat_id, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
                    (
                        uuid::Uuid::new_v4().to_string(),
                        chat_id,
                        message.role.as_str(),
                        message.content.as_str(),
                        message.created_at.timestamp_millis(),
                    ),
                )
                .await
                .map_err(db_err("Failed to add message"))?;
        }

        self.conn
            .execute(
                "UPDATE chats SET updated_at = ? WHERE id = ?",
                (now_millis(), chat_id),
            )
            .await
            .map_err(db_err("Failed to touch chat"))?;

        self.get_chat(chat_id, user_id).await
    }

    async fn delete_chat(&self, chat_id: &str, user_id: &str) -> Result<()> {
        self.owned_chat_row(chat_id, user_id).await?;

        self.conn
            .execute("DELETE FROM messages WHERE chat_id = ?", [chat_id])
            .await
            .map_err(db_err("Failed to delete messages"))?;
        self.conn
            .execute("DELETE FROM products WHERE chat_id = ?", [chat_id])
            .await
            .map_err(db_err("Failed to delete products"))?;
        self.conn
            .execute("DELETE FROM chats WHERE id = ?", [chat_id])
            .await
            .map_err(db_err("Failed to delete chat"))?;

        Ok(())
    }

    async fn replace_products(
        &self,
        chat_id: &str,
        user_id: &str,
        products: &[Product],
    ) -> Result<()> {
        self.owned_chat_row(chat_id, user_id).await?;

        let categories = products
            .iter()
            .map(|p| serde_json::to_string(&p.categories))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to encode categories: {}", e)))?;

        // Rolled back on drop if any statement fails
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(db_err("Failed to begin product transaction"))?;

        tx.execute("DELETE FROM products WHERE chat_id = ?", [chat_id])
            .await
            .map_err(db_err("Failed to clear products"))?;

        for (position, (product, categories)) in products.iter().zip(categories).enumerate() {
            tx.execute(
                "INSERT INTO products
                 (chat_id, position, product_id, name, price, description, permalink, image_url, categories)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    chat_id,
                    position as i64,
                    product.id,
                    product.name.as_str(),
                    product.price.as_str(),
                    product.description.as_deref(),
                    product.permalink.as_deref(),
                    product.image_url.as_deref(),
                    categories,
                ),
            )
            .await
            .map_err(db_err("Failed to store product"))?;
        }

        tx.commit()
            .await
            .map_err(db_err("Failed to commit products"))?;

        Ok(())
    }

    async fn list_products(&self, chat_id: &str, user_id: &str) -> Result<Vec<Product>> {
        self.owned_chat_row(chat_id, user_id).await?;

        let mut rows = self
            .conn
            .query(
                "SELECT product_id, name, price, description, permalink, image_url, categories
                 FROM products WHERE chat_id = ? ORDER BY position ASC",
                [chat_id],
            )
            .await
            .map_err(db_err("Failed to query products"))?;

        let mut products = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err("Failed to read product"))? {
            let categories: String = row.get(6).map_err(db_err("Failed to read categories"))?;
            products.push(Product {
                id: row.get(0).map_err(db_err("Failed to read product id"))?,
                name: row.get(1).map_err(db_err("Failed to read product name"))?,
                price: row.get(2).map_err(db_err("Failed to read product price"))?,
                description: row.get(3).map_err(db_err("Failed to read description"))?,
                permalink: row.get(4).map_err(db_err("Failed to read permalink"))?,
                image_url: row.get(5).map_err(db_err("Failed to read image url"))?,
                categories: serde_json::from_str(&categories).unwrap_or_default(),
            });
        }

        Ok(products)
    }
}

#[async_trait]
impl TokenBlacklist for TursoClient {
    async fn blacklist_token(&self, token_hash: &str, expires_at: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO blacklisted_tokens (token_hash, expires_at, created_at)
                 VALUES (?, ?, ?)",
                (token_hash, expires_at, now_millis()),
            )
            .await
            .map_err(db_err("Failed to blacklist token"))?;
        Ok(())
    }

    async fn is_token_blacklisted(&self, token_hash: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM blacklisted_tokens WHERE token_hash = ?",
                [token_hash],
            )
            .await
            .map_err(db_err("Failed to query blacklist"))?;

        Ok(rows
            .next()
            .await
            .map_err(db_err("Failed to read blacklist"))?
            .is_some())
    }

    async fn purge_expired_tokens(&self, now: i64) -> Result<u64> {
        self.conn
            .execute("DELETE FROM blacklisted_tokens WHERE expires_at <= ?", [now])
            .await
            .map_err(db_err("Failed to purge blacklist"))
    }
}

fn chat_from_row(row: &Row) -> Result<Chat> {
    Ok(Chat {
        id: row.get(0).map_err(db_err("Failed to read chat id"))?,
        user_id: row.get(1).map_err(db_err("Failed to read chat owner"))?,
        title: row.get(2).map_err(db_err("Failed to read chat title"))?,
        messages: Vec::new(),
        created_at: from_millis(row.get(3).map_err(db_err("Failed to read chat created_at"))?),
        updated_at: from_millis(row.get(4).map_err(db_err("Failed to read chat updated_at"))?),
    })
}

/// Reads `role, content, created_at` starting at column `offset`.
fn message_from_row(row: &Row, offset: i32) -> Result<Message> {
    let role: String = row.get(offset).map_err(db_err("Failed to read role"))?;
    Ok(Message {
        role: role.parse::<MessageRole>()?,
        content: row.get(offset + 1).map_err(db_err("Failed to read content"))?,
        created_at: from_millis(row.get(offset + 2).map_err(db_err("Failed to read created_at"))?),
    })
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    pub is_verified: bool,
    pub verification_token: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl User {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get(0).map_err(db_err("Failed to read user id"))?,
            email: row.get(1).map_err(db_err("Failed to read email"))?,
            password_hash: row.get(2).map_err(db_err("Failed to read password hash"))?,
            name: row.get(3).map_err(db_err("Failed to read name"))?,
            bio: row.get(4).map_err(db_err("Failed to read bio"))?,
            avatar: row.get(5).map_err(db_err("Failed to read avatar"))?,
            is_verified: row.get::<i64>(6).map_err(db_err("Failed to read is_verified"))? != 0,
            verification_token: row.get(7).map_err(db_err("Failed to read verification token"))?,
            created_at: row.get(8).map_err(db_err("Failed to read created_at"))?,
            updated_at: row.get(9).map_err(db_err("Failed to read updated_at"))?,
        })
    }
}
