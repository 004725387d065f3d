//! JWT Authentication and Middleware
//!
//! # Module Structure
//!
//! - [`auth::jwt`](crate::auth::jwt) - token issuing and verification, password hashing
//! - [`auth::middleware`](crate::auth::middleware) - Axum middleware and extractors
//! - [`auth::mailer`](crate::auth::mailer) - verification and reset e-mails
//!
//! # Security Features
//!
//! - **Password Hashing**: Argon2id
//! - **JWT Tokens**: HS256, one token per session, renewed through
//!   `GET /api/refresh-token` while still valid
//! - **Revocation**: logout stores the SHA-256 hash of the token; the
//!   middleware rejects hashed tokens found in the blacklist
//!
//! ## Extracting Claims in Handlers
//!
//! ```ignore
//! async fn protected_handler(AuthUser(claims): AuthUser) -> impl IntoResponse {
//!     format!("Hallo, {}!", claims.email)
//! }
//! ```

/// JWT token generation, validation, and password hashing services.
pub mod jwt;
/// Outgoing account e-mails.
pub mod mailer;
/// Authentication middleware and extractors for protected routes.
pub mod middleware;

pub use jwt::AuthService;
pub use mailer::{LogMailer, Mailer};
pub use middleware::{auth_middleware, AuthUser, BearerToken};
