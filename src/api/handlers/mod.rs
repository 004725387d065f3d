//! API request handlers.
//!
//! This module contains all HTTP request handlers organized by functionality.

/// Registration, login, token and e-mail verification handlers.
pub mod auth;
/// Stateless completion handler.
pub mod chat;
/// Stored chat CRUD, messaging and product annotation handlers.
pub mod chats;
/// WooCommerce product search and order lookup.
pub mod commerce;
/// Liveness probe.
pub mod health;
/// Profile read/update handlers.
pub mod profile;
