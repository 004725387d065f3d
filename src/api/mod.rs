//! HTTP API Handlers and Routes
//!
//! The REST API for BonlivreChat, built on the Axum web framework.
//!
//! # Module Structure
//!
//! - [`api::handlers`](crate::api::handlers) - Request handlers for each endpoint
//! - [`api::routes`](crate::api::routes) - Route definitions
//!
//! # API Endpoints
//!
//! ## Authentication
//! - `POST /api/register`, `POST /api/login`
//! - `GET /api/refresh-token`, `POST /api/logout`, `GET /api/verify-token`
//! - `GET /api/verify-email`, `POST /api/resend-verification`
//! - `POST /api/reset-password/request`, `POST /api/reset-password`
//! - `GET /api/user-status`, `GET|PUT /api/profile`
//!
//! ## Chats
//! - `POST /api/chat` - Complete a client-held conversation
//! - `GET|POST /api/chats` - List / create chats
//! - `GET|POST|DELETE /api/chats/{id}` - Read / message / delete a chat
//! - `GET|POST /api/chats/{id}/products` - Read / replace product annotations
//!
//! ## Shop
//! - `GET /api/wordpress` - Product search
//! - `GET /api/wordpress/order` - Order lookup
//!
//! # Authentication
//!
//! Protected endpoints require a valid, non-revoked JWT:
//! ```text
//! Authorization: Bearer <token>
//! ```
//!
//! # OpenAPI Documentation
//!
//! The document is served at `/api-docs/openapi.json`. With the `swagger-ui`
//! feature, interactive documentation is available at `/swagger-ui/`.

/// Request and response handlers for all API endpoints.
pub mod handlers;
/// Router configuration and route definitions.
pub mod routes;

use std::time::Duration;

use axum::{http::HeaderValue, routing::get, Json, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::types;
use crate::utils::toml_config::ServerConfig;
use crate::AppState;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "BonlivreChat API"),
    paths(
        handlers::health::health,
        handlers::auth::register,
        handlers::auth::login,
        handlers::auth::refresh_token,
        handlers::auth::logout,
        handlers::auth::verify_token,
        handlers::auth::user_status,
        handlers::auth::verify_email,
        handlers::auth::resend_verification,
        handlers::auth::request_password_reset,
        handlers::auth::reset_password,
        handlers::profile::get_profile,
        handlers::profile::update_profile,
        handlers::chat::chat,
        handlers::chats::list_chats,
        handlers::chats::create_chat,
        handlers::chats::get_chat,
        handlers::chats::send_message,
        handlers::chats::delete_chat,
        handlers::chats::list_products,
        handlers::chats::replace_products,
        handlers::commerce::search_products,
        handlers::commerce::find_order,
    ),
    components(schemas(
        types::Message,
        types::MessageRole,
        types::Chat,
        types::Product,
        types::OrderDetails,
        types::OrderLineItem,
        types::ProductsResponse,
        types::ChatRequest,
        types::ChatResponse,
        types::CreateChatRequest,
        types::SendMessageRequest,
        types::ReplaceProductsRequest,
        types::LoginRequest,
        types::RegisterRequest,
        types::TokenResponse,
        types::UserSummary,
        types::UserResponse,
        types::VerifyEmailResponse,
        types::EmailRequest,
        types::ResetPasswordRequest,
        types::MessageResponse,
        types::Profile,
        types::UpdateProfileRequest,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Accounts and tokens"),
        (name = "profile", description = "User profile"),
        (name = "chat", description = "Stateless completion"),
        (name = "chats", description = "Stored conversations"),
        (name = "commerce", description = "WooCommerce lookups"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.cors_origins.is_empty() || config.cors_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(origins).max_age(Duration::from_secs(3600))
}

/// The complete application: routes, OpenAPI document and HTTP layers.
pub fn build_app(state: AppState) -> Router {
    let config = state.config.config();

    let router = routes::create_router(state.clone())
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }));

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui").url("/api-docs/swagger.json", ApiDoc::openapi()),
    );

    router
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .layer(cors_layer(&config.server))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
