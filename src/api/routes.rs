use crate::api::handlers::{auth, chat, chats, commerce, health, profile};
use crate::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

/// Build the `/api` routes plus `/health`. Layers for tracing, CORS and
/// body limits are added by [`crate::api::build_app`].
pub fn create_router(state: AppState) -> Router<AppState> {
    let public_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/verify-email", get(auth::verify_email))
        .route("/resend-verification", post(auth::resend_verification))
        .route("/reset-password/request", post(auth::request_password_reset))
        .route("/reset-password", post(auth::reset_password))
        .route("/wordpress/order", get(commerce::find_order));

    let protected_routes = Router::new()
        .route("/refresh-token", get(auth::refresh_token))
        .route("/logout", post(auth::logout))
        .route("/verify-token", get(auth::verify_token))
        .route("/user-status", get(auth::user_status))
        .route(
            "/profile",
            get(profile::get_profile).put(profile::update_profile),
        )
        .route("/chat", post(chat::chat))
        .route("/chats", get(chats::list_chats).post(chats::create_chat))
        .route(
            "/chats/{id}",
            get(chats::get_chat)
                .post(chats::send_message)
                .delete(chats::delete_chat),
        )
        .route(
            "/chats/{id}/products",
            get(chats::list_products).post(chats::replace_products),
        )
        .route("/wordpress", get(commerce::search_products))
        .layer(middleware::from_fn_with_state(
            state,
            crate::auth::middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health::health))
        .nest("/api", public_routes.merge(protected_routes))
}
