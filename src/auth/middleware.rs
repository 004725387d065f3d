use crate::db::TokenBlacklist;
use crate::types::{AppError, Claims};
use crate::AppState;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};

/// The raw bearer token of an authenticated request
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// Validates the bearer token, rejects revoked tokens and stores the
/// [`Claims`] and [`BearerToken`] in the request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Auth("Missing bearer token".to_string()))?
        .to_string();

    let claims = state.auth.verify_token(&token)?;

    if state
        .db
        .is_token_blacklisted(&state.auth.hash_token(&token))
        .await?
    {
        tracing::debug!(user_id = %claims.sub, "Rejected revoked token");
        return Err(AppError::Auth("Token has been revoked".to_string()));
    }

    req.extensions_mut().insert(claims);
    req.extensions_mut().insert(BearerToken(token));

    Ok(next.run(req).await)
}

/// Extractor for the claims of an authenticated request
pub struct AuthUser(pub Claims);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Claims>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(|| AppError::Auth("Unauthorized".to_string()))
    }
}

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<BearerToken>()
            .cloned()
            .ok_or_else(|| AppError::Auth("Unauthorized".to_string()))
    }
}
