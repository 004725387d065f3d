use crate::{
    auth::{AuthUser, BearerToken},
    db::{TokenBlacklist, User},
    types::{
        AppError, EmailRequest, LoginRequest, MessageResponse, RegisterRequest,
        ResetPasswordRequest, Result, TokenResponse, UserResponse, UserSummary, VerifyEmailQuery,
        VerifyEmailResponse,
    },
    AppState,
};
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use uuid::Uuid;

fn verification_link(state: &AppState, token: &str) -> String {
    let config = state.config.config();
    format!(
        "{}/api/verify-email?token={}",
        config.auth.app_base_url.trim_end_matches('/'),
        token
    )
}

fn check_password(state: &AppState, password: &str) -> Result<()> {
    let min = state.config.config().auth.min_password_length;
    if password.chars().count() < min {
        return Err(AppError::InvalidInput(format!(
            "Password must be at least {} characters",
            min
        )));
    }
    Ok(())
}

async fn load_user(state: &AppState, user_id: &str) -> Result<User> {
    state
        .db
        .get_user_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

fn summary(user: &User, with_name: bool) -> UserSummary {
    UserSummary {
        id: user.id.clone(),
        email: user.email.clone(),
        name: if with_name { user.name.clone() } else { None },
        is_verified: user.is_verified,
    }
}

/// Register a new user
#[utoipa::path(
    post,
    path = "/api/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "User registered successfully", body = TokenResponse),
        (status = 400, description = "Invalid input or email already registered")
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<TokenResponse>> {
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::InvalidInput("A valid email is required".to_string()));
    }
    check_password(&state, &payload.password)?;

    if state.db.get_user_by_email(&email).await?.is_some() {
        return Err(AppError::InvalidInput("User already exists".to_string()));
    }

    let password_hash = state.auth.hash_password(&payload.password)?;
    let verification_token = state.auth.generate_random_token();

    let user_id = Uuid::new_v4().to_string();
    state
        .db
        .create_user(
            &user_id,
            &email,
            &password_hash,
            payload.name.as_deref().map(str::trim).filter(|n| !n.is_empty()),
            Some(&verification_token),
        )
        .await?;

    tracing::info!(user_id = %user_id, "User registered");

    if let Err(e) = state
        .mailer
        .send_verification(&email, &verification_link(&state, &verification_token))
        .await
    {
        tracing::warn!(user_id = %user_id, error = %e, "Failed to send verification e-mail");
    }

    Ok(Json(state.auth.issue_token(&user_id, &email)?))
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/api/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = TokenResponse),
        (status = 401, description = "Wrong password"),
        (status = 404, description = "Unknown user")
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>> {
    let email = payload.email.trim().to_lowercase();
    let user = state
        .db
        .get_user_by_email(&email)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    if !state
        .auth
        .verify_password(&payload.password, &user.password_hash)?
    {
        tracing::debug!(user_id = %user.id, "Login with wrong password");
        return Err(AppError::Auth("Invalid password".to_string()));
    }

    Ok(Json(state.auth.issue_token(&user.id, &user.email)?))
}

/// Exchange a still-valid token for a fresh one
#[utoipa::path(
    get,
    path = "/api/refresh-token",
    responses(
        (status = 200, description = "New token", body = TokenResponse),
        (status = 401, description = "Token invalid, expired or revoked")
    ),
    tag = "auth",
    security(("bearer" = []))
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<TokenResponse>> {
    // The account may have been removed since the token was issued
    let user = load_user(&state, &claims.sub)
        .await
        .map_err(|_| AppError::Auth("User no longer exists".to_string()))?;

    Ok(Json(state.auth.issue_token(&user.id, &user.email)?))
}

/// Revoke the presented token
#[utoipa::path(
    post,
    path = "/api/logout",
    responses((status = 200, description = "Logged out", body = MessageResponse)),
    tag = "auth",
    security(("bearer" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    BearerToken(token): BearerToken,
) -> Result<Json<MessageResponse>> {
    state
        .db
        .blacklist_token(&state.auth.hash_token(&token), claims.exp as i64)
        .await?;

    tracing::info!(user_id = %claims.sub, "User logged out");
    Ok(Json(MessageResponse::new("Logged out successfully")))
}

/// Return the user behind the token
#[utoipa::path(
    get,
    path = "/api/verify-token",
    responses(
        (status = 200, description = "Token valid", body = UserResponse),
        (status = 401, description = "Token invalid"),
        (status = 404, description = "User not found")
    ),
    tag = "auth",
    security(("bearer" = []))
)]
pub async fn verify_token(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<UserResponse>> {
    let user = load_user(&state, &claims.sub).await?;
    Ok(Json(UserResponse {
        user: summary(&user, false),
    }))
}

/// Current user with verification status
#[utoipa::path(
    get,
    path = "/api/user-status",
    responses(
        (status = 200, description = "User status", body = UserResponse),
        (status = 404, description = "User not found")
    ),
    tag = "auth",
    security(("bearer" = []))
)]
pub async fn user_status(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<UserResponse>> {
    let user = load_user(&state, &claims.sub).await?;
    Ok(Json(UserResponse {
        user: summary(&user, true),
    }))
}

/// Confirm an e-mail address
///
/// The verification token stays on the account, so following the link again
/// reports `already_verified` instead of an error.
#[utoipa::path(
    get,
    path = "/api/verify-email",
    params(VerifyEmailQuery),
    responses(
        (status = 200, description = "E-mail verified", body = VerifyEmailResponse),
        (status = 400, description = "Missing or unknown token")
    ),
    tag = "auth"
)]
pub async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<Json<VerifyEmailResponse>> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::InvalidInput("Verifizierungstoken ist erforderlich".to_string()))?;

    let user = state
        .db
        .get_user_by_verification_token(&token)
        .await?
        .ok_or_else(|| AppError::InvalidInput("Ungültiger Verifizierungstoken".to_string()))?;

    if user.is_verified {
        return Ok(Json(VerifyEmailResponse {
            message: "E-Mail bereits verifiziert".to_string(),
            already_verified: true,
        }));
    }

    state.db.mark_verified(&user.id).await?;
    state.profile_cache.invalidate(&user.id);
    tracing::info!(user_id = %user.id, "E-mail verified");

    Ok(Json(VerifyEmailResponse {
        message: "E-Mail erfolgreich verifiziert".to_string(),
        already_verified: false,
    }))
}

/// Send a new verification link
#[utoipa::path(
    post,
    path = "/api/resend-verification",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Verification e-mail sent", body = MessageResponse),
        (status = 400, description = "Already verified"),
        (status = 404, description = "Unknown user")
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<MessageResponse>> {
    let user = state
        .db
        .get_user_by_email(&payload.email.trim().to_lowercase())
        .await?
        .ok_or_else(|| AppError::NotFound("Benutzer nicht gefunden".to_string()))?;

    if user.is_verified {
        return Err(AppError::InvalidInput(
            "Benutzer ist bereits verifiziert".to_string(),
        ));
    }

    let token = state.auth.generate_random_token();
    state.db.set_verification_token(&user.id, &token).await?;
    state
        .mailer
        .send_verification(&user.email, &verification_link(&state, &token))
        .await?;

    Ok(Json(MessageResponse::new(
        "Verifizierungs-E-Mail wurde erneut gesendet",
    )))
}

/// Start a password reset
///
/// Responds identically whether or not the address is registered.
#[utoipa::path(
    post,
    path = "/api/reset-password/request",
    request_body = EmailRequest,
    responses((status = 200, description = "Reset link sent if the account exists", body = MessageResponse)),
    tag = "auth"
)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<MessageResponse>> {
    let response = MessageResponse::new(
        "Falls ein Konto existiert, wurde eine E-Mail zum Zurücksetzen gesendet",
    );

    let Some(user) = state
        .db
        .get_user_by_email(&payload.email.trim().to_lowercase())
        .await?
    else {
        return Ok(Json(response));
    };

    let config = state.config.config();
    let token = state.auth.generate_random_token();
    let expires_at = Utc::now().timestamp() + config.auth.reset_token_ttl_secs;
    state
        .db
        .set_reset_token(&user.id, &state.auth.hash_token(&token), expires_at)
        .await?;

    let link = format!(
        "{}/reset-password?token={}",
        config.auth.app_base_url.trim_end_matches('/'),
        token
    );
    state.mailer.send_password_reset(&user.email, &link).await?;

    Ok(Json(response))
}

/// Set a new password with a reset token
#[utoipa::path(
    post,
    path = "/api/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Invalid or expired token")
    ),
    tag = "auth"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>> {
    if payload.token.is_empty() {
        return Err(AppError::InvalidInput(
            "Token and new password are required".to_string(),
        ));
    }
    check_password(&state, &payload.new_password)?;

    let user_id = state
        .db
        .find_reset_user(&state.auth.hash_token(&payload.token), Utc::now().timestamp())
        .await?
        .ok_or_else(|| AppError::InvalidInput("Invalid or expired reset token".to_string()))?;

    let password_hash = state.auth.hash_password(&payload.new_password)?;
    state.db.update_password(&user_id, &password_hash).await?;
    tracing::info!(user_id = %user_id, "Password reset");

    Ok(Json(MessageResponse::new("Password reset successfully")))
}
