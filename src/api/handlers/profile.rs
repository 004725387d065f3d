use crate::{
    auth::AuthUser,
    db::User,
    types::{AppError, Profile, Result, UpdateProfileRequest},
    AppState,
};
use axum::{extract::State, Json};

impl From<User> for Profile {
    fn from(user: User) -> Self {
        Profile {
            id: user.id,
            email: user.email,
            name: user.name,
            bio: user.bio,
            avatar: user.avatar,
            is_verified: user.is_verified,
        }
    }
}

/// Get the current user's profile
///
/// Profiles of verified users are served from the profile cache.
#[utoipa::path(
    get,
    path = "/api/profile",
    responses(
        (status = 200, description = "Profile", body = Profile),
        (status = 404, description = "User not found")
    ),
    tag = "profile",
    security(("bearer" = []))
)]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<Profile>> {
    if let Some(profile) = state.profile_cache.get(&claims.sub) {
        tracing::debug!(user_id = %claims.sub, "Profile cache hit");
        return Ok(Json(profile));
    }

    let profile: Profile = state
        .db
        .get_user_by_id(&claims.sub)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?
        .into();

    if profile.is_verified {
        state
            .profile_cache
            .insert(claims.sub.clone(), profile.clone());
    }

    Ok(Json(profile))
}

/// Update the current user's profile
#[utoipa::path(
    put,
    path = "/api/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated profile", body = Profile),
        (status = 400, description = "Invalid input or email taken")
    ),
    tag = "profile",
    security(("bearer" = []))
)]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(mut payload): Json<UpdateProfileRequest>,
) -> Result<Json<Profile>> {
    if let Some(email) = payload.email.as_mut() {
        *email = email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(AppError::InvalidInput("A valid email is required".to_string()));
        }
        if let Some(existing) = state.db.get_user_by_email(email).await? {
            if existing.id != claims.sub {
                return Err(AppError::InvalidInput("Email already in use".to_string()));
            }
        }
    }

    let user = state.db.update_profile(&claims.sub, &payload).await?;
    state.profile_cache.invalidate(&claims.sub);
    tracing::info!(user_id = %claims.sub, "Profile updated");

    Ok(Json(user.into()))
}
