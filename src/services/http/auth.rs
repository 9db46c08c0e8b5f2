use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use super::AppState;
use crate::{services::ServiceError, utils::now_millis};

/// The caller behind a valid bearer token.
pub struct AuthUser {
    pub user_id: String,
    pub is_admin: bool,
    pub token: String,
}

/// An [`AuthUser`] whose session was issued to an administrator.
pub struct AdminUser(pub AuthUser);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ServiceError::Unauthorized("Missing bearer token".to_string()))?;

        let session = state
            .sessions
            .resolve(token, now_millis())
            .ok_or_else(|| ServiceError::Unauthorized("Session expired or invalid".to_string()))?;

        Ok(AuthUser {
            user_id: session.user_id,
            is_admin: session.is_admin,
            token: session.token,
        })
    }
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(ServiceError::Forbidden("Admin access required".to_string()));
        }
        Ok(AdminUser(user))
    }
}
