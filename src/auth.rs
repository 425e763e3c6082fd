use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Basic, Authorization};
use axum_extra::TypedHeader;

use crate::{error::AppError, models::normalize_owner, state::AppState};

/// The user name a fronting proxy authenticated. The password is not checked
/// here.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub username: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(basic)) =
            TypedHeader::<Authorization<Basic>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let username = normalize_owner(basic.username()).map_err(|_| AppError::unauthorized())?;
        Ok(AuthenticatedUser { username })
    }
}
