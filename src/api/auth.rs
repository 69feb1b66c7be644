use crate::api::AppState;
use crate::api::cookies::{self, ACCESS_COOKIE, REFRESH_COOKIE};
use crate::api::dto::auth::{AuthResponse, LoginRequest, LogoutRequest, MeResponse, MessageResponse, RefreshRequest};
use crate::api::middleware::AuthUser;
use crate::error::{AppError, Result};
use axum::{Json, body::Bytes, extract::State, response::IntoResponse};
use axum_extra::extract::cookie::CookieJar;
use serde::de::DeserializeOwned;

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    serde_json::from_slice(body).map_err(|_| AppError::BadRequest("Invalid request".into()))
}

pub async fn login(State(state): State<AppState>, jar: CookieJar, body: Bytes) -> Result<impl IntoResponse> {
    let payload = parse_body::<LoginRequest>(&body)?;
    if payload.username.is_empty() || payload.password.is_empty() {
        return Err(AppError::BadRequest("Invalid request".into()));
    }

    let session = state.auth_service.authenticate(&payload.username, &payload.password).await?;
    let jar = cookies::with_session(jar, &session, state.auth_service.config());

    Ok((jar, Json(AuthResponse::from(session))))
}

/// Rotates the session. The refresh token comes from its cookie, or the JSON body when absent.
pub async fn refresh(State(state): State<AppState>, jar: CookieJar, body: Bytes) -> Result<impl IntoResponse> {
    let refresh_token = match cookies::value(&jar, REFRESH_COOKIE) {
        Some(token) => token.to_string(),
        None => parse_body::<RefreshRequest>(&body)?.refresh_token,
    };

    let session = state.auth_service.refresh_tokens(&refresh_token).await?;
    let jar = cookies::with_session(jar, &session, state.auth_service.config());

    Ok((jar, Json(AuthResponse::from(session))))
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar, body: Bytes) -> Result<impl IntoResponse> {
    let (access_token, refresh_token) =
        match (cookies::value(&jar, ACCESS_COOKIE), cookies::value(&jar, REFRESH_COOKIE)) {
            (Some(access), Some(refresh)) => (access.to_string(), refresh.to_string()),
            _ => {
                let payload = parse_body::<LogoutRequest>(&body)?;
                (payload.access_token, payload.refresh_token)
            }
        };

    state.auth_service.logout(&access_token, &refresh_token).await?;
    let jar = cookies::without_session(jar, state.auth_service.config());

    Ok((jar, Json(MessageResponse { message: "Logged out successfully" })))
}

pub async fn me(auth_user: AuthUser, State(state): State<AppState>) -> Result<impl IntoResponse> {
    let user = state.user_service.get_user(auth_user.user_id).await?;
    Ok(Json(MeResponse { user: user.into() }))
}

pub async fn ping() -> &'static str {
    "pong"
}
