use crate::api::AppState;
use crate::api::cookies::{self, ACCESS_COOKIE};
use crate::error::AppError;
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, HeaderValue, Request, header, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

/// The caller behind a valid access token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: i64,
}

/// Extracts the access token: `Authorization: Bearer` first, then the `access_token` cookie.
pub(crate) fn access_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    let jar = CookieJar::from_headers(headers);
    cookies::value(&jar, ACCESS_COOKIE).map(str::to_string)
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = access_token(&parts.headers).ok_or(AppError::TokenNotFound)?;
        let user_id = state.auth_service.validate_access_token(&token).await?;

        tracing::Span::current().record("user_id", user_id);
        Ok(Self { user_id })
    }
}

/// Keeps a caller-supplied `x-request-id`, otherwise mints a UUIDv7.
#[derive(Clone, Copy, Debug, Default)]
pub struct MakeRequestUuidOrHeader;

impl MakeRequestId for MakeRequestUuidOrHeader {
    fn make_request_id<B>(&mut self, request: &Request<B>) -> Option<RequestId> {
        if let Some(existing) = request.headers().get("x-request-id") {
            return Some(RequestId::new(existing.clone()));
        }
        HeaderValue::from_str(&Uuid::now_v7().to_string()).ok().map(RequestId::new)
    }
}
