use crate::config::AuthConfig;
use crate::domain::auth_session::AuthSession;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

fn session_cookie(name: &'static str, value: String, max_age: time::Duration, config: &AuthConfig) -> Cookie<'static> {
    let mut builder = Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(config.cookie_secure)
        .same_site(SameSite::Lax)
        .max_age(max_age);

    if let Some(domain) = &config.cookie_domain {
        builder = builder.domain(domain.clone());
    }

    builder.build()
}

/// Sets both HTTP-only session cookies, sized to the token lifetimes.
#[must_use]
pub fn with_session(jar: CookieJar, session: &AuthSession, config: &AuthConfig) -> CookieJar {
    jar.add(session_cookie(ACCESS_COOKIE, session.access_token.clone(), config.access_token_ttl(), config))
        .add(session_cookie(REFRESH_COOKIE, session.refresh_token.clone(), config.refresh_token_ttl(), config))
}

/// Expires both session cookies on the client.
#[must_use]
pub fn without_session(jar: CookieJar, config: &AuthConfig) -> CookieJar {
    jar.remove(session_cookie(ACCESS_COOKIE, String::new(), time::Duration::ZERO, config))
        .remove(session_cookie(REFRESH_COOKIE, String::new(), time::Duration::ZERO, config))
}

/// Returns a non-empty cookie value.
#[must_use]
pub fn value<'a>(jar: &'a CookieJar, name: &str) -> Option<&'a str> {
    jar.get(name).map(Cookie::value).filter(|v| !v.is_empty())
}
