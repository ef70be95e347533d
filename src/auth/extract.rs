//! Request extractors for the bearer-token guard, the admin guard and the
//! client metadata recorded in the activity log.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};

use crate::db::models::User;
use crate::error::AppError;
use crate::state::AppState;

const NO_TOKEN: &str = "Not authorized, no token";
const INVALID_TOKEN: &str = "Not authorized, invalid token";
const USER_NOT_FOUND: &str = "Not authorized, user not found";
const ADMINS_ONLY: &str = "Access denied: Admins only";

/// Extract bearer token from Authorization header
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// The caller, resolved from a valid bearer token. Reloaded from the store
/// on every request so role changes and deletions take effect immediately.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);

        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized(NO_TOKEN.to_string()))?;

        let claims = state.tokens.verify(token).map_err(|e| {
            tracing::debug!("Token rejected: {}", e);
            AppError::Unauthorized(INVALID_TOKEN.to_string())
        })?;

        let user = state
            .store
            .find_user(claims.sub)
            .await?
            .ok_or_else(|| AppError::Unauthorized(USER_NOT_FOUND.to_string()))?;

        Ok(AuthUser(user))
    }
}

/// An authenticated caller whose stored role is `admin`.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            tracing::warn!("Non-admin {} denied access to {}", user.email, parts.uri.path());
            return Err(AppError::Forbidden(ADMINS_ONLY.to_string()));
        }
        Ok(AdminUser(user))
    }
}

/// Client address and user agent, for activity records.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub ip: String,
    pub user_agent: String,
}

impl RequestMeta {
    fn from_parts(parts: &Parts) -> Self {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .or_else(|| {
                parts
                    .headers
                    .get("x-forwarded-for")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.split(',').next())
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            })
            .unwrap_or_else(|| "0.0.0.0".to_string());

        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        Self { ip, user_agent }
    }
}

impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }

    #[test]
    fn test_request_meta_defaults() {
        let (parts, _) = Request::get("/").body(()).unwrap().into_parts();
        let meta = RequestMeta::from_parts(&parts);
        assert_eq!(meta.ip, "0.0.0.0");
        assert_eq!(meta.user_agent, "unknown");
    }

    #[test]
    fn test_request_meta_prefers_socket_address() {
        let (mut parts, _) = Request::get("/")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .header("user-agent", "Mozilla/5.0")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(RequestMeta::from_parts(&parts).ip, "203.0.113.9");

        parts
            .extensions
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
        let meta = RequestMeta::from_parts(&parts);
        assert_eq!(meta.ip, "127.0.0.1");
        assert_eq!(meta.user_agent, "Mozilla/5.0");
    }
}
