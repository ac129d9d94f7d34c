//! Request authentication
//!
//! The same credential proof is accepted on the request surface and on the
//! live channel handshake: a session JWT from the `Authorization: Bearer`
//! header or the `jwt` cookie.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use parley_shared::{UserId, UserProfile};

use crate::error::ApiError;
use crate::store::UserDirectory;

use super::jwt::JwtManager;

/// State needed by the auth middleware
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: Arc<JwtManager>,
    pub directory: Arc<dyn UserDirectory>,
}

/// Authenticated caller, inserted as a request extension
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub profile: UserProfile,
}

/// Pull the session token from the request headers
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    if bearer.is_some() {
        return bearer;
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().strip_prefix("jwt="))
        .map(str::to_string)
        .find(|t| !t.is_empty())
}

/// Resolve a token to an existing account
pub async fn authenticate(auth: &AuthState, token: &str) -> Result<AuthUser, ApiError> {
    let claims = auth.jwt_manager.validate_token(token).map_err(|e| {
        tracing::debug!(error = %e, "Token validation failed");
        ApiError::InvalidToken
    })?;

    let user_id = claims.user_id();
    let profile = auth
        .directory
        .find_user(user_id)
        .await?
        .ok_or_else(|| {
            tracing::warn!(user_id = %user_id, "Auth failed: user not found");
            ApiError::Unauthorized
        })?;

    Ok(AuthUser { user_id, profile })
}

/// Middleware requiring a valid session
pub async fn require_auth(
    State(auth): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(request.headers()).ok_or(ApiError::Unauthorized)?;
    let user = authenticate(&auth, &token).await?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(extract_token(&headers).as_deref(), Some("abc.def"));
    }

    #[test]
    fn test_extract_cookie_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; jwt=tok123; other=1"),
        );
        assert_eq!(extract_token(&headers).as_deref(), Some("tok123"));
    }

    #[test]
    fn test_missing_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert_eq!(extract_token(&headers), None);
    }
}
