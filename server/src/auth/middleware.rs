use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, StatusCode},
};

use crate::auth::session::{validate_session, SESSION_COOKIE};
use crate::db::{run_blocking, DbPool, UserId};

/// Authenticated caller, resolved from the `session_id` cookie or an
/// `Authorization: Bearer` header.
/// Implements axum's FromRequestParts for use as an extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub user_id: UserId,
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = credential_from_headers(&parts.headers).ok_or(StatusCode::UNAUTHORIZED)?;

        // Get the session database from request extensions (set by middleware layer)
        let sessions = parts
            .extensions
            .get::<SessionDb>()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

        let user_id = authenticate(&sessions.0, token)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(CurrentUser { user_id })
    }
}

/// Session database stored in request extensions for the CurrentUser extractor
#[derive(Clone)]
pub struct SessionDb(pub DbPool);

/// Validate a credential off the async runtime.
pub async fn authenticate(
    db: &DbPool,
    token: String,
) -> Result<Option<UserId>, crate::db::StoreError> {
    run_blocking(db, move |conn| validate_session(conn, &token)).await
}

/// Pull the session credential out of request headers.
/// The cookie wins over the bearer header when both are present.
pub fn credential_from_headers(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty());

    if from_cookie.is_some() {
        return from_cookie;
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_cookie_credential() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session_id=abc123; lang=en"),
        );
        assert_eq!(credential_from_headers(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_bearer_credential() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        assert_eq!(credential_from_headers(&headers).as_deref(), Some("tok"));
    }

    #[test]
    fn test_cookie_preferred_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session_id=fromcookie"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer frombearer"));
        assert_eq!(credential_from_headers(&headers).as_deref(), Some("fromcookie"));
    }

    #[test]
    fn test_missing_or_empty_credential() {
        let mut headers = HeaderMap::new();
        assert_eq!(credential_from_headers(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("session_id="));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert_eq!(credential_from_headers(&headers), None);
    }
}
