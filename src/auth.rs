use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

/// Token guarding the admin routes. `None` means the routes are disabled.
#[derive(Clone, Default)]
pub struct BearerToken(Option<Arc<str>>);

impl BearerToken {
    pub fn new(token: Option<String>) -> Self {
        match token.filter(|t| !t.is_empty()) {
            Some(token) => Self(Some(Arc::from(token))),
            None => {
                warn!("API_BEARER_TOKEN not set - admin routes will reject every request");
                Self(None)
            }
        }
    }

    fn matches(&self, candidate: &str) -> Result<bool, AuthError> {
        let expected = self.0.as_deref().ok_or(AuthError::ConfigurationError)?;
        Ok(expected.as_bytes().ct_eq(candidate.as_bytes()).into())
    }
}

/// Middleware to validate bearer token authentication
pub async fn validate_bearer_token(
    State(token): State<BearerToken>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let candidate = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidTokenFormat)?;

    if !token.matches(candidate)? {
        info!(
            event = "auth_failed",
            reason = "invalid_token",
            "Authentication attempt with invalid token"
        );
        return Err(AuthError::InvalidToken);
    }

    info!(
        event = "auth_success",
        "Valid authentication token provided"
    );
    Ok(next.run(request).await)
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    InvalidTokenFormat,
    ConfigurationError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing authorization token"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid authorization token"),
            AuthError::InvalidTokenFormat => (
                StatusCode::UNAUTHORIZED,
                "Invalid authorization format. Expected: Bearer <token>",
            ),
            AuthError::ConfigurationError => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Admin API is not configured",
            ),
        };

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_responses() {
        let missing = AuthError::MissingToken;
        assert_eq!(missing.into_response().status(), StatusCode::UNAUTHORIZED);

        let invalid = AuthError::InvalidToken;
        assert_eq!(invalid.into_response().status(), StatusCode::UNAUTHORIZED);

        let format = AuthError::InvalidTokenFormat;
        assert_eq!(format.into_response().status(), StatusCode::UNAUTHORIZED);

        let config = AuthError::ConfigurationError;
        assert_eq!(
            config.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_token_matching() {
        let token = BearerToken::new(Some("s3cret".to_string()));
        assert!(token.matches("s3cret").unwrap());
        assert!(!token.matches("s3cre").unwrap());
        assert!(!token.matches("").unwrap());
    }

    #[test]
    fn test_unconfigured_token_rejects() {
        let empty = BearerToken::new(Some(String::new()));
        assert!(matches!(
            empty.matches("anything"),
            Err(AuthError::ConfigurationError)
        ));
        assert!(BearerToken::default().matches("x").is_err());
    }
}
