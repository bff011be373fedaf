//! Authentication extractor.
//!
//! Store webhooks authenticate with `Authorization: Bearer <AUTH_SECRET>`.
//! When no secret is configured every request is accepted.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};

use crate::AppState;

/// Caller that passed the bearer check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthUser {
    /// Presented the configured secret
    Webhook,
    /// No secret is configured
    Anonymous,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        check(header, state.config.auth_secret.as_deref())
    }
}

fn check(header: Option<&str>, secret: Option<&str>) -> Result<AuthUser, (StatusCode, &'static str)> {
    let Some(secret) = secret else {
        return Ok(AuthUser::Anonymous);
    };

    match header {
        Some(header) => {
            let token = header
                .strip_prefix("Bearer ")
                .ok_or((StatusCode::UNAUTHORIZED, "Invalid authorization header format"))?;
            if token.is_empty() {
                return Err((StatusCode::UNAUTHORIZED, "Empty bearer token"));
            }
            if !same_secret(token.as_bytes(), secret.as_bytes()) {
                tracing::warn!("Rejected webhook with a wrong bearer token");
                return Err((StatusCode::UNAUTHORIZED, "Invalid bearer token"));
            }
            Ok(AuthUser::Webhook)
        }
        None => Err((StatusCode::UNAUTHORIZED, "Missing authorization header")),
    }
}

/// Compare without stopping at the first differing byte.
fn same_secret(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
