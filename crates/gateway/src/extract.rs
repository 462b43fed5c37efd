//! Session extraction
//!
//! Every authenticated route resolves an `AuthSession` up front: the
//! identity comes from a verified JWT when one is presented, otherwise
//! from a stable fingerprint of the client, and the matching session
//! row is upserted so ownership checks always have a session id.

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use uuid::Uuid;
use visualneurons_common::{
    auth::{anonymous_identity, token_from_bearer, token_from_cookies},
    db::models::Session,
    errors::AppError,
    Repository,
};

use crate::AppState;

/// Resolved session for the current request
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub session: Session,
}

impl AuthSession {
    pub fn id(&self) -> Uuid {
        self.session.id
    }
}

impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let identity = resolve_identity(parts, state)?;

        let repo = Repository::new(state.db.clone());
        let session = repo.get_or_create_session(&identity).await?;

        Ok(AuthSession { session })
    }
}

fn resolve_identity(parts: &Parts, state: &AppState) -> Result<String, AppError> {
    let token = header_str(parts, header::COOKIE)
        .and_then(|cookies| token_from_cookies(cookies, &state.config.auth.cookie_name))
        .or_else(|| header_str(parts, header::AUTHORIZATION).and_then(token_from_bearer));

    // A presented token must verify; only its absence falls through to
    // the anonymous path.
    if let Some(token) = token {
        let jwt = state.jwt.as_ref().ok_or_else(|| AppError::Unauthorized {
            message: "Token presented but authentication is not configured".to_string(),
        })?;
        let claims = jwt.validate_token(&token)?;
        return Ok(claims.sub);
    }

    let ip = header_str(parts, header::FORWARDED)
        .or_else(|| {
            parts
                .headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
        })
        .unwrap_or("unknown");
    let user_agent = header_str(parts, header::USER_AGENT).unwrap_or("unknown");

    Ok(anonymous_identity(&format!("{}|{}", ip, user_agent)))
}

fn header_str(parts: &Parts, name: header::HeaderName) -> Option<&str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}
