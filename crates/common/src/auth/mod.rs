//! Authentication utilities
//!
//! Sessions are keyed by a stable identity string. Authenticated
//! clients carry an HS256 JWT (cookie or bearer header) whose subject
//! becomes the identity; anonymous clients fall back to a fingerprint
//! hash so galleries and usage still scope per visitor.

use crate::errors::{AppError, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (stable user identity)
    pub sub: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// JWT token manager
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issue a token for an identity, valid for the given lifetime
    pub fn generate_token(&self, identity: &str, lifetime_secs: i64) -> Result<String> {
        let now = Utc::now();
        let claims = JwtClaims {
            sub: identity.to_string(),
            exp: (now + Duration::seconds(lifetime_secs)).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| AppError::Internal {
            message: format!("Failed to generate token: {}", e),
        })
    }

    /// Validate and decode a token
    pub fn validate_token(&self, token: &str) -> Result<JwtClaims> {
        decode::<JwtClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::ExpiredToken,
                _ => AppError::Unauthorized {
                    message: "Invalid token".to_string(),
                },
            })
    }
}

/// Pull a token out of a Cookie header value
pub fn token_from_cookies(cookie_header: &str, cookie_name: &str) -> Option<String> {
    cookie_header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        if name == cookie_name && !value.is_empty() {
            Some(value.to_string())
        } else {
            None
        }
    })
}

/// Pull a token out of an Authorization header value
pub fn token_from_bearer(auth_header: &str) -> Option<String> {
    auth_header
        .strip_prefix("Bearer ")
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
}

/// Stable anonymous identity from a client fingerprint
pub fn anonymous_identity(fingerprint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    format!("anon_{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let manager = JwtManager::new("test-secret");
        let token = manager.generate_token("user-42", 3600).unwrap();
        let claims = manager.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "user-42");
    }

    #[test]
    fn test_expired_token_rejected() {
        let manager = JwtManager::new("test-secret");
        let token = manager.generate_token("user-42", -3600).unwrap();
        assert!(matches!(
            manager.validate_token(&token),
            Err(AppError::ExpiredToken)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = JwtManager::new("secret-a")
            .generate_token("user-42", 3600)
            .unwrap();
        assert!(JwtManager::new("secret-b").validate_token(&token).is_err());
    }

    #[test]
    fn test_token_from_cookies() {
        let header = "theme=dark; vn_auth_token=abc123; other=1";
        assert_eq!(
            token_from_cookies(header, "vn_auth_token"),
            Some("abc123".to_string())
        );
        assert_eq!(token_from_cookies(header, "missing"), None);
        assert_eq!(token_from_cookies("vn_auth_token=", "vn_auth_token"), None);
    }

    #[test]
    fn test_token_from_bearer() {
        assert_eq!(
            token_from_bearer("Bearer abc123"),
            Some("abc123".to_string())
        );
        assert_eq!(token_from_bearer("Basic abc123"), None);
    }

    #[test]
    fn test_anonymous_identity_is_stable() {
        let a = anonymous_identity("10.0.0.1|Mozilla/5.0");
        let b = anonymous_identity("10.0.0.1|Mozilla/5.0");
        let c = anonymous_identity("10.0.0.2|Mozilla/5.0");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("anon_"));
    }
}
