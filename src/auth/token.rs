//! Bearer token validation.
//!
//! Tokens are HS256 JWTs carrying a subject, an optional role and an
//! expiry. The validator is a trait so the connection server can be tested
//! with a stub.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

const BEARER_PREFIX: &str = "Bearer ";

/// Why a credential was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("missing bearer credential")]
    Missing,

    #[error("malformed Authorization header")]
    Malformed,

    #[error("credential expired")]
    Expired,

    #[error("invalid credential: {0}")]
    Invalid(String),

    #[error("failed to issue credential: {0}")]
    Issue(String),
}

/// Decoded identity carried by a valid token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user or device id).
    pub sub: String,
    /// Role, checked on role-restricted routes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Expiration timestamp (seconds since epoch).
    pub exp: u64,
}

/// Claims handed to a handler. Empty on routes without a credential.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimsContext {
    claims: Option<Claims>,
}

impl ClaimsContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_claims(claims: Claims) -> Self {
        Self {
            claims: Some(claims),
        }
    }

    pub fn claims(&self) -> Option<&Claims> {
        self.claims.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_none()
    }
}

impl Serialize for ClaimsContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.claims {
            Some(claims) => claims.serialize(serializer),
            None => serializer.serialize_map(Some(0))?.end(),
        }
    }
}

/// Validates a raw bearer token.
pub trait CredentialValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<Claims, CredentialError>;
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn extract_bearer(header: Option<&str>) -> Result<&str, CredentialError> {
    let value = header.ok_or(CredentialError::Missing)?;
    let token = value
        .strip_prefix(BEARER_PREFIX)
        .ok_or(CredentialError::Malformed)?
        .trim();
    if token.is_empty() {
        return Err(CredentialError::Malformed);
    }
    Ok(token)
}

/// HS256 JWT validator.
#[derive(Clone)]
pub struct JwtValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Mint a token for `subject` valid for `ttl`.
    pub fn issue(
        &self,
        subject: impl Into<String>,
        role: Option<String>,
        ttl: Duration,
    ) -> Result<String, CredentialError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| CredentialError::Issue(e.to_string()))?
            .as_secs();
        let claims = Claims {
            sub: subject.into(),
            role,
            exp: now + ttl.as_secs(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| CredentialError::Issue(e.to_string()))
    }
}

impl std::fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtValidator").finish_non_exhaustive()
    }
}

impl CredentialValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<Claims, CredentialError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => CredentialError::Expired,
                _ => CredentialError::Invalid(e.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_round_trips() {
        let validator = JwtValidator::new("secret");
        let token = validator
            .issue("mower-7", Some("operator".into()), Duration::from_secs(60))
            .unwrap();

        let claims = validator.validate(&token).unwrap();
        assert_eq!(claims.sub, "mower-7");
        assert_eq!(claims.role.as_deref(), Some("operator"));
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = JwtValidator::new("one")
            .issue("u", None, Duration::from_secs(60))
            .unwrap();
        let err = JwtValidator::new("two").validate(&token).unwrap_err();
        assert!(matches!(err, CredentialError::Invalid(_)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let validator = JwtValidator::new("secret");
        let claims = Claims {
            sub: "u".into(),
            role: None,
            exp: 1_000,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert_eq!(validator.validate(&token), Err(CredentialError::Expired));
    }

    #[test]
    fn garbage_is_invalid() {
        let err = JwtValidator::new("secret").validate("not-a-jwt").unwrap_err();
        assert!(matches!(err, CredentialError::Invalid(_)));
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer(Some("Bearer abc")), Ok("abc"));
        assert_eq!(extract_bearer(None), Err(CredentialError::Missing));
        assert_eq!(extract_bearer(Some("Basic abc")), Err(CredentialError::Malformed));
        assert_eq!(extract_bearer(Some("Bearer   ")), Err(CredentialError::Malformed));
    }

    #[test]
    fn empty_context_serializes_as_empty_object() {
        let value = serde_json::to_value(ClaimsContext::empty()).unwrap();
        assert_eq!(value, serde_json::json!({}));
    }
}
