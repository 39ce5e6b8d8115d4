//! Manage json web tokens.

use std::fmt;
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use serde::{Deserialize, Serialize};

/// Default lifetime of login tokens.
pub const EXPIRATION_TIME: Duration = Duration::from_secs(60 * 60 * 24); // 24 hours.

/// Role carried by a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Ngo,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Ngo => write!(f, "ngo"),
        }
    }
}

/// Pieces of information asserted on a JWT.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Identifies the expiration time on or after which the JWT must not be
    /// accepted for processing.
    pub exp: u64,
    /// Identifies the time at which the JWT was issued.
    pub iat: u64,
    /// Identifies the instance that issued the JWT.
    pub iss: String,
    /// Admin email or NGO ID.
    pub sub: String,
    pub role: Role,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("cannot encode token")]
    Encoding(#[source] jsonwebtoken::errors::Error),
}

/// Manage JWT tokens.
#[derive(Clone)]
pub struct TokenManager {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl TokenManager {
    /// Create a new [`TokenManager`] signing with an HMAC secret.
    pub fn new(issuer: &str, secret: &[u8]) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.to_owned(),
            ttl: EXPIRATION_TIME,
        }
    }

    /// Set lifetime of issued tokens.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Lifetime of issued tokens, in seconds.
    pub fn expires_in(&self) -> u64 {
        self.ttl.as_secs()
    }

    /// Create a new token with the default lifetime.
    pub fn issue(&self, subject: &str, role: Role) -> Result<String, TokenError> {
        self.issue_with_ttl(subject, role, self.ttl)
    }

    /// Create a new token living `ttl`.
    pub fn issue_with_ttl(
        &self,
        subject: &str,
        role: Role,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.sign(&Claims {
            exp: now + ttl.as_secs(),
            iat: now,
            iss: self.issuer.clone(),
            sub: subject.to_owned(),
            role,
        })
    }

    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(self.algorithm), claims, &self.encoding_key)
            .map_err(TokenError::Encoding)
    }

    /// Token that expired a minute ago.
    #[cfg(test)]
    pub(crate) fn expired(&self, subject: &str, role: Role) -> String {
        let now = chrono::Utc::now().timestamp() as u64;
        self.sign(&Claims {
            exp: now - 60,
            iat: now - 120,
            iss: self.issuer.clone(),
            sub: subject.to_owned(),
            role,
        })
        .unwrap()
    }

    /// Decode and check a token.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(err.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn manager() -> TokenManager {
        TokenManager::new("https://api.example.org/", SECRET)
    }

    #[test]
    fn test_issue_and_verify() {
        let token = manager().issue("ngo-id", Role::Ngo).unwrap();
        let claims = manager().verify(&token).unwrap();

        assert_eq!(claims.sub, "ngo-id");
        assert_eq!(claims.role, Role::Ngo);
        assert_eq!(claims.iss, "https://api.example.org/");
        assert_eq!(claims.exp - claims.iat, EXPIRATION_TIME.as_secs());
    }

    #[test]
    fn test_expired_token() {
        let manager = manager();
        let token = manager.expired("admin@example.org", Role::Admin);

        assert!(matches!(manager.verify(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn test_invalid_tokens() {
        let token = manager().issue("ngo-id", Role::Ngo).unwrap();

        // Another secret, same issuer.
        let other = TokenManager::new(
            "https://api.example.org/",
            b"fedcba9876543210fedcba9876543210",
        );
        assert!(matches!(other.verify(&token), Err(TokenError::Invalid(_))));

        // Same secret, another issuer.
        let other = TokenManager::new("https://evil.example.org/", SECRET);
        assert!(matches!(other.verify(&token), Err(TokenError::Invalid(_))));

        assert!(matches!(
            manager().verify("not.a.jwt"),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        assert_eq!(Role::Ngo.to_string(), "ngo");
    }
}
