//! Capability token issuance and verification
//!
//! Non-public resources are gated by short-lived signed tokens. A token is a
//! capability bound to one (resource, identity) pair: verification alone is
//! not enough, the claims must also match the resource being requested and
//! its recorded owner.
//!
//! Security notes:
//! - Tokens are signed with HS256 (HMAC-SHA256)
//! - Default expiry is 1 hour, validated with zero leeway
//! - Verification fails closed: bad signature, structural corruption or
//!   past expiry all yield no claims, never a partial result

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::KuraError;

/// Payload stored in a capability token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenClaims {
    /// Combined resource identifier the token is scoped to
    #[serde(rename = "resourceId")]
    pub resource_id: String,
    /// Identity the token was issued to
    pub identity: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Capability token generator and verifier
#[derive(Clone)]
pub struct TokenService {
    secret: String,
    expiry_seconds: u64,
}

impl TokenService {
    /// Create a new token service.
    ///
    /// Returns an error if the secret is empty or too short.
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self, KuraError> {
        if secret.is_empty() {
            return Err(KuraError::Config(
                "JWT_SECRET is required in production mode".into(),
            ));
        }

        if secret.len() < 32 {
            return Err(KuraError::Config(
                "JWT_SECRET must be at least 32 characters".into(),
            ));
        }

        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    /// Token lifetime in seconds
    pub fn expiry_seconds(&self) -> u64 {
        self.expiry_seconds
    }

    /// Issue a token scoped to one resource and one identity
    pub fn issue(&self, resource_id: &str, identity: &str) -> Result<String, KuraError> {
        let now = unix_now()?;
        self.encode(TokenClaims {
            resource_id: resource_id.to_string(),
            identity: identity.to_string(),
            iat: now,
            exp: now + self.expiry_seconds,
        })
    }

    fn encode(&self, claims: TokenClaims) -> Result<String, KuraError> {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| KuraError::Auth(format!("Failed to generate token: {}", e)))
    }

    /// Verify a token, returning its claims only when the signature checks
    /// out and the expiry lies in the future.
    pub fn verify(&self, token: &str) -> Option<TokenClaims> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        match decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        ) {
            Ok(data) => Some(data.claims),
            Err(_) => None,
        }
    }

    /// Check that a verified token actually grants access to `resource_id`
    /// owned by `owner`: the capability binding, not just signature validity.
    pub fn authorizes(&self, token: &str, resource_id: &str, owner: &str) -> bool {
        match self.verify(token) {
            Some(claims) => claims.resource_id == resource_id && claims.identity == owner,
            None => false,
        }
    }
}

/// Extract token from an Authorization header.
/// Supports "Bearer <token>" format and raw tokens.
pub fn extract_bearer_token(auth_header: Option<&str>) -> Option<&str> {
    let header = auth_header?;

    if let Some(token) = header.strip_prefix("Bearer ") {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token);
        }
    }

    if !header.contains(' ') {
        let token = header.trim();
        if !token.is_empty() {
            return Some(token);
        }
    }

    None
}

fn unix_now() -> Result<u64, KuraError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| KuraError::Auth(format!("System time error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service() -> TokenService {
        TokenService::new(
            "test-secret-that-is-at-least-32-characters-long".into(),
            3600,
        )
        .unwrap()
    }

    #[test]
    fn test_issue_and_verify_roundtrip() {
        let service = test_service();

        let token = service.issue("u1_c1_i1", "u1").unwrap();
        assert!(!token.is_empty());

        let claims = service.verify(&token).unwrap();
        assert_eq!(claims.resource_id, "u1_c1_i1");
        assert_eq!(claims.identity, "u1");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_expired_token_is_invalid() {
        let service = test_service();
        let now = unix_now().unwrap();

        let token = service
            .encode(TokenClaims {
                resource_id: "u1_c1_i1".to_string(),
                identity: "u1".to_string(),
                iat: now - 7200,
                exp: now - 3600,
            })
            .unwrap();

        assert!(service.verify(&token).is_none());
    }

    #[test]
    fn test_tampered_token_is_invalid() {
        let service = test_service();
        let token = service.issue("u1_c1_i1", "u1").unwrap();

        // Flip a single byte anywhere in the token
        let bytes = token.as_bytes();
        for i in 0..bytes.len() {
            let mut altered = bytes.to_vec();
            altered[i] = if altered[i] == b'A' { b'B' } else { b'A' };
            let altered = String::from_utf8(altered).unwrap();
            assert!(
                service.verify(&altered).is_none(),
                "byte {} alteration accepted",
                i
            );
        }
        // The unaltered token still verifies
        assert!(service.verify(&token).is_some());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let service = test_service();
        let other = TokenService::new(
            "different-secret-that-is-at-least-32-characters".into(),
            3600,
        )
        .unwrap();

        let token = service.issue("u1_c1_i1", "u1").unwrap();
        assert!(other.verify(&token).is_none());
    }

    #[test]
    fn test_capability_binding() {
        let service = test_service();
        let token = service.issue("u1_c1_i1", "u1").unwrap();

        assert!(service.authorizes(&token, "u1_c1_i1", "u1"));
        // Wrong resource
        assert!(!service.authorizes(&token, "u1_c1_i2", "u1"));
        // Wrong owner
        assert!(!service.authorizes(&token, "u1_c1_i1", "u2"));
        // Garbage token
        assert!(!service.authorizes("not-a-token", "u1_c1_i1", "u1"));
    }

    #[test]
    fn test_secret_validation() {
        assert!(TokenService::new("short".into(), 3600).is_err());
        assert!(TokenService::new("".into(), 3600).is_err());
        assert!(TokenService::new("this-secret-is-at-least-32-chars-long".into(), 3600).is_ok());
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token(Some("Bearer abc123")), Some("abc123"));
        assert_eq!(extract_bearer_token(Some("abc123")), Some("abc123"));
        assert_eq!(extract_bearer_token(None), None);
        assert_eq!(extract_bearer_token(Some("")), None);
        assert_eq!(extract_bearer_token(Some("Bearer ")), None);
        assert_eq!(extract_bearer_token(Some("Basic abc123")), None);
    }
}
