//! Bearer tokens
//!
//! Signed, self-contained HS256 JWTs carrying `{sub, email, iat, exp}`.
//! Stateless by design: there is no server-side revocation list, a token is
//! valid until `exp`.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

/// Default token lifetime: 7 days
const TOKEN_LIFETIME_SECS: i64 = 7 * 24 * 60 * 60;

/// Token payload. All fields are verified on decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// User email, for display and logging
    pub email: String,
    /// Issued-at (unix seconds)
    pub iat: i64,
    /// Expiration (unix seconds)
    pub exp: i64,
}

/// Token mint/verify service. Keys are immutable after construction; share
/// via `Clone`.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime_secs: i64,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            lifetime_secs: TOKEN_LIFETIME_SECS,
        }
    }

    #[cfg(test)]
    fn with_lifetime(secret: &str, lifetime_secs: i64) -> Self {
        Self {
            lifetime_secs,
            ..Self::new(secret)
        }
    }

    /// Mint a token for a user. Returns the token and its expiry (unix
    /// seconds), which the login/register responses surface as `expiresAt`.
    pub fn mint(&self, user_id: &str, email: &str) -> ApiResult<(String, i64)> {
        let now = Utc::now();
        let exp = (now + Duration::seconds(self.lifetime_secs)).timestamp();

        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat: now.timestamp(),
            exp,
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(format!("token encoding failed: {}", e)))?;

        Ok((token, exp))
    }

    /// Verify a token and return its claims. Expired, malformed, or
    /// wrongly-signed tokens all come back as `Unauthorized`.
    pub fn verify(&self, token: &str) -> ApiResult<Claims> {
        let mut validation = Validation::default();
        validation.leeway = 0;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| ApiError::Unauthorized)
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService").finish_non_exhaustive()
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn strip_bearer(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_and_verify() {
        let svc = TokenService::new("test-secret-test-secret-test-secret");
        let (token, exp) = svc.mint("user-1", "a@b.co").unwrap();

        let claims = svc.verify(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email, "a@b.co");
        assert_eq!(claims.exp, exp);
        assert!(claims.exp - claims.iat == TOKEN_LIFETIME_SECS);
    }

    #[test]
    fn test_expired_token_rejected() {
        // Lifetime already elapsed at mint time
        let svc = TokenService::with_lifetime("test-secret-test-secret-test-secret", -60);
        let (token, _) = svc.mint("user-1", "a@b.co").unwrap();

        assert!(svc.verify(&token).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let minter = TokenService::new("secret-one-secret-one-secret-one");
        let other = TokenService::new("secret-two-secret-two-secret-two");

        let (token, _) = minter.mint("user-1", "a@b.co").unwrap();
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        let svc = TokenService::new("test-secret-test-secret-test-secret");
        assert!(svc.verify("not.a.token").is_err());
        assert!(svc.verify("").is_err());
    }

    #[test]
    fn test_strip_bearer() {
        assert_eq!(strip_bearer("Bearer abc"), Some("abc"));
        assert_eq!(strip_bearer("Basic abc"), None);
    }
}
