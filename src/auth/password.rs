//! Password hashing with Argon2id
//!
//! Hashes are PHC strings (`$argon2id$v=19$...`), self-describing with salt
//! and parameters, so verification needs no side-band data and parameter
//! upgrades can coexist with old rows.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use crate::error::{ApiError, ApiResult};

/// Password hashing service. `Clone` + `Send + Sync`; each hash draws a
/// fresh random salt.
#[derive(Clone)]
pub struct PasswordService {
    argon2: Argon2<'static>,
}

impl Default for PasswordService {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordService {
    pub fn new() -> Self {
        // 64 MiB memory, 3 iterations, 4 lanes: OWASP-recommended work
        // factor, ~100ms per verification on current hardware
        let params = Params::new(64 * 1024, 3, 4, None)
            .expect("static Argon2 params are valid");

        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    /// Hash a password for storage. Returns a PHC string.
    pub fn hash(&self, password: &str) -> ApiResult<String> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))
    }

    /// Verify a password against a stored hash in constant time.
    pub fn verify(&self, password: &str, hash: &str) -> ApiResult<bool> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| ApiError::Internal(format!("stored hash unreadable: {}", e)))?;

        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(ApiError::Internal(format!(
                "password verification failed: {}",
                e
            ))),
        }
    }
}

impl std::fmt::Debug for PasswordService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordService").finish_non_exhaustive()
    }
}

/// Validate password strength at registration.
///
/// Minimum 8 characters with at least one uppercase letter, one lowercase
/// letter, and one digit.
pub fn validate_password_strength(password: &str) -> Result<(), &'static str> {
    if password.chars().count() < 8 {
        return Err("Password must be at least 8 characters long");
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return Err("Password must contain at least one uppercase letter");
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return Err("Password must contain at least one lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one digit");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let svc = PasswordService::new();
        let hash = svc.hash("Abcdef12").unwrap();

        assert_ne!(hash, "Abcdef12");
        assert!(hash.starts_with("$argon2id$"));
        assert!(svc.verify("Abcdef12", &hash).unwrap());
        assert!(!svc.verify("Abcdef13", &hash).unwrap());
    }

    #[test]
    fn test_unique_salts() {
        let svc = PasswordService::new();
        let h1 = svc.hash("Abcdef12").unwrap();
        let h2 = svc.hash("Abcdef12").unwrap();

        assert_ne!(h1, h2);
        assert!(svc.verify("Abcdef12", &h1).unwrap());
        assert!(svc.verify("Abcdef12", &h2).unwrap());
    }

    #[test]
    fn test_strength_accepts_minimum() {
        assert!(validate_password_strength("Abcdef12").is_ok());
    }

    #[test]
    fn test_strength_rejections() {
        // All lowercase
        assert!(validate_password_strength("abcdefgh").is_err());
        // Too short
        assert!(validate_password_strength("Abc12").is_err());
        // No digit
        assert!(validate_password_strength("Abcdefgh").is_err());
        // No uppercase
        assert!(validate_password_strength("abcdef12").is_err());
        // No lowercase
        assert!(validate_password_strength("ABCDEF12").is_err());
    }
}
