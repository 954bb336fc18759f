//! Password transforms for the authorization store
//!
//! Passwords never enter a plan in plaintext. The coordinator runs them through
//! the configured [`PasswordEncryptor`] before submitting, so every replica
//! stores the same digest.

use crate::common::config::EncryptorKind;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// One-way password transform
pub trait PasswordEncryptor: Send + Sync {
    /// Produce the stored form of `password`
    fn encrypt(&self, password: &str) -> Result<String, AuthError>;

    /// Check `password` against a stored form
    fn validate(&self, password: &str, stored: &str) -> bool;
}

/// Hex SHA-256 digest
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Encryptor;

impl PasswordEncryptor for Sha256Encryptor {
    fn encrypt(&self, password: &str) -> Result<String, AuthError> {
        Ok(hex::encode(Sha256::digest(password.as_bytes())))
    }

    fn validate(&self, password: &str, stored: &str) -> bool {
        hex::encode(Sha256::digest(password.as_bytes())) == stored
    }
}

/// Salted Argon2 (PHC string format)
#[derive(Default)]
pub struct Argon2Encryptor {
    argon2: Argon2<'static>,
}

impl PasswordEncryptor for Argon2Encryptor {
    fn encrypt(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AuthError::HashError(e.to_string()))
    }

    fn validate(&self, password: &str, stored: &str) -> bool {
        match PasswordHash::new(stored) {
            Ok(parsed) => self
                .argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

/// Build the encryptor selected by configuration
pub fn encryptor_for(kind: EncryptorKind) -> Arc<dyn PasswordEncryptor> {
    match kind {
        EncryptorKind::Sha256 => Arc::new(Sha256Encryptor),
        EncryptorKind::Argon2 => Arc::new(Argon2Encryptor::default()),
    }
}

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Hash error: {0}")]
    HashError(String),
}

impl From<AuthError> for crate::Error {
    fn from(e: AuthError) -> Self {
        crate::Error::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_is_deterministic() {
        let enc = Sha256Encryptor;
        let a = enc.encrypt("root").unwrap();
        let b = enc.encrypt("root").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, "root");
        assert!(enc.validate("root", &a));
        assert!(!enc.validate("toor", &a));
    }

    #[test]
    fn test_argon2_salted() {
        let enc = Argon2Encryptor::default();
        let a = enc.encrypt("secret").unwrap();
        let b = enc.encrypt("secret").unwrap();
        assert_ne!(a, b);
        assert!(enc.validate("secret", &a));
        assert!(enc.validate("secret", &b));
        assert!(!enc.validate("other", &a));
        assert!(!enc.validate("secret", "not-a-phc-string"));
    }

    #[test]
    fn test_encryptor_for() {
        let enc = encryptor_for(EncryptorKind::Sha256);
        let stored = enc.encrypt("pw").unwrap();
        assert_eq!(stored.len(), 64);
    }
}
