//! Cryptographic logics.

use std::sync::Arc;

use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::config::Argon2 as ArgonConfig;

/// Entropy of generated temporary passwords, in bytes.
const TEMPORARY_PASSWORD_BYTES: usize = 12;

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
    #[error("stored password hash is malformed")]
    MalformedHash,
    #[error("hashing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Password manager that uses Argon2id and PHC string format for hashing and
/// verification.
pub struct PasswordManager {
    params: Params,
}

impl PasswordManager {
    /// Create a new [`PasswordManager`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();

        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'_> {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
    }

    /// Hash password using Argon2id with a fresh random salt.
    pub fn hash_password(&self, password: impl AsRef<[u8]>) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_ref(), &salt)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Verify password against a PHC.
    ///
    /// Parameters are read from the PHC string, so hashes produced with an
    /// older configuration still verify.
    pub fn verify_password(
        &self,
        password: impl AsRef<[u8]>,
        phc_hash: &str,
    ) -> Result<bool> {
        let parsed =
            PasswordHash::new(phc_hash).map_err(|_| CryptoError::MalformedHash)?;

        match self.argon2().verify_password(password.as_ref(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(err) => Err(CryptoError::Argon2(err.to_string())),
        }
    }

    /// [`PasswordManager::hash_password`] off the async runtime.
    pub async fn hash_blocking(self: &Arc<Self>, password: String) -> Result<String> {
        let manager = Arc::clone(self);
        tokio::task::spawn_blocking(move || manager.hash_password(password))
            .await?
    }

    /// [`PasswordManager::verify_password`] off the async runtime.
    pub async fn verify_blocking(
        self: &Arc<Self>,
        password: String,
        phc_hash: String,
    ) -> Result<bool> {
        let manager = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            manager.verify_password(password, &phc_hash)
        })
        .await?
    }
}

/// Random, hex-encoded password delivered once to its owner.
pub fn generate_temporary_password() -> String {
    let mut bytes = [0u8; TEMPORARY_PASSWORD_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
pub(crate) fn cheap_params() -> ArgonConfig {
    ArgonConfig {
        memory_cost: 1024,
        iterations: 1,
        parallelism: 1,
        hash_length: 32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PasswordManager {
        PasswordManager::new(Some(cheap_params())).unwrap()
    }

    #[test]
    fn test_hash_and_verify() {
        let pwd = manager();
        let hash = pwd.hash_password("StRong_PaÂ§$W0rD").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(pwd.verify_password("StRong_PaÂ§$W0rD", &hash).unwrap());
        assert!(!pwd.verify_password("StRong_PaÂ§$W0rd", &hash).unwrap());
        assert!(!pwd.verify_password("", &hash).unwrap());
    }

    #[test]
    fn test_salt_is_per_hash() {
        let pwd = manager();
        let first = pwd.hash_password("password").unwrap();
        let second = pwd.hash_password("password").unwrap();

        assert_ne!(first, second);
        assert!(pwd.verify_password("password", &first).unwrap());
        assert!(pwd.verify_password("password", &second).unwrap());
    }

    #[test]
    fn test_malformed_hash() {
        let pwd = manager();
        assert!(matches!(
            pwd.verify_password("password", "not-a-phc-string"),
            Err(CryptoError::MalformedHash)
        ));
    }

    #[test]
    fn test_verify_with_other_params() {
        let strong = PasswordManager::new(Some(ArgonConfig {
            memory_cost: 2048,
            iterations: 2,
            ..cheap_params()
        }))
        .unwrap();
        let hash = strong.hash_password("password").unwrap();

        assert!(manager().verify_password("password", &hash).unwrap());
    }

    #[test]
    fn test_temporary_password() {
        let first = generate_temporary_password();
        let second = generate_temporary_password();

        assert_eq!(first.len(), TEMPORARY_PASSWORD_BYTES * 2);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_blocking_helpers() {
        let pwd = Arc::new(manager());
        let hash = pwd.hash_blocking("volunteer".into()).await.unwrap();

        assert!(pwd.verify_blocking("volunteer".into(), hash.clone()).await.unwrap());
        assert!(!pwd.verify_blocking("other".into(), hash).await.unwrap());
    }
}
