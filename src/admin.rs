//! Administrator authentication against the configured allow-list.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Admin;
use crate::crypto::{CryptoError, PasswordManager};
use crate::error::{Result, ServerError};
use crate::ngo::{Session, TOKEN_TYPE, normalize_email};
use crate::token::{Role, TokenManager};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct AdminProfile {
    pub email: String,
    pub role: Role,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct AdminSession {
    pub admin: AdminProfile,
}

/// Static administrators.
#[derive(Clone)]
pub struct AdminDirectory {
    admins: Arc<HashMap<String, String>>,
    passwords: Arc<PasswordManager>,
    token: TokenManager,
    // Verified when the email is unknown, so both paths cost one Argon2 run.
    dummy_hash: Arc<String>,
}

impl AdminDirectory {
    /// Create a new [`AdminDirectory`].
    pub fn new(
        admins: &[Admin],
        passwords: Arc<PasswordManager>,
        token: TokenManager,
    ) -> Result<Self> {
        if admins.is_empty() {
            tracing::warn!("no `admins` entry on `config.yaml` file, admin login disabled");
        }

        let dummy_hash = passwords.hash_password("pashurakshak")?;

        Ok(Self {
            admins: Arc::new(
                admins
                    .iter()
                    .map(|admin| {
                        (normalize_email(&admin.email), admin.password_hash.clone())
                    })
                    .collect(),
            ),
            passwords,
            token,
            dummy_hash: Arc::new(dummy_hash),
        })
    }

    /// Exchange administrator credentials for a token.
    pub async fn login(
        &self,
        email: &str,
        password: String,
    ) -> Result<Session<AdminSession>> {
        let email = normalize_email(email);
        let (known, hash) = match self.admins.get(&email) {
            Some(hash) => (true, hash.clone()),
            None => (false, self.dummy_hash.to_string()),
        };

        let verified = match self.passwords.verify_blocking(password, hash).await {
            Ok(verified) => verified,
            Err(CryptoError::MalformedHash) => {
                tracing::error!(%email, "configured admin password hash is malformed");
                false
            },
            Err(err) => return Err(err.into()),
        };

        if !(known && verified) {
            tracing::warn!(%email, "admin login failed");
            return Err(ServerError::InvalidCredentials);
        }

        let token = self.token.issue(&email, Role::Admin)?;
        tracing::info!(%email, "admin logged in");

        Ok(Session {
            token,
            token_type: TOKEN_TYPE.into(),
            expires_in: self.token.expires_in(),
            subject: AdminSession {
                admin: AdminProfile {
                    email,
                    role: Role::Admin,
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cheap_params;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn directory(malformed: bool) -> AdminDirectory {
        let passwords =
            Arc::new(PasswordManager::new(Some(cheap_params())).unwrap());
        let password_hash = if malformed {
            "plaintext".to_owned()
        } else {
            passwords.hash_password("admin-secret").unwrap()
        };

        AdminDirectory::new(
            &[Admin {
                email: "Admin@Example.org".into(),
                password_hash,
            }],
            passwords,
            TokenManager::new("https://api.example.org/", SECRET),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_login() {
        let session = directory(false)
            .login(" admin@example.ORG", "admin-secret".into())
            .await
            .unwrap();

        assert_eq!(session.subject.admin.email, "admin@example.org");
        let claims = TokenManager::new("https://api.example.org/", SECRET)
            .verify(&session.token)
            .unwrap();
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.sub, "admin@example.org");
    }

    #[tokio::test]
    async fn test_login_failures() {
        let admins = directory(false);

        assert!(matches!(
            admins.login("admin@example.org", "wrong".into()).await,
            Err(ServerError::InvalidCredentials)
        ));
        // Knowing the dummy password is not enough.
        assert!(matches!(
            admins.login("root@example.org", "pashurakshak".into()).await,
            Err(ServerError::InvalidCredentials)
        ));
        assert!(matches!(
            directory(true).login("admin@example.org", "plaintext".into()).await,
            Err(ServerError::InvalidCredentials)
        ));
    }
}
