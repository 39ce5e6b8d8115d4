//! Configuration manager.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Environment variable overriding `token.secret`.
pub const SECRET_ENV: &str = "JWT_SECRET";
const MIN_SECRET_LENGTH: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("missing token secret, set `token.secret` or `{SECRET_ENV}`")]
    MissingSecret,
    #[error("token secret must be at least {MIN_SECRET_LENGTH} bytes long")]
    WeakSecret,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Public URL of current instance, used as token issuer.
    pub url: String,
    #[serde(default)]
    pub(crate) version: String,
    #[serde(skip)]
    pub(crate) path: PathBuf,
    /// HTTP server options.
    #[serde(default)]
    pub server: Server,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Related to JsonWebToken configuration.
    #[serde(skip_serializing)]
    pub token: Option<Token>,
    /// Related to notification sending.
    #[serde(skip_serializing)]
    pub mail: Option<Mail>,
    /// Administrators allowed to vet registrations.
    #[serde(default, skip_serializing)]
    pub admins: Vec<Admin>,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    /// Socket address to listen on.
    pub address: String,
    /// Origins allowed by CORS. Empty means any origin.
    pub allowed_origins: Vec<String>,
    /// Maximum accepted request body, in bytes.
    pub body_size_limit: usize,
    /// Scratch directory for a document upload front. The JSON API only
    /// carries document URLs and never writes there.
    pub upload_temp_dir: PathBuf,
    /// Whole-request timeout, in seconds.
    pub request_timeout: u64,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8080".into(),
            allowed_origins: vec!["http://localhost:3000".into()],
            body_size_limit: 10 * 1024 * 1024, // 10 MiB.
            upload_temp_dir: std::env::temp_dir().join("pashurakshak"),
            request_timeout: 15,
        }
    }
}

impl Server {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing, in KiB.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// Json Web Token configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Token {
    /// HMAC secret. `JWT_SECRET` takes precedence.
    pub secret: Option<String>,
    /// Lifetime of issued tokens, in seconds.
    pub ttl: Option<u64>,
}

/// Notification queue configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    /// Hostname:(?port) for RabbitMQ instance.
    pub address: String,
    /// RabbitMQ default vhost.
    pub vhost: Option<String>,
    /// RabbitMQ username to access queue.
    pub username: String,
    /// RabbitMQ password to access queue.
    pub password: String,
    /// Max channel connections.
    pub pool: Option<u16>,
    /// Queue name to send mailing events.
    pub queue: String,
    /// Gateway timeout, in seconds.
    pub timeout: Option<u64>,
}

/// Static administrator credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admin {
    pub email: String,
    /// Argon2 PHC string.
    pub password_hash: String,
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, ConfigError> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                let mut config: Configuration =
                    match serde_yaml::from_reader(file) {
                        Ok(config) => config,
                        Err(err) => {
                            return Ok(Arc::new(self.error(err)));
                        },
                    };

                config.version = VERSION.to_owned();
                if !config.url.is_empty() {
                    config.url = self.normalize_url(&config.url)?;
                }
                for admin in config.admins.iter_mut() {
                    admin.email = admin.email.trim().to_lowercase();
                }

                Ok(Arc::new(config))
            },
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found or invalid");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }

    /// Token issuer, falls back to the instance name.
    pub fn issuer(&self) -> &str {
        if self.url.is_empty() {
            &self.name
        } else {
            &self.url
        }
    }

    /// Resolve the signing secret, environment first.
    pub fn token_secret(&self) -> Result<String, ConfigError> {
        let secret = std::env::var(SECRET_ENV).ok().or_else(|| {
            self.token.as_ref().and_then(|token| token.secret.clone())
        });

        match secret {
            Some(secret) if secret.len() >= MIN_SECRET_LENGTH => Ok(secret),
            Some(_) => Err(ConfigError::WeakSecret),
            None => Err(ConfigError::MissingSecret),
        }
    }

    /// Gateway timeout used for every notification.
    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(
            self.mail.as_ref().and_then(|mail| mail.timeout).unwrap_or(10),
        )
    }
}
