//! database (db) union structure.

mod memory;

pub use memory::MemoryStore;

use std::sync::Arc;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::Postgres;
use crate::ngo::{NgoRepository, PgNgoRepository};
use crate::volunteer::{PgVolunteerRepository, VolunteerRepository};

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "pashurakshak";
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// PostgreSQL connection pool.
#[derive(Clone)]
pub struct Database {
    pub postgres: PgPool,
}

impl Database {
    /// Init database connections.
    pub async fn new(config: &Postgres) -> Result<Self, sqlx::Error> {
        let hostname = &config.address;
        let username =
            config.username.as_deref().unwrap_or(DEFAULT_CREDENTIALS);
        let password =
            config.password.as_deref().unwrap_or(DEFAULT_CREDENTIALS);
        let db = config.database.as_deref().unwrap_or(DEFAULT_DATABASE_NAME);

        let addr = format!("postgres://{username}:{password}@{hostname}/{db}");
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size.unwrap_or(DEFAULT_POOL_SIZE));
        let postgres = pool.connect(&addr).await?;

        tracing::info!(%hostname, %db, "postgres connected");

        Ok(Self { postgres })
    }

    /// Execute migrations scripts.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!().run(&self.postgres).await
    }
}

/// Storage used by services.
#[derive(Clone)]
pub struct Repositories {
    pub ngos: Arc<dyn NgoRepository>,
    pub volunteers: Arc<dyn VolunteerRepository>,
}

impl Repositories {
    pub fn postgres(db: &Database) -> Self {
        Self {
            ngos: Arc::new(PgNgoRepository::new(db.postgres.clone())),
            volunteers: Arc::new(PgVolunteerRepository::new(
                db.postgres.clone(),
            )),
        }
    }

    /// Volatile storage, lost on restart.
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::default());
        Self {
            ngos: store.clone(),
            volunteers: store,
        }
    }
}
