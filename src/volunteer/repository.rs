//! Handle volunteer database requests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::error::{Result, ServerError};
use crate::ngo::NgoId;
use crate::volunteer::{Volunteer, VolunteerId};

/// Storage of volunteers.
#[async_trait]
pub trait VolunteerRepository: Send + Sync {
    /// Insert a volunteer.
    ///
    /// Fails with [`ServerError::DuplicateEmail`] when the email is taken by
    /// any volunteer, and with [`ServerError::NotFound`] when the owning NGO
    /// does not exist.
    async fn insert(&self, volunteer: &Volunteer) -> Result<()>;

    /// Volunteers of `ngo`, newest first.
    async fn list_by_ngo(&self, ngo: NgoId) -> Result<Vec<Volunteer>>;

    /// Delete a volunteer only if it belongs to `ngo`.
    async fn delete(&self, ngo: NgoId, id: VolunteerId) -> Result<bool>;
}

#[derive(FromRow)]
struct VolunteerRow {
    id: VolunteerId,
    name: String,
    email: String,
    ngo_id: NgoId,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<VolunteerRow> for Volunteer {
    type Error = ServerError;

    fn try_from(row: VolunteerRow) -> Result<Self> {
        Ok(Volunteer {
            id: row.id,
            name: row.name,
            email: row.email,
            password: None,
            ngo: row.ngo_id,
            status: row.status.parse().map_err(ServerError::internal)?,
            created_at: row.created_at,
        })
    }
}

/// PostgreSQL-backed [`VolunteerRepository`].
#[derive(Clone)]
pub struct PgVolunteerRepository {
    pool: PgPool,
}

impl PgVolunteerRepository {
    /// Create a new [`PgVolunteerRepository`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VolunteerRepository for PgVolunteerRepository {
    async fn insert(&self, volunteer: &Volunteer) -> Result<()> {
        let result = sqlx::query(
            r#"INSERT INTO volunteers (id, name, email, password, ngo_id, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(volunteer.id)
        .bind(&volunteer.name)
        .bind(&volunteer.email)
        .bind(&volunteer.password)
        .bind(volunteer.ngo)
        .bind(volunteer.status.as_str())
        .bind(volunteer.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                Err(ServerError::DuplicateEmail)
            },
            Err(sqlx::Error::Database(err))
                if err.is_foreign_key_violation() =>
            {
                Err(ServerError::NotFound)
            },
            Err(err) => Err(err.into()),
        }
    }

    async fn list_by_ngo(&self, ngo: NgoId) -> Result<Vec<Volunteer>> {
        sqlx::query_as::<_, VolunteerRow>(
            r#"SELECT id, name, email, ngo_id, status, created_at
                FROM volunteers
                WHERE ngo_id = $1
                ORDER BY created_at DESC"#,
        )
        .bind(ngo)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Volunteer::try_from)
        .collect()
    }

    async fn delete(&self, ngo: NgoId, id: VolunteerId) -> Result<bool> {
        let result =
            sqlx::query(r#"DELETE FROM volunteers WHERE id = $1 AND ngo_id = $2"#)
                .bind(id)
                .bind(ngo)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }
}
